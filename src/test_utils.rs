use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::IngestConfig,
    error::TransportError,
    felt::{Felt, TRANSFER_SELECTOR},
    models::{BlockMetadata, EventsPage, RawEvent, TransactionMetadata},
    paginator::{PageLimits, REMOTE_MAX_CHUNK_SIZE},
    retry::RetryProfile,
    transport::{ChainTransport, EventsRequest},
};

/// Scripted [`ChainTransport`] that counts every call it serves.
#[derive(Default)]
pub struct MockTransport {
    pages: Mutex<VecDeque<Result<EventsPage, TransportError>>>,
    requests: Mutex<Vec<EventsRequest>>,
    blocks: HashMap<u64, u64>,
    transactions: HashMap<Felt, Felt>,
    block_error: Option<TransportError>,
    transaction_error: Option<TransportError>,
    head: u64,
    events_calls: AtomicUsize,
    block_calls: AtomicUsize,
    transaction_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, events: Vec<RawEvent>, token: Option<&str>) -> Self {
        self.push(Ok(EventsPage { events, continuation_token: token.map(str::to_string) }))
    }

    pub fn with_page_error(self, err: TransportError) -> Self {
        self.push(Err(err))
    }

    fn push(self, page: Result<EventsPage, TransportError>) -> Self {
        if let Ok(mut pages) = self.pages.lock() {
            pages.push_back(page);
        }
        self
    }

    pub fn with_block(mut self, block_number: u64, timestamp: u64) -> Self {
        self.blocks.insert(block_number, timestamp);
        self
    }

    pub fn with_transaction(mut self, tx_hash: Felt, sender: Felt) -> Self {
        self.transactions.insert(tx_hash, sender);
        self
    }

    /// Every block lookup fails with `err`.
    pub fn failing_blocks(mut self, err: TransportError) -> Self {
        self.block_error = Some(err);
        self
    }

    /// Every transaction lookup fails with `err`.
    pub fn failing_transactions(mut self, err: TransportError) -> Self {
        self.transaction_error = Some(err);
        self
    }

    pub fn with_head(mut self, head: u64) -> Self {
        self.head = head;
        self
    }

    pub fn get_events_calls(&self) -> usize {
        self.events_calls.load(Ordering::SeqCst)
    }

    pub fn get_block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn get_transaction_calls(&self) -> usize {
        self.transaction_calls.load(Ordering::SeqCst)
    }

    pub fn events_requests(&self) -> Vec<EventsRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChainTransport for MockTransport {
    async fn get_events(&self, request: &EventsRequest) -> Result<EventsPage, TransportError> {
        self.events_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self.pages.lock().ok().and_then(|mut pages| pages.pop_front());
        next.unwrap_or_else(|| Ok(EventsPage { events: vec![], continuation_token: None }))
    }

    async fn get_block(&self, block_number: u64) -> Result<BlockMetadata, TransportError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.block_error {
            return Err(err.clone());
        }
        self.blocks
            .get(&block_number)
            .map(|&timestamp| BlockMetadata { block_number, timestamp })
            .ok_or_else(|| TransportError::Malformed(format!("block {block_number} not found")))
    }

    async fn get_transaction(&self, tx_hash: Felt) -> Result<TransactionMetadata, TransportError> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.transaction_error {
            return Err(err.clone());
        }
        self.transactions
            .get(&tx_hash)
            .map(|&sender_address| TransactionMetadata {
                transaction_hash: tx_hash,
                sender_address,
            })
            .ok_or_else(|| TransportError::Malformed(format!("transaction {tx_hash} not found")))
    }

    async fn latest_block_number(&self) -> Result<u64, TransportError> {
        Ok(self.head)
    }
}

/// Config for token `0x70` with retry delays short enough for tests.
pub fn ingest_config(facilitator_address: &str) -> IngestConfig {
    IngestConfig {
        chain_id: "SN_MAIN".into(),
        provider_id: "rpc".into(),
        token_address: Felt::from(0x70u64),
        token_decimals: 18,
        event_selector: *TRANSFER_SELECTOR,
        facilitator_id: "facilitator-1".into(),
        facilitator_address: felt(facilitator_address),
        limits: PageLimits {
            page_size: 100,
            max_results: 1_000,
            max_pages: 10,
            remote_max_chunk_size: REMOTE_MAX_CHUNK_SIZE,
        },
        concurrency: 4,
        events_retry: RetryProfile {
            base_delay: Duration::from_millis(1),
            ..RetryProfile::conservative()
        },
        lookup_retry: RetryProfile {
            base_delay: Duration::from_millis(1),
            ..RetryProfile::aggressive()
        },
        block_interval: Duration::from_secs(30),
        max_run_duration: Duration::from_secs(60),
    }
}

pub fn felt(s: &str) -> Felt {
    s.parse().expect("test felt")
}

/// Indexed-form transfer of 1 unit, `0x1 -> 0x2`.
pub fn transfer_event(block_number: u64, tx: u64) -> RawEvent {
    RawEvent {
        from_address: Felt::from(0x70u64),
        keys: vec![*TRANSFER_SELECTOR, Felt::from(1u64), Felt::from(2u64)],
        data: vec![Felt::from(1u64), Felt::ZERO],
        block_number,
        transaction_hash: Felt::from(tx),
    }
}
