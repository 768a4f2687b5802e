use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::{
    cache::{Resolution, ResolutionCache},
    config::IngestConfig,
    decoder::decode_batch,
    error::IngestError,
    filter::retain_facilitator_transfers,
    models::{NormalizedTransfer, RawEvent},
    paginator::{EventPaginator, EventQuery},
    retry::RetryExecutor,
    scheduler::BoundedScheduler,
    transport::ChainTransport,
    window::{AverageBlockInterval, BlockHead, BlockRange, BlockRangeEstimator, TimeWindow},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Idle,
    EstimatingRange,
    Paginating,
    Resolving,
    Decoding,
    Filtering,
    Done,
    Aborted,
}

/// Everything one window produced. Only built once decoding and filtering have
/// finished, so callers never see a partial window.
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub transfers: Vec<NormalizedTransfer>,
    pub block_range: BlockRange,
    pub events_fetched: usize,
    pub pages: u32,
    pub truncated: bool,
    pub decode_failures: usize,
    pub filtered_out: usize,
    pub unresolved_blocks: usize,
    pub unresolved_transactions: usize,
    /// Where the next window should start. `None` leaves the stored cursor alone.
    pub resume_from: Option<u64>,
}

/// Drives one window through estimate, paginate, resolve, decode and filter.
pub struct WindowOrchestrator<T: ?Sized> {
    transport: Arc<T>,
    config: IngestConfig,
    estimator: Box<dyn BlockRangeEstimator>,
    state: WindowState,
}

impl<T: ChainTransport + ?Sized + 'static> WindowOrchestrator<T> {
    pub fn new(transport: Arc<T>, config: IngestConfig) -> Self {
        let estimator = Box::new(AverageBlockInterval::new(config.block_interval));
        Self { transport, config, estimator, state: WindowState::Idle }
    }

    pub fn with_estimator(mut self, estimator: impl BlockRangeEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    fn transition(&mut self, next: WindowState) {
        debug!(from = ?self.state, to = ?next, "window state");
        self.state = next;
    }

    /// Ingests one window. Only pagination failures and configuration problems
    /// come back as errors; lookups and decoding degrade with a log entry.
    pub async fn run(&mut self, window: TimeWindow) -> Result<WindowReport, IngestError> {
        self.state = WindowState::Idle;
        match self.run_window(window).await {
            Ok(report) => {
                self.transition(WindowState::Done);
                Ok(report)
            }
            Err(e) => {
                error!(state = ?self.state, error = %e, "window aborted");
                self.transition(WindowState::Aborted);
                Err(e)
            }
        }
    }

    async fn run_window(&mut self, window: TimeWindow) -> Result<WindowReport, IngestError> {
        let lookups = RetryExecutor::new(self.config.lookup_retry);
        let scheduler = BoundedScheduler::new(self.config.concurrency);
        let mut cache = ResolutionCache::new();

        self.transition(WindowState::EstimatingRange);
        let head_number = lookups
            .execute("latest_block_number", || self.transport.latest_block_number())
            .await
            .map_err(|source| IngestError::Remote { operation: "latest_block_number", source })?
            .ok_or(IngestError::RetryExhausted("latest_block_number"))?;
        cache.resolve_blocks(self.transport.clone(), lookups, scheduler, [head_number]).await;
        let head_timestamp = match cache.block(head_number).and_then(Resolution::resolved) {
            Some(block) => block.timestamp,
            None => {
                warn!(
                    head_number,
                    fallback = window.now(),
                    "resolution miss, assuming head is current"
                );
                window.now()
            }
        };
        let head = BlockHead { number: head_number, timestamp: head_timestamp };
        let range = self.estimator.estimate(&window, head);
        info!(
            since = window.since(),
            now = window.now(),
            from_block = range.from_block,
            to_block = range.to_block,
            "estimated block range"
        );

        self.transition(WindowState::Paginating);
        let query = EventQuery {
            from_block: range.from_block,
            to_block: range.to_block,
            address: self.config.token_address,
            selector: self.config.event_selector,
        };
        let pagination = EventPaginator::new(
            &*self.transport,
            RetryExecutor::new(self.config.events_retry),
            self.config.limits,
        )
        .fetch(&query)
        .await?;
        let truncated = pagination.is_truncated();
        let pages = pagination.pages;
        let events = pagination.events;

        self.transition(WindowState::Resolving);
        cache
            .resolve_blocks(
                self.transport.clone(),
                lookups,
                scheduler,
                events.iter().map(|e| e.block_number),
            )
            .await;
        cache
            .resolve_transactions(
                self.transport.clone(),
                lookups,
                scheduler,
                events.iter().map(|e| e.transaction_hash),
            )
            .await;

        let resume_from = if truncated {
            resume_after_truncation(&events, &cache, &window)
        } else {
            Some(window.now())
        };

        self.transition(WindowState::Decoding);
        let now = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;
        let batch = decode_batch(&events, &cache, &self.config, now);

        self.transition(WindowState::Filtering);
        let decoded = batch.transfers.len();
        let facilitator = self.config.facilitator_address.to_hex();
        let transfers = retain_facilitator_transfers(batch.transfers, &facilitator);

        let report = WindowReport {
            filtered_out: decoded - transfers.len(),
            transfers,
            block_range: range,
            events_fetched: events.len(),
            pages,
            truncated,
            decode_failures: batch.failures,
            unresolved_blocks: cache.unresolved_blocks(),
            unresolved_transactions: cache.unresolved_transactions(),
            resume_from,
        };
        info!(
            facilitator = %self.config.facilitator_id,
            events = report.events_fetched,
            kept = report.transfers.len(),
            decode_failures = report.decode_failures,
            truncated = report.truncated,
            "window complete"
        );
        Ok(report)
    }
}

/// Pages come back oldest first, so a capped window has read everything up to
/// its newest block. That block itself may be partial and is read again.
fn resume_after_truncation(
    events: &[RawEvent],
    cache: &ResolutionCache,
    window: &TimeWindow,
) -> Option<u64> {
    let newest = events.iter().map(|e| e.block_number).max()?;
    match cache.block(newest).and_then(Resolution::resolved) {
        Some(block) if block.timestamp > window.since() => Some(block.timestamp),
        Some(block) => {
            warn!(
                block_number = newest,
                timestamp = block.timestamp,
                since = window.since(),
                "capped window made no progress, cursor kept"
            );
            None
        }
        None => {
            warn!(block_number = newest, "newest block unresolved, cursor kept");
            None
        }
    }
}
