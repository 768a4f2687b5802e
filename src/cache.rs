use std::{collections::HashMap, sync::Arc};

use tracing::{info, warn};

use crate::{
    felt::Felt,
    models::{BlockMetadata, TransactionMetadata},
    retry::RetryExecutor,
    scheduler::BoundedScheduler,
    transport::ChainTransport,
};

/// Outcome of looking a key up. A key that was never asked for has no entry at
/// all, which is a different thing from `Unresolved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    Unresolved,
}

impl<T> Resolution<T> {
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Resolution::Resolved(v) => Some(v),
            Resolution::Unresolved => None,
        }
    }
}

/// Block and transaction metadata for one window. Each key is written once.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    blocks: HashMap<u64, Resolution<BlockMetadata>>,
    transactions: HashMap<Felt, Resolution<TransactionMetadata>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, block_number: u64) -> Option<&Resolution<BlockMetadata>> {
        self.blocks.get(&block_number)
    }

    pub fn transaction(&self, tx_hash: &Felt) -> Option<&Resolution<TransactionMetadata>> {
        self.transactions.get(tx_hash)
    }

    pub fn unresolved_blocks(&self) -> usize {
        self.blocks.values().filter(|r| matches!(r, Resolution::Unresolved)).count()
    }

    pub fn unresolved_transactions(&self) -> usize {
        self.transactions.values().filter(|r| matches!(r, Resolution::Unresolved)).count()
    }

    /// Looks up every distinct block number not already cached.
    pub async fn resolve_blocks<T>(
        &mut self,
        transport: Arc<T>,
        retry: RetryExecutor,
        scheduler: BoundedScheduler,
        block_numbers: impl IntoIterator<Item = u64>,
    ) -> &HashMap<u64, Resolution<BlockMetadata>>
    where
        T: ChainTransport + ?Sized + 'static,
    {
        let missing: Vec<u64> =
            block_numbers.into_iter().filter(|n| !self.blocks.contains_key(n)).collect();
        let start = std::time::Instant::now();

        let fetched = scheduler
            .run(missing.iter().copied(), |block_number| {
                let transport = transport.clone();
                async move {
                    match retry.execute("get_block", || transport.get_block(block_number)).await {
                        Ok(Some(block)) => Resolution::Resolved(block),
                        Ok(None) => {
                            warn!(block_number, "retries exhausted for block lookup");
                            Resolution::Unresolved
                        }
                        Err(e) => {
                            warn!(block_number, error = %e, "block lookup failed");
                            Resolution::Unresolved
                        }
                    }
                }
            })
            .await;

        let fetched_count = fetched.len();
        self.blocks.extend(fetched);
        for block_number in missing {
            self.blocks.entry(block_number).or_insert(Resolution::Unresolved);
        }
        info!(
            fetched = fetched_count,
            unresolved = self.unresolved_blocks(),
            elapsed = ?start.elapsed(),
            "resolved blocks"
        );
        &self.blocks
    }

    /// Looks up every distinct transaction hash not already cached.
    pub async fn resolve_transactions<T>(
        &mut self,
        transport: Arc<T>,
        retry: RetryExecutor,
        scheduler: BoundedScheduler,
        tx_hashes: impl IntoIterator<Item = Felt>,
    ) -> &HashMap<Felt, Resolution<TransactionMetadata>>
    where
        T: ChainTransport + ?Sized + 'static,
    {
        let missing: Vec<Felt> =
            tx_hashes.into_iter().filter(|h| !self.transactions.contains_key(h)).collect();
        let start = std::time::Instant::now();

        let fetched = scheduler
            .run(missing.iter().copied(), |tx_hash| {
                let transport = transport.clone();
                async move {
                    let lookup = || transport.get_transaction(tx_hash);
                    match retry.execute("get_transaction", lookup).await {
                        Ok(Some(tx)) => Resolution::Resolved(tx),
                        Ok(None) => {
                            warn!(tx_hash = %tx_hash, "retries exhausted for transaction lookup");
                            Resolution::Unresolved
                        }
                        Err(e) => {
                            warn!(tx_hash = %tx_hash, error = %e, "transaction lookup failed");
                            Resolution::Unresolved
                        }
                    }
                }
            })
            .await;

        let fetched_count = fetched.len();
        self.transactions.extend(fetched);
        for tx_hash in missing {
            self.transactions.entry(tx_hash).or_insert(Resolution::Unresolved);
        }
        info!(
            fetched = fetched_count,
            unresolved = self.unresolved_transactions(),
            elapsed = ?start.elapsed(),
            "resolved transactions"
        );
        &self.transactions
    }
}
