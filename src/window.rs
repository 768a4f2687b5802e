use std::time::Duration;

use crate::error::IngestError;

/// Wall-clock bounds of one run, unix seconds, `since < now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    since: u64,
    now: u64,
}

impl TimeWindow {
    pub fn new(since: u64, now: u64) -> Result<Self, IngestError> {
        if since >= now {
            return Err(IngestError::config(format!("empty window: since {since} >= now {now}")));
        }
        Ok(Self { since, now })
    }

    /// Window from a stored cursor. `None` when the cursor already reached `now`,
    /// which means there is nothing left to ingest.
    pub fn pending(start: u64, now: u64) -> Option<Self> {
        (start < now).then_some(Self { since: start, now })
    }

    pub fn since(&self) -> u64 {
        self.since
    }

    pub fn now(&self) -> u64 {
        self.now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub number: u64,
    pub timestamp: u64,
}

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

/// Maps a time window onto blocks. Implementations are heuristics; being off
/// by a few blocks is expected.
pub trait BlockRangeEstimator: Send + Sync {
    fn estimate(&self, window: &TimeWindow, head: BlockHead) -> BlockRange;
}

/// Assumes blocks arrive every `interval` on average, counting back from head.
#[derive(Debug, Clone, Copy)]
pub struct AverageBlockInterval {
    interval: Duration,
}

impl AverageBlockInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    fn blocks_spanning(&self, seconds: u64, round_up: bool) -> u64 {
        let per_block = self.interval.as_secs_f64();
        if per_block <= 0.0 {
            return 0;
        }
        let blocks = seconds as f64 / per_block;
        if round_up {
            blocks.ceil() as u64
        } else {
            blocks.floor() as u64
        }
    }
}

impl BlockRangeEstimator for AverageBlockInterval {
    fn estimate(&self, window: &TimeWindow, head: BlockHead) -> BlockRange {
        let to_back = self.blocks_spanning(head.timestamp.saturating_sub(window.now()), false);
        let from_back = self.blocks_spanning(head.timestamp.saturating_sub(window.since()), true);
        let to_block = head.number.saturating_sub(to_back);
        let from_block = head.number.saturating_sub(from_back).min(to_block);
        BlockRange { from_block, to_block }
    }
}
