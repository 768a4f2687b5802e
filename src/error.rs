use thiserror::Error;

/// Failures from the remote node.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<ethers::providers::ProviderError> for TransportError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        TransportError::Rpc(err.to_string())
    }
}

/// Errors that abort a whole window. Everything else is absorbed with a
/// fallback and a log entry.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("remote failure during {operation}: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: TransportError,
    },
    #[error("retries exhausted during {0}")]
    RetryExhausted(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }

    /// Whether the external scheduler may retry the same window on its next run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Remote { .. } | IngestError::RetryExhausted(_))
    }
}

/// Why a single event was skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("event carries no keys")]
    NoKeys,
    #[error("unexpected selector {0}")]
    UnexpectedSelector(String),
    #[error("indexed transfer needs 2 data felts, got {0}")]
    IndexedTooShort(usize),
    #[error("packed transfer needs 4 data felts, got {0}")]
    PackedTooShort(usize),
    #[error("amount high part {0} does not fit in 128 bits")]
    AmountOverflow(String),
    #[error("block {0} was never looked up")]
    BlockNotLookedUp(u64),
    #[error("transaction {0} was never looked up")]
    TransactionNotLookedUp(String),
}
