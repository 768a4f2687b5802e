use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::felt::Felt;

/// One entry of the node's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub from_address: Felt,
    pub keys: Vec<Felt>,
    pub data: Vec<Felt>,
    pub block_number: u64,
    pub transaction_hash: Felt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsPage {
    pub events: Vec<RawEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMetadata {
    pub block_number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub transaction_hash: Felt,
    pub sender_address: Felt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTransfer {
    pub token_address: String,
    pub submitter: String,
    pub sender: String,
    pub recipient: String,
    pub amount: U256,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: String,
    pub chain_id: String,
    pub provider: String,
    pub decimals: u8,
    pub facilitator_id: String,
    /// Ordinal among the events of the same transaction in this batch.
    pub event_index: u64,
}

/// A persisted transfer as served back by `query` and the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredTransfer {
    pub chain_id: String,
    pub tx_hash: String,
    pub event_index: u64,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub token: String,
    pub submitter: String,
    pub sender: String,
    pub recipient: String,
    pub amount: String, // U256 decimal string, raw token units
    pub decimals: u8,
    pub provider: String,
    pub facilitator_id: String,
}
