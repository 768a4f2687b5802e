use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{IngestError, TransportError},
    felt::Felt,
    models::{BlockMetadata, EventsPage, TransactionMetadata},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsRequest {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Felt,
    pub selectors: Vec<Felt>,
    pub chunk_size: u64,
    pub continuation_token: Option<String>,
}

/// The remote lookups the pipeline depends on. Swapping transport never touches
/// pagination, decoding or filtering.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn get_events(&self, request: &EventsRequest) -> Result<EventsPage, TransportError>;

    async fn get_block(&self, block_number: u64) -> Result<BlockMetadata, TransportError>;

    async fn get_transaction(&self, tx_hash: Felt) -> Result<TransactionMetadata, TransportError>;

    async fn latest_block_number(&self) -> Result<u64, TransportError>;
}

#[derive(Debug, Serialize)]
struct BlockNumberId {
    block_number: u64,
}

#[derive(Debug, Serialize)]
struct EventFilter<'a> {
    from_block: BlockNumberId,
    to_block: BlockNumberId,
    address: Felt,
    keys: Vec<Vec<Felt>>,
    chunk_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GetEventsParams<'a> {
    filter: EventFilter<'a>,
}

#[derive(Debug, Serialize)]
struct GetBlockParams {
    block_id: BlockNumberId,
}

#[derive(Debug, Serialize)]
struct GetTransactionParams {
    transaction_hash: Felt,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockHeader {
    timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TransactionBody {
    #[serde(default)]
    sender_address: Option<Felt>,
}

/// Starknet JSON-RPC over HTTP.
pub struct StarknetRpc {
    provider: Provider<Http>,
}

impl StarknetRpc {
    pub fn connect(rpc_url: &str) -> Result<Self, IngestError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| IngestError::config(format!("invalid rpc url: {e}")))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChainTransport for StarknetRpc {
    async fn get_events(&self, request: &EventsRequest) -> Result<EventsPage, TransportError> {
        let params = GetEventsParams {
            filter: EventFilter {
                from_block: BlockNumberId { block_number: request.from_block },
                to_block: BlockNumberId { block_number: request.to_block },
                address: request.address,
                keys: vec![request.selectors.clone()],
                chunk_size: request.chunk_size,
                continuation_token: request.continuation_token.as_deref(),
            },
        };
        let page: EventsPage = self.provider.request("starknet_getEvents", params).await?;
        debug!(
            from = request.from_block,
            to = request.to_block,
            events = page.events.len(),
            more = page.continuation_token.is_some(),
            "starknet_getEvents"
        );
        Ok(page)
    }

    async fn get_block(&self, block_number: u64) -> Result<BlockMetadata, TransportError> {
        let header: BlockHeader = self
            .provider
            .request(
                "starknet_getBlockWithTxHashes",
                GetBlockParams { block_id: BlockNumberId { block_number } },
            )
            .await?;
        Ok(BlockMetadata { block_number, timestamp: header.timestamp })
    }

    async fn get_transaction(&self, tx_hash: Felt) -> Result<TransactionMetadata, TransportError> {
        let body: TransactionBody = self
            .provider
            .request(
                "starknet_getTransactionByHash",
                GetTransactionParams { transaction_hash: tx_hash },
            )
            .await?;
        let sender_address = body.sender_address.ok_or_else(|| {
            TransportError::Malformed(format!("transaction {tx_hash} has no sender_address"))
        })?;
        Ok(TransactionMetadata { transaction_hash: tx_hash, sender_address })
    }

    async fn latest_block_number(&self) -> Result<u64, TransportError> {
        let number: u64 = self.provider.request("starknet_blockNumber", ()).await?;
        Ok(number)
    }
}
