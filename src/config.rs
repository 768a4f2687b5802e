use std::time::Duration;

use clap::Args;

use crate::{
    error::IngestError,
    felt::{Felt, TRANSFER_SELECTOR},
    paginator::{PageLimits, REMOTE_MAX_CHUNK_SIZE},
    retry::RetryProfile,
};

/// Per-run settings, read from flags or the environment.
#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Chain identifier stamped on every record
    #[arg(long, env = "CHAIN_ID", default_value = "SN_MAIN")]
    pub chain_id: String,

    /// Which transport produced the records
    #[arg(long, env = "PROVIDER_ID", default_value = "rpc")]
    pub provider_id: String,

    /// Token contract address (0x...)
    #[arg(long, env = "TOKEN_ADDRESS")]
    pub token_address: Option<String>,

    #[arg(long, env = "TOKEN_DECIMALS", default_value_t = 18)]
    pub token_decimals: u8,

    #[arg(long, env = "FACILITATOR_ID", default_value = "default")]
    pub facilitator_id: String,

    /// Only transfers sent by this address are kept
    #[arg(long, env = "FACILITATOR_ADDRESS")]
    pub facilitator_address: Option<String>,

    #[arg(long, env = "PAGE_SIZE", default_value_t = 1000)]
    pub page_size: u64,

    #[arg(long, env = "MAX_RESULTS", default_value_t = 10_000)]
    pub max_results: usize,

    #[arg(long, env = "MAX_PAGES", default_value_t = 50)]
    pub max_pages: u32,

    /// Concurrent block/transaction lookups
    #[arg(long, env = "CONCURRENCY", default_value_t = 10)]
    pub concurrency: usize,

    #[arg(long, env = "EVENTS_RETRY_ATTEMPTS", default_value_t = 3)]
    pub events_retry_attempts: u32,

    #[arg(long, env = "EVENTS_RETRY_BASE_MS", default_value_t = 1000)]
    pub events_retry_base_ms: u64,

    #[arg(long, env = "EVENTS_RETRY_FACTOR", default_value_t = 2.0)]
    pub events_retry_factor: f64,

    #[arg(long, env = "LOOKUP_RETRY_ATTEMPTS", default_value_t = 2)]
    pub lookup_retry_attempts: u32,

    #[arg(long, env = "LOOKUP_RETRY_BASE_MS", default_value_t = 400)]
    pub lookup_retry_base_ms: u64,

    #[arg(long, env = "LOOKUP_RETRY_FACTOR", default_value_t = 1.5)]
    pub lookup_retry_factor: f64,

    /// Average seconds between blocks, used to estimate the block range
    #[arg(long, env = "BLOCK_INTERVAL_SECS", default_value_t = 30.0)]
    pub block_interval_secs: f64,

    /// Upper bound on one run before it is abandoned
    #[arg(long, env = "MAX_RUN_SECS", default_value_t = 300)]
    pub max_run_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub chain_id: String,
    pub provider_id: String,
    pub token_address: Felt,
    pub token_decimals: u8,
    pub event_selector: Felt,
    pub facilitator_id: String,
    pub facilitator_address: Felt,
    pub limits: PageLimits,
    pub concurrency: usize,
    pub events_retry: RetryProfile,
    pub lookup_retry: RetryProfile,
    pub block_interval: Duration,
    pub max_run_duration: Duration,
}

fn parse_address(name: &str, value: Option<&str>) -> Result<Felt, IngestError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IngestError::config(format!("no {name} configured")))?;
    value
        .parse()
        .map_err(|e| IngestError::config(format!("invalid {name} {value}: {e}")))
}

fn retry_profile(
    name: &str,
    attempts: u32,
    base_ms: u64,
    factor: f64,
) -> Result<RetryProfile, IngestError> {
    if attempts == 0 {
        return Err(IngestError::config(format!("{name} retry attempts must be at least 1")));
    }
    if !factor.is_finite() || factor < 1.0 {
        return Err(IngestError::config(format!("{name} backoff factor must be >= 1.0")));
    }
    Ok(RetryProfile {
        max_attempts: attempts,
        base_delay: Duration::from_millis(base_ms),
        backoff_factor: factor,
    })
}

impl IngestArgs {
    /// Validates everything up front; no network I/O happens before this passes.
    pub fn to_config(&self) -> Result<IngestConfig, IngestError> {
        let facilitator_address =
            parse_address("facilitator address", self.facilitator_address.as_deref())?;
        let token_address = parse_address("token address", self.token_address.as_deref())?;

        if self.page_size == 0 || self.max_results == 0 || self.max_pages == 0 {
            return Err(IngestError::config(
                "page size, max results and max pages must be positive",
            ));
        }
        if self.concurrency == 0 {
            return Err(IngestError::config("concurrency must be positive"));
        }
        if !self.block_interval_secs.is_finite() || self.block_interval_secs <= 0.0 {
            return Err(IngestError::config("block interval must be positive"));
        }
        let block_interval = Duration::try_from_secs_f64(self.block_interval_secs).map_err(|e| {
            IngestError::config(format!("invalid block interval {}: {e}", self.block_interval_secs))
        })?;
        if self.chain_id.trim().is_empty() || self.facilitator_id.trim().is_empty() {
            return Err(IngestError::config("chain id and facilitator id must be set"));
        }

        Ok(IngestConfig {
            chain_id: self.chain_id.clone(),
            provider_id: self.provider_id.clone(),
            token_address,
            token_decimals: self.token_decimals,
            event_selector: *TRANSFER_SELECTOR,
            facilitator_id: self.facilitator_id.clone(),
            facilitator_address,
            limits: PageLimits {
                page_size: self.page_size,
                max_results: self.max_results,
                max_pages: self.max_pages,
                remote_max_chunk_size: REMOTE_MAX_CHUNK_SIZE,
            },
            concurrency: self.concurrency,
            events_retry: retry_profile(
                "events",
                self.events_retry_attempts,
                self.events_retry_base_ms,
                self.events_retry_factor,
            )?,
            lookup_retry: retry_profile(
                "lookup",
                self.lookup_retry_attempts,
                self.lookup_retry_base_ms,
                self.lookup_retry_factor,
            )?,
            block_interval,
            max_run_duration: Duration::from_secs(self.max_run_secs),
        })
    }
}
