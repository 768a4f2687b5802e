//! Windowed ingestion of Starknet ERC20 `Transfer` events.
//!
//! One run takes a `(since, now)` window, estimates the matching block range,
//! pages through the token's event log, resolves the blocks and transactions
//! those events belong to, decodes both on-chain layouts of the event, and keeps
//! the transfers sent by the configured facilitator address.
//!
//! # Components
//!
//! - [`retry::RetryExecutor`]: backoff on rate-limited calls
//! - [`scheduler::BoundedScheduler`]: keyed work under a concurrency ceiling
//! - [`paginator::EventPaginator`]: continuation-token paging with caps
//! - [`cache::ResolutionCache`]: per-window block and transaction metadata
//! - [`decoder`]: raw event plus context into a [`models::NormalizedTransfer`]
//! - [`filter`]: facilitator allow-list
//! - [`indexer::WindowOrchestrator`]: drives one window end to end
//!
//! The node is reached through [`transport::ChainTransport`]; [`db`] and [`api`]
//! are the SQLite store and read API used by the binary.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod felt;
pub mod filter;
pub mod indexer;
pub mod models;
pub mod paginator;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod window;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{IngestArgs, IngestConfig};
pub use error::{DecodeError, IngestError, TransportError};
pub use felt::Felt;
pub use indexer::{WindowOrchestrator, WindowReport, WindowState};
pub use models::{NormalizedTransfer, RawEvent};
pub use transport::{ChainTransport, StarknetRpc};
pub use window::TimeWindow;
