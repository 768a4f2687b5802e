use tracing::{debug, info, warn};

use crate::{
    error::IngestError,
    felt::Felt,
    models::RawEvent,
    retry::RetryExecutor,
    transport::{ChainTransport, EventsRequest},
};

/// Largest `chunk_size` Starknet nodes accept for `starknet_getEvents`.
pub const REMOTE_MAX_CHUNK_SIZE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub page_size: u64,
    pub max_results: usize,
    pub max_pages: u32,
    pub remote_max_chunk_size: u64,
}

impl PageLimits {
    pub fn chunk_size(&self) -> u64 {
        self.page_size.min(self.remote_max_chunk_size).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exhausted,
    ResultCap,
    PageCap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub events: Vec<RawEvent>,
    pub pages: u32,
    pub stop: StopReason,
}

impl Pagination {
    /// A cap stopped pagination while the node still had more events.
    pub fn is_truncated(&self) -> bool {
        self.stop != StopReason::Exhausted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Felt,
    pub selector: Felt,
}

pub struct EventPaginator<'a, T: ?Sized> {
    transport: &'a T,
    retry: RetryExecutor,
    limits: PageLimits,
}

impl<'a, T: ChainTransport + ?Sized> EventPaginator<'a, T> {
    pub fn new(transport: &'a T, retry: RetryExecutor, limits: PageLimits) -> Self {
        Self { transport, retry, limits }
    }

    pub async fn fetch(&self, query: &EventQuery) -> Result<Pagination, IngestError> {
        let mut request = EventsRequest {
            from_block: query.from_block,
            to_block: query.to_block,
            address: query.address,
            selectors: vec![query.selector],
            chunk_size: self.limits.chunk_size(),
            continuation_token: None,
        };
        let mut events = Vec::new();
        let mut pages = 0u32;

        let stop = loop {
            let page = self
                .retry
                .execute("starknet_getEvents", || self.transport.get_events(&request))
                .await
                .map_err(|source| IngestError::Remote { operation: "get_events", source })?
                .ok_or(IngestError::RetryExhausted("get_events"))?;
            pages += 1;
            debug!(page = pages, events = page.events.len(), "fetched events page");
            events.extend(page.events);

            let Some(token) = page.continuation_token else {
                break StopReason::Exhausted;
            };
            if events.len() >= self.limits.max_results {
                break StopReason::ResultCap;
            }
            if pages >= self.limits.max_pages {
                break StopReason::PageCap;
            }
            request.continuation_token = Some(token);
        };

        if events.len() > self.limits.max_results {
            events.truncate(self.limits.max_results);
            if stop == StopReason::Exhausted {
                warn!(
                    cap = self.limits.max_results,
                    from = query.from_block,
                    to = query.to_block,
                    "pagination truncated: result cap hit on the last page"
                );
                return Ok(Pagination { events, pages, stop: StopReason::ResultCap });
            }
        }

        match stop {
            StopReason::Exhausted => {
                info!(pages, events = events.len(), "event log exhausted");
            }
            StopReason::ResultCap | StopReason::PageCap => {
                warn!(
                    reason = ?stop,
                    pages,
                    events = events.len(),
                    from = query.from_block,
                    to = query.to_block,
                    "pagination truncated: more events available but not fetched"
                );
            }
        }
        Ok(Pagination { events, pages, stop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::TransportError,
        retry::RetryProfile,
        test_utils::{transfer_event, MockTransport},
    };

    fn limits(max_results: usize, max_pages: u32) -> PageLimits {
        PageLimits {
            page_size: 2,
            max_results,
            max_pages,
            remote_max_chunk_size: REMOTE_MAX_CHUNK_SIZE,
        }
    }

    fn paginator(
        transport: &MockTransport,
        limits: PageLimits,
    ) -> EventPaginator<'_, MockTransport> {
        EventPaginator::new(transport, RetryExecutor::new(RetryProfile::conservative()), limits)
    }

    fn query() -> EventQuery {
        EventQuery {
            from_block: 100,
            to_block: 200,
            address: Felt::from(0x70u64),
            selector: *crate::felt::TRANSFER_SELECTOR,
        }
    }

    fn page_of(n: u64, base: u64) -> Vec<RawEvent> {
        (0..n).map(|i| transfer_event(base + i, base + i)).collect()
    }

    #[tokio::test]
    async fn follows_continuation_tokens_until_exhausted() {
        let transport = MockTransport::new()
            .with_page(page_of(2, 0), Some("a"))
            .with_page(page_of(2, 10), Some("b"))
            .with_page(page_of(2, 20), Some("c"))
            .with_page(page_of(1, 30), None);
        let paginator = paginator(&transport, limits(100, 10));

        let result = paginator.fetch(&query()).await.unwrap();

        assert_eq!(transport.get_events_calls(), 4);
        assert_eq!(result.pages, 4);
        assert_eq!(result.events.len(), 7);
        assert_eq!(result.stop, StopReason::Exhausted);
        assert!(!result.is_truncated());

        let requests = transport.events_requests();
        assert_eq!(requests[0].continuation_token, None);
        assert_eq!(requests[1].continuation_token.as_deref(), Some("a"));
        assert_eq!(requests[3].continuation_token.as_deref(), Some("c"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn result_cap_stops_early_and_flags_truncation() {
        let transport = MockTransport::new()
            .with_page(page_of(2, 0), Some("a"))
            .with_page(page_of(2, 10), Some("b"))
            .with_page(page_of(2, 20), None);
        let paginator = paginator(&transport, limits(3, 10));

        let result = paginator.fetch(&query()).await.unwrap();

        assert_eq!(transport.get_events_calls(), 2);
        assert_eq!(result.events.len(), 3);
        assert_eq!(result.stop, StopReason::ResultCap);
        assert!(result.is_truncated());
        assert!(logs_contain("pagination truncated"));
    }

    #[tokio::test]
    async fn page_cap_stops_with_token_outstanding() {
        let transport = MockTransport::new()
            .with_page(page_of(2, 0), Some("a"))
            .with_page(page_of(2, 10), Some("b"))
            .with_page(page_of(2, 20), None);
        let paginator = paginator(&transport, limits(100, 2));

        let result = paginator.fetch(&query()).await.unwrap();

        assert_eq!(transport.get_events_calls(), 2);
        assert_eq!(result.stop, StopReason::PageCap);
        assert!(result.is_truncated());
    }

    #[tokio::test]
    async fn reaching_cap_exactly_without_token_is_not_truncated() {
        let transport = MockTransport::new().with_page(page_of(3, 0), None);
        let paginator = paginator(&transport, limits(3, 1));

        let result = paginator.fetch(&query()).await.unwrap();

        assert_eq!(result.stop, StopReason::Exhausted);
        assert_eq!(result.events.len(), 3);
    }

    #[test]
    fn chunk_size_never_exceeds_remote_maximum() {
        let limits = PageLimits {
            page_size: 5000,
            max_results: 10,
            max_pages: 1,
            remote_max_chunk_size: REMOTE_MAX_CHUNK_SIZE,
        };
        assert_eq!(limits.chunk_size(), REMOTE_MAX_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn sends_capped_chunk_size() {
        let transport = MockTransport::new().with_page(vec![], None);
        let limits = PageLimits {
            page_size: 10_000,
            max_results: 10,
            max_pages: 1,
            remote_max_chunk_size: 1024,
        };
        paginator(&transport, limits).fetch(&query()).await.unwrap();

        assert_eq!(transport.events_requests()[0].chunk_size, 1024);
    }

    #[tokio::test]
    async fn non_rate_limit_failure_aborts() {
        let transport =
            MockTransport::new().with_page_error(TransportError::Rpc("connection reset".into()));
        let paginator = paginator(&transport, limits(10, 10));

        let err = paginator.fetch(&query()).await.unwrap_err();

        assert!(matches!(err, IngestError::Remote { operation: "get_events", .. }));
        assert_eq!(transport.get_events_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_aborts() {
        let transport = MockTransport::new()
            .with_page_error(TransportError::Rpc("HTTP 429".into()))
            .with_page_error(TransportError::Rpc("HTTP 429".into()))
            .with_page_error(TransportError::Rpc("HTTP 429".into()));
        let paginator = paginator(&transport, limits(10, 10));

        let err = paginator.fetch(&query()).await.unwrap_err();

        assert!(matches!(err, IngestError::RetryExhausted("get_events")));
        assert_eq!(transport.get_events_calls(), 3);
    }
}
