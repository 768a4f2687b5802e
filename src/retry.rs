use std::{future::Future, time::Duration};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::TransportError;

const RATE_LIMIT_STATUS: &str = "429";

const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "too many requests",
    "rate limit",
    "-32005",
    "compute units",
];

pub fn is_rate_limited(error: &str) -> bool {
    let error = error.to_ascii_lowercase();
    // The status must stand alone; hashes and block numbers contain "429" too.
    error.split(|c: char| !c.is_ascii_alphanumeric()).any(|word| word == RATE_LIMIT_STATUS)
        || RATE_LIMIT_SIGNATURES.iter().any(|sig| error.contains(sig))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryProfile {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryProfile {
    /// Few attempts in flight, heavy calls (event pages).
    pub fn conservative() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(1000), backoff_factor: 2.0 }
    }

    /// Many attempts in flight, cheap calls (block and transaction lookups).
    pub fn aggressive() -> Self {
        Self { max_attempts: 2, base_delay: Duration::from_millis(400), backoff_factor: 1.5 }
    }

    /// Delay before retry number `attempt_index` (0-based).
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let scaled = base_ms * self.backoff_factor.powi(attempt_index as i32);
        Duration::from_millis(scaled.round() as u64)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    profile: RetryProfile,
}

impl RetryExecutor {
    pub fn new(profile: RetryProfile) -> Self {
        Self { profile }
    }

    /// Runs `call` until it succeeds, fails with a non rate-limit error, or runs
    /// out of attempts. Exhaustion is `Ok(None)`, not an error.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<Option<T>, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.profile.max_attempts.max(1);
        for attempt in 0..max_attempts {
            match call().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if is_rate_limited(&e.to_string()) => {
                    if attempt + 1 >= max_attempts {
                        warn!(operation, attempts = max_attempts, error = %e, "retries exhausted");
                        break;
                    }
                    let delay = self.profile.delay_for(attempt);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}
