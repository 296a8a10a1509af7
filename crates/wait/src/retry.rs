//! Bounded retry for single control-plane calls.
//!
//! Delay before attempt `n + 1` is `base_delay * n`, capped at `max_delay`.
//! Only transient errors are retried; everything else is returned at once.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use keel_kubehub::FetchError;
use metrics::counter;
use tracing::{error, warn};

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool { FetchError::is_transient(self) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(2), max_delay: Duration::from_secs(300) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self { Self { max_attempts, base_delay, ..Self::default() } }

    /// No retries; the first error is final.
    pub fn none() -> Self { Self::new(1, Duration::ZERO) }

    /// Sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration { self.base_delay.saturating_mul(attempt).min(self.max_delay) }
}

/// Run `operation` until it succeeds, fails terminally, or `policy.max_attempts`
/// calls have been made. Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(operation = %operation_name, attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient failure; retrying");
                counter!("keel_retry_total", 1, "operation" => operation_name.to_string());
                tokio::time::sleep(delay).await;
            }
        }
    }
}
