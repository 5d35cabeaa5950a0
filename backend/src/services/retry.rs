//! # Backoff Retry
//!
//! Retries read-only ledger operations whose failure reports itself as
//! transient (node unavailable, call timeout). Everything else fails on
//! the first attempt.
//!
//! ```text
//! attempt 1 ──✗(transient)── sleep d ──► attempt 2 ──✗── sleep 2d ──► attempt 3 ──✗──► Err(last)
//!           └─✗(other)──► Err immediately
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::AppConfig;

/// Errors that can tell whether retrying may help.
pub trait Transient {
    /// True when the same request may succeed if tried again later.
    fn is_transient(&self) -> bool;
}

/// Attempt budget and initial delay for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after each failure.
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rpc_retry_attempts,
            Duration::from_millis(config.rpc_retry_delay_ms),
        )
    }

    /// Run `operation` under this policy.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        retry_with_backoff(operation, self.max_attempts, self.initial_delay).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1_000))
    }
}

/// Delay slept after failed attempt number `attempt` (1-based).
pub fn backoff_delay(initial_delay: Duration, attempt: u32) -> Duration {
    if initial_delay.is_zero() {
        return Duration::ZERO;
    }

    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| initial_delay.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// ## Arguments
///
/// * `operation` - Produces a fresh future per attempt
/// * `max_attempts` - Total attempts (values below 1 are treated as 1)
/// * `initial_delay` - Sleep after the first failure; doubled each time
///
/// ## Returns
///
/// The first success, the first non-transient error unchanged, or the
/// last transient error once the attempt budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("RPC operation succeeded after {} retries", attempt - 1);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(initial_delay, attempt);
                warn!(
                    "RPC node unavailable (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("RPC operation failed after {} attempts: {}", attempt, e);
                }
                return Err(e);
            }
        }
    }
}
