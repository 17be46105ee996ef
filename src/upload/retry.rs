//! Retry Logic with Exponential Backoff
//!
//! Wraps the single network-calling step of an upload. Only errors the
//! caller classifies as retryable are retried; everything else is returned
//! on the first failure.
//!
//! ## Schedule
//!
//! ```text
//! Attempt 1: immediate
//! Attempt 2: wait up to base * factor        (10s with defaults)
//! Attempt 3: wait up to base * factor * 2    (20s)
//! Attempt 4: wait up to base * factor * 4    (40s)
//! Attempt 5: wait up to base * factor * 8    (60s cap)
//! ```
//!
//! Waits use full jitter: the actual delay is drawn uniformly from
//! `[0, backoff]`.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy configuration for exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Unit of the backoff schedule
    pub base_delay: Duration,
    /// Multiplier applied to the first wait
    pub factor: u32,
    /// Upper bound for any single wait
    pub max_delay: Duration,
    /// Draw each wait uniformly from `[0, backoff]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 10,
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget with millisecond waits and no jitter
    pub fn test() -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..Self::default()
        }
    }

    /// Never retry
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Upper bound of the wait after failed attempt `attempt` (1-indexed)
    pub fn backoff(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1, "Precondition: attempts are 1-indexed");

        let doublings = attempt.saturating_sub(1).min(31);
        let multiplier = self.factor.saturating_mul(1u32 << doublings);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn wait(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter && !backoff.is_zero() {
            let ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64);
            Duration::from_millis(ms)
        } else {
            backoff
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) || attempt >= max_attempts {
                    return Err(err);
                }

                warn!(
                    error = %err,
                    "Error detected communicating with object storage, triggering backoff: {} try",
                    attempt
                );
                sleep(policy.wait(attempt)).await;
                attempt += 1;
            }
        }
    }
}
