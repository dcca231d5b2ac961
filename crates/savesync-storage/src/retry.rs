//! Exponential backoff for transient transfer failures.
//!
//! The schedule (`RetryPolicy::delay_for`) and the retry decision
//! (`RetryPolicy::next_delay`) are pure; `retry_with_backoff` only adds the
//! sleeping, logging and cancellation around them.

use std::future::Future;
use std::time::Duration;

use savesync_core::Config;
use tokio_util::sync::CancellationToken;

use crate::{StorageError, StorageResult};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: MAX_RETRY_DELAY,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to wait before retrying after `err` failed attempt `attempt`
    /// (0-based), or `None` when the error should be surfaced.
    pub fn next_delay(&self, attempt: u32, err: &StorageError) -> Option<Duration> {
        if err.is_retryable() && attempt < self.max_retries {
            Some(self.delay_for(attempt))
        } else {
            None
        }
    }
}

/// Run `op` until it succeeds, fails permanently or runs out of attempts.
///
/// `op` receives the 0-based attempt number. Retryable failures on the last
/// attempt become `StorageError::RetriesExhausted`. Cancellation interrupts
/// both the attempt and the backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> StorageResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            result = op(attempt) => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match policy.next_delay(attempt, &err) {
            Some(delay) => {
                tracing::warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts(),
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient storage failure, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            None if err.is_retryable() => {
                tracing::error!(
                    operation = %operation,
                    attempts = attempt + 1,
                    error = %err,
                    "Giving up after repeated transient failures"
                );
                return Err(StorageError::RetriesExhausted {
                    attempts: attempt + 1,
                    last_error: err.to_string(),
                });
            }
            None => return Err(err),
        }
    }
}
