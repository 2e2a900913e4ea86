//! Retry policy with a fixed backoff schedule
//!
//! One initial attempt plus up to five retries, with delays of 1, 2, 4,
//! 8 and 16 seconds before each retry. A rate-limit response carrying a
//! Retry-After hint overrides the scheduled delay for that retry only.

use std::time::Duration;

use tracing::warn;

use crate::error::{RetryableError, SyncError};

/// Delay before the k-th retry, in seconds
const BACKOFF_SCHEDULE_SECS: [u64; 5] = [1, 2, 4, 8, 16];

/// Retry policy for page fetches
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: BACKOFF_SCHEDULE_SECS.len(),
        }
    }
}

impl RetryPolicy {
    /// Build a policy with fewer retries than the full schedule, mainly
    /// for tests
    pub fn with_max_retries(max_retries: usize) -> Self {
        Self {
            max_retries: max_retries.min(BACKOFF_SCHEDULE_SECS.len()),
        }
    }

    /// Run `operation`, retrying transient failures per the schedule.
    ///
    /// Permanent failures are returned immediately. When the schedule is
    /// exhausted the last transient error is returned.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, SyncError>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // unwrap is safe: attempt > 0 implies a recorded error
                let delay = retry_delay(last_error.as_ref().unwrap(), attempt - 1);
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        error = %err,
                        "transient failure"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        // max_retries is at least 0 and the loop body ran at least once
        Err(last_error.expect("retry loop recorded no error"))
    }
}

/// Delay before the retry following `error`, where `index` counts retries
/// from zero. A server-sent Retry-After hint takes precedence.
fn retry_delay(error: &SyncError, index: usize) -> Duration {
    if let SyncError::RateLimited(hint) = error {
        if *hint > 0 {
            return Duration::from_secs(*hint);
        }
    }
    Duration::from_secs(BACKOFF_SCHEDULE_SECS[index])
}
