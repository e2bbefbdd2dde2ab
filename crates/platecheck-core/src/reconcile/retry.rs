//! Bounded exponential backoff for publish registration.

use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::errors::PublishError;

/// Retry settings for calls that can fail transiently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; never less than one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): doubling, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails non-transiently, or the
    /// attempts run out.
    ///
    /// Only [`PublishError::is_transient`] failures are retried. Running out
    /// of attempts yields [`PublishError::Exhausted`].
    pub fn run<T, F>(&self, operation_name: &str, mut operation: F) -> Result<T, PublishError>
    where
        F: FnMut() -> Result<T, PublishError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis() as u64,
                            "Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Giving up: {err}"
                    );
                    return Err(PublishError::Exhausted {
                        attempts: attempt,
                        last: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, will keep trying: {err}"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
