//! Bounded exponential backoff for remote storage operations.

use bridge_traits::error::{StorageError, StorageResult};
use core_runtime::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retries `Transient` and `RateLimited` failures; everything else is
/// returned on the first occurrence.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the retry following failed attempt number `attempt`
    /// (1-based). Never shorter than `previous` and never above `max_delay`.
    pub fn compute_delay(
        &self,
        attempt: u32,
        error: &StorageError,
        previous: Duration,
    ) -> Duration {
        let max = self.config.max_delay;
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self
            .config
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(max);

        let mut delay = if self.config.jitter {
            let spread = base.as_millis() as u64 / 4;
            let extra = if spread > 0 {
                rand::thread_rng().gen_range(0..=spread)
            } else {
                0
            };
            (base + Duration::from_millis(extra)).min(max)
        } else {
            base
        };

        if let StorageError::RateLimited { retry_after } = error {
            delay = delay.max(self.config.rate_limit_floor);
            if let Some(hint) = retry_after {
                delay = delay.max(*hint);
            }
            delay = delay.min(max);
        }

        delay.max(previous).min(max)
    }

    /// Run `operation` until it succeeds, fails permanently, or
    /// `max_attempts` is exhausted. The last error is returned.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let mut attempt = 0;
        let mut previous = Duration::ZERO;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = self.compute_delay(attempt, &error, previous);
                    warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retryable storage failure"
                    );
                    sleep(delay).await;
                    previous = delay;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(op = op_name, attempts = attempt, error = %error, "Retries exhausted");
                    }
                    return Err(error);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
