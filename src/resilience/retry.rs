//! Retry with exponential backoff.
//!
//! Delays are `base_delay * 2^(attempt-1)` after the failed attempt `attempt`
//! (1-indexed). Jitter is off unless configured, so timings stay predictable.

use crate::config::RetryConfig;
use crate::error::AccessError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Cap on the backoff exponent so large attempt counts cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; 0 is treated as 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: 0.0,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
            .with_jitter(config.jitter)
    }

    /// Scale each delay by a random factor in `[1 - jitter/2, 1 + jitter/2]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Deterministic backoff after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1u32 << shift)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen::<f64>() * self.jitter;
        delay.mul_f64(1.0 + spread - self.jitter / 2.0)
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// Non-retryable errors are returned as-is on the attempt that produced them.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, AccessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AccessError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(attempt, error = %e, "retry budget exhausted");
                    return Err(AccessError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.jittered(self.delay_for(attempt));
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// One-shot form of [`RetryPolicy::execute`].
pub async fn retry_with_backoff<T, F, Fut>(
    operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, AccessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AccessError>>,
{
    RetryPolicy::new(max_attempts, base_delay).execute(operation).await
}
