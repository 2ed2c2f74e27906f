//! Exponential backoff with jitter for backend calls.
//!
//! [`RetryPolicy`] is plain data: the shape of the backoff curve and the
//! attempt bound. [`RetryPolicy::execute`] composes it around any
//! operation that returns `Result<T, BackendError>`.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::BackendError;

/// Retry shape for network-facing calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per retry.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Symmetric jitter as a fraction of the delay (0.2 = ±20%).
    pub jitter: f64,
    /// Deadline for each individual attempt. `None` disables it.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Nominal delay before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retry number `retry` with jitter applied, still capped
    /// at `max_delay`.
    fn jittered_delay(&self, retry: u32) -> Duration {
        let nominal = self.delay_for(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return nominal;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        let secs = (nominal.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `op` until it succeeds, fails fatally, or the attempt budget runs
    /// out.
    ///
    /// Each attempt gets its own `attempt_timeout`; a timed-out attempt is a
    /// retryable [`BackendError::Timeout`]. Fatal errors are returned
    /// unchanged on first sight. When the budget runs out the last error is
    /// wrapped in [`BackendError::Exhausted`].
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(limit)),
                },
                None => op().await,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "backend call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, error = %err, "retry budget exhausted");
                return Err(BackendError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.jittered_delay(attempt);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable backend failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
