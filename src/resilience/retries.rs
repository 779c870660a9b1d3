//! Retry policy shared by confirmation polling and stream reconnection.
//!
//! # Responsibilities
//! - Bound the number of attempts
//! - Compute the delay between attempts (fixed or exponential + jitter)
//! - Drive a fallible async operation until it succeeds or the budget is spent

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::{BackoffKind, ConfirmationConfig, SubscriptionConfig};
use crate::resilience::backoff::exponential_delay;

/// Delay shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

/// Attempt budget plus delay shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    /// Three attempts, two seconds apart.
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Same delay shape, different budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => exponential_delay(attempt, base, max),
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is exhausted.
    ///
    /// The closure receives the 1-based attempt number. The last error is returned.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(operation, attempt, error = %e, "Retry budget exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl From<&ConfirmationConfig> for RetryPolicy {
    fn from(config: &ConfirmationConfig) -> Self {
        match config.backoff {
            BackoffKind::Fixed => {
                RetryPolicy::fixed(config.max_attempts, Duration::from_millis(config.delay_ms))
            }
            BackoffKind::Exponential => RetryPolicy::exponential(
                config.max_attempts,
                Duration::from_millis(config.delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
        }
    }
}

impl From<&SubscriptionConfig> for RetryPolicy {
    fn from(config: &SubscriptionConfig) -> Self {
        RetryPolicy::exponential(
            config.reconnect_attempts,
            Duration::from_millis(config.reconnect_base_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
        )
    }
}
