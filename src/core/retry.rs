//! Retry policy and the single-unit-of-work retry executor.
//!
//! Each attempt runs under a timeout; a run that does not settle in time is
//! counted as a failed attempt. The underlying future is dropped at the await
//! point, not cancelled remotely, so actions must be safe to abandon.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry policy for failed attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Multiplier applied to the delay after each further failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy that performs exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt` (1-indexed).
    ///
    /// Defined for attempt >= 2 as `backoff_ms * backoff_multiplier^(attempt - 2)`.
    /// The first attempt has no delay.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let delay = self.backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 2);
        Duration::from_millis(delay as u64)
    }

    /// Check if another attempt is allowed after `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `op` under `op_timeout`, retrying per `policy`.
///
/// Returns the final result together with the number of attempts spent.
/// A timed-out attempt fails with a timeout error and counts against the
/// attempt budget.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_timeout: Duration,
    mut op: F,
) -> (Result<T>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(op_timeout, op()).await {
            Ok(settled) => settled,
            Err(_) => Err(anyhow!("operation timed out after {:?}", op_timeout)),
        };

        match result {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => {
                if !policy.should_retry(attempt) {
                    return (Err(e), attempt);
                }

                let delay = policy.delay_before_attempt(attempt + 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
