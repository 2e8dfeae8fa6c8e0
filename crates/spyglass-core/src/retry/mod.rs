//! Exponential backoff retry with a delay cap.
//!
//! Attempt `n` (0-based) that fails waits
//! `min(initial_delay * multiplier^n, max_delay)` before the next try.
//! With the defaults (100ms, x2, capped at 1s) the delay sequence is
//! 100, 200, 400, 800, 1000, 1000, ...
//!
//! The error surfaced after exhaustion is the operation's own last error,
//! not a wrapper around it; callers keep their typed errors.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Backoff parameters. Deserializable so the retry section of the app
/// config maps straight onto it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; `3` means up to 4 executions.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt`
    /// (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Runs `operation`, retrying every failure until the policy is
    /// exhausted. The default predicate: everything is retryable.
    pub async fn retry<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_with(operation, |_| true).await
    }

    /// Runs `operation`, retrying failures for which `should_retry` holds.
    ///
    /// The last error propagates once retries are exhausted or the
    /// predicate declines.
    pub async fn retry_with<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        mut should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !should_retry(&error) {
                        return Err(error);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
