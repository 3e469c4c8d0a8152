//! Bounded exponential backoff shared by the worker and the inline paths.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use linkrank_core::{defaults, Result};

/// Retry schedule for a stage: `initial × 2^(attempt−1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before a stage is marked failed. Always at least 1.
    pub max_attempts: i32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::STAGE_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Create policy from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `STAGE_MAX_ATTEMPTS` | `3` | Attempts per stage before FAILED |
    /// | `RETRY_INITIAL_BACKOFF_MS` | `500` | Delay before the second attempt |
    /// | `RETRY_MAX_BACKOFF_MS` | `30000` | Upper bound on any delay |
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("STAGE_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::STAGE_MAX_ATTEMPTS);
        let initial_backoff_ms = std::env::var("RETRY_INITIAL_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::RETRY_INITIAL_BACKOFF_MS);
        let max_backoff_ms = std::env::var("RETRY_MAX_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::RETRY_MAX_BACKOFF_MS);

        Self::default()
            .with_max_attempts(max_attempts)
            .with_backoff(initial_backoff_ms, max_backoff_ms)
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms.max(initial_ms);
        self
    }

    /// Delay after the given 1-based attempt failed.
    pub fn backoff(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 32) as u32;
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. The last error is returned.
    pub async fn retry_transient<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        subsystem = "jobs",
                        component = "retry",
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
