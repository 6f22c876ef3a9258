//! Bounded retry with exponential backoff for cloud store operations.
//!
//! Retries are an explicit attempt loop, never recursion: only errors the
//! `CloudError` taxonomy marks retryable are attempted again, and local
//! work never passes through here.

use std::future::Future;
use std::time::Duration;
use tracing::warn;
use wincloud_core::cloud::CloudResult;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first failure (default: 3).
    pub max_retries: u32,
    /// First backoff delay (default: 500ms).
    pub initial_backoff: Duration,
    /// Backoff ceiling (default: 10s).
    pub max_backoff: Duration,
    /// Exponential multiplier (default: 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config with `max_retries` attempts and the default backoff curve.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Executes operations under a retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Executor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, retrying transient failures with exponential backoff.
    /// Non-retryable errors (not-found, unauthorized, protocol) fail
    /// immediately; once attempts are exhausted the last error is returned.
    pub async fn execute<F, Fut, T>(&self, what: &str, operation: F) -> CloudResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                    let backoff = self.compute_backoff(attempt - 1);
                    warn!(
                        op = what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff`.
    fn compute_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.initial_backoff.as_millis() as f64;
        let computed = base * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = computed.min(self.config.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wincloud_core::cloud::CloudError;

    fn fast_executor(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
        })
    }

    #[test]
    fn defaults_match_documented_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff, Duration::from_millis(500));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let exec = RetryExecutor::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        });
        assert_eq!(exec.compute_backoff(0), Duration::from_millis(100));
        assert_eq!(exec.compute_backoff(1), Duration::from_millis(200));
        assert_eq!(exec.compute_backoff(2), Duration::from_millis(400));
        assert_eq!(exec.compute_backoff(3), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result = fast_executor(3)
            .execute("upload", move || {
                let calls = Arc::clone(&calls2);
                async move {
                    if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(CloudError::Transient("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhausts_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result: CloudResult<()> = fast_executor(3)
            .execute("download", move || {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(CloudError::Transient("timeout".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(CloudError::Transient(_))));
        // 1 initial + 3 retries
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn permanent_errors_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = Arc::clone(&calls);
        let result: CloudResult<()> = fast_executor(3)
            .execute("download", move || {
                let calls = Arc::clone(&calls2);
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Err(CloudError::Unauthorized("expired token".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(CloudError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
