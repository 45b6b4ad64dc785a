//! Bounded retry with exponential backoff for collaborator calls.
//!
//! Retries live at the HTTP-adapter boundary only; pipeline stages never
//! re-run a stage.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
        )
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, `retryable` rejects the error, or the
    /// attempt budget is spent. Backoff doubles after every failure.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    tracing::warn!(
                        "{what} failed (attempt {attempt}/{}): {e}; retrying in {}ms",
                        self.max_attempts,
                        backoff.as_millis()
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<u32, String> = policy
            .run("flaky", |_| true, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("boom".to_string())
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run("down", |_| true, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run("not found", |e: &String| e != "404", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("404".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
