use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use super::model::ModelError;

/// Bounded retry with exponential backoff for backend calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Applied to every attempt via `tokio::time::timeout`
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Delay before the next attempt; `attempt` is 1-based and counts the one that just failed
    pub fn backoff_for(&self, attempt: u32, error: &ModelError) -> Duration {
        if let ModelError::RateLimited { retry_after_secs: Some(secs) } = error {
            return Duration::from_secs(*secs).min(self.max_backoff);
        }

        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    /// Timeouts are folded into [`ModelError::Timeout`].
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, (u32, ModelError)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.request_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.backoff_for(attempt, &e);
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        operation_name, attempt, self.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            request_timeout: Duration::from_secs(1),
        };
        let err = ModelError::Timeout;
        assert_eq!(policy.backoff_for(1, &err), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2, &err), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3, &err), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_honours_retry_after() {
        let policy = RetryPolicy::default();
        let err = ModelError::RateLimited { retry_after_secs: Some(7) };
        assert_eq!(policy.backoff_for(1, &err), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ModelError::Http("connection reset".into()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::Timeout)
            })
            .await;

        let (attempts, err) = result.unwrap_err();
        assert_eq!(attempts, 2);
        assert!(matches!(err, ModelError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("unauthorized", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ModelError::Api { status: 401, message: "bad key".into() })
            })
            .await;

        assert_eq!(result.unwrap_err().0, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
