//! Retry logic with exponential backoff
//!
//! Wraps outbound provider calls in a bounded retry loop. Two named profiles
//! cover the workspace: [`RetryPolicy::fast`] for market data lookups and
//! [`RetryPolicy::slow`] for AI completions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::Retryable;

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first call
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles each attempt after that
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fast()
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Profile for market data providers: cheap calls, tight loop
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Profile for AI completions: expensive calls, fewer attempts
    pub fn slow() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
        }
    }

    /// Policy with a single attempt and no backoff
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Backoff to sleep after `completed` attempts have failed.
    ///
    /// Doubles per failure: `base`, `2*base`, `4*base`, ...
    fn backoff_after(&self, completed: u32) -> Duration {
        if completed == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(2u32.saturating_pow(completed - 1))
    }

    /// Execute an async operation with retry logic.
    ///
    /// Non-retryable errors are returned immediately; retryable errors are
    /// retried until the attempt budget runs out, with exponential backoff
    /// between attempts. The last error is returned when the budget is spent.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Debug,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(
                "Attempt {}/{} for operation: {}",
                attempt, self.max_attempts, operation_name
            );

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            "Operation '{}' succeeded on attempt {}",
                            operation_name, attempt
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(
                        "Operation '{}' failed with non-retryable error: {:?}",
                        operation_name, e
                    );
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(
                        "Operation '{}' failed after {} attempts: {:?}",
                        operation_name, attempt, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.backoff_after(attempt);
                    warn!(
                        "Operation '{}' failed (attempt {}/{}): {:?}. Retrying in {:?}",
                        operation_name, attempt, self.max_attempts, e, backoff
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(2))
    }

    #[test]
    fn test_profiles() {
        let fast = RetryPolicy::fast();
        assert_eq!(fast.max_attempts, 3);
        assert_eq!(fast.base_delay, Duration::from_secs(1));

        let slow = RetryPolicy::slow();
        assert_eq!(slow.max_attempts, 2);
        assert_eq!(slow.base_delay, Duration::from_secs(2));

        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::fast();

        assert_eq!(policy.backoff_after(0), Duration::ZERO);
        assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_after(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_execute_success_first_try() {
        let attempt_count = Arc::new(Mutex::new(0));
        let count = attempt_count.clone();

        let result = quick(3)
            .execute("test_op", || {
                let count = count.clone();
                async move {
                    *count.lock().await += 1;
                    Ok::<i32, Error>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*attempt_count.lock().await, 1);
    }

    #[tokio::test]
    async fn test_execute_success_after_retry() {
        let attempt_count = Arc::new(Mutex::new(0));
        let count = attempt_count.clone();

        let result = quick(3)
            .execute("test_op", || {
                let count = count.clone();
                async move {
                    let mut current = count.lock().await;
                    *current += 1;
                    if *current < 2 {
                        Err(Error::Connection("reset".to_string()))
                    } else {
                        Ok::<i32, Error>(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(*attempt_count.lock().await, 2);
    }

    #[tokio::test]
    async fn test_execute_spends_exact_attempt_budget() {
        let attempt_count = Arc::new(Mutex::new(0));
        let count = attempt_count.clone();

        let result = quick(3)
            .execute("test_op", || {
                let count = count.clone();
                async move {
                    *count.lock().await += 1;
                    Err::<i32, Error>(Error::Timeout("deadline".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*attempt_count.lock().await, 3);
    }

    #[tokio::test]
    async fn test_execute_non_retryable_stops_immediately() {
        let attempt_count = Arc::new(Mutex::new(0));
        let count = attempt_count.clone();

        let result = quick(3)
            .execute("test_op", || {
                let count = count.clone();
                async move {
                    *count.lock().await += 1;
                    Err::<i32, Error>(Error::NotFound("9999".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(*attempt_count.lock().await, 1);
    }

    #[test]
    fn test_execute_single_attempt_policy() {
        let result = tokio_test::block_on(RetryPolicy::no_retry().execute("test_op", || async {
            Err::<i32, Error>(Error::Server("502".to_string()))
        }));

        assert!(matches!(result, Err(Error::Server(_))));
    }
}
