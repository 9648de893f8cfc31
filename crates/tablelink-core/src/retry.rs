//! Bounded retry with exponential backoff for transient transport errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::RelayError;

/// Retry budget for one store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Runs `operation`, retrying only `RelayError::Transport` failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once the budget is spent, or the first
    /// non-transient error immediately.
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(operation = name, attempt, ?delay, error = %err, "retrying store call");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(3), Duration::from_millis(800));
        assert_eq!(policy.delay_after(4), Duration::from_secs(1));
        assert_eq!(policy.delay_after(40), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::default()
            .run("get_record", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RelayError::Transport("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_stop_at_budget() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::default()
            .run("insert_record", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RelayError::Transport("timeout".into()))
            })
            .await;

        assert!(matches!(result, Err(RelayError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_configuration_errors_fail_fast() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = RetryPolicy::default()
            .run("insert_record", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RelayError::Configuration("password authentication failed".into()))
            })
            .await;

        assert!(matches!(result, Err(RelayError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
