//! Retry Executor: fixed-delay retry for recoverable TSDB failures.
//!
//! Grounded on `original_source/.../src/backup.py`'s
//! `_execute_with_retry`: retries only transport-level failures, with
//! a fixed delay and a hard attempt budget; anything else propagates
//! immediately. Per spec.md §4.3, attempts are strictly sequential —
//! at most one outstanding call per invocation.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::error::BackupError;

/// Executes a fallible async producer with fixed-delay retry on
/// retryable errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    /// Maximum number of attempts, including the first.
    max_attempts: u32,
    /// Delay between attempts.
    retry_delay: Duration,
}

impl RetryExecutor {
    /// Build an executor from a worker's `retries`/`retry_delay` options.
    ///
    /// `retries` is the number of *additional* attempts allowed after
    /// the first, matching spec.md §4.2's `options.retries` semantics.
    #[must_use]
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            retry_delay,
        }
    }

    /// Invoke `producer` until it succeeds, a non-retryable error is
    /// returned, or the attempt budget is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or
    /// immediately on a non-retryable error.
    pub async fn execute<F, Fut, T>(&self, mut producer: F) -> Result<T, BackupError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackupError>>,
    {
        let mut attempt = 1;
        loop {
            match producer().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        %error,
                        "retrying after recoverable error"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(error) if error.is_retryable() => {
                    return Err(BackupError::RetryExhausted {
                        attempts: attempt,
                        message: error.to_string(),
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::tsdb_client::TsdbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_succeeds() {
        let executor = RetryExecutor::new(3, Duration::from_millis(0));
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BackupError>(42) }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_unreachable_until_budget_then_fails() {
        let executor = RetryExecutor::new(2, Duration::from_millis(0));
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BackupError::Tsdb(TsdbError::unreachable("down"))) }
            })
            .await;
        assert!(matches!(result, Err(BackupError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(3, Duration::from_millis(0));
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(BackupError::Tsdb(TsdbError::unreachable("down")))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_fatal_errors() {
        let executor = RetryExecutor::new(3, Duration::from_millis(0));
        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BackupError::Tsdb(TsdbError::query_error("bad query"))) }
            })
            .await;
        assert!(matches!(
            result,
            Err(BackupError::Tsdb(TsdbError::QueryError { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
