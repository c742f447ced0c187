//! Database retry logic
//!
//! SQLite allows one writer at a time. Concurrent merges for different
//! customers can collide on the write lock; those writes are retried with
//! exponential backoff instead of failing the event.

use crm_common::{Error, Result};
use std::time::{Duration, Instant};

/// Retry `operation` while it fails with "database is locked", up to `max_wait_ms`
///
/// Backoff starts at 10ms and doubles up to 1000ms. Any other error is
/// returned immediately.
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_database_locked() => return Err(err),
            Err(_) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts ({} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 1000, || async { Ok::<i32, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_lock_errors() {
        let mut attempts = 0;
        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            let n = attempts;
            async move {
                if n < 3 {
                    Err(locked())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_wait() {
        let result = retry_on_lock("test_op", 30, || async { Err::<i32, Error>(locked()) }).await;
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[tokio::test]
    async fn test_other_errors_fail_immediately() {
        let mut attempts = 0;
        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            async { Err::<i32, Error>(Error::NotFound("x".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(attempts, 1);
    }
}
