//! Sync pipeline error taxonomy
//!
//! Each pipeline stage reports its outcome through `SyncError` so that the
//! orchestration in `daemon::sync` can branch on the kind: transient errors
//! are retried with bounded backoff, fatal errors trigger the rollback path.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during a synchronization run
#[derive(Debug, Error)]
pub enum SyncError {
    /// Upstream repository unreachable or rejected the request. Retryable.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A malformed record. Skipped and counted, never fatal for the run.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Embedding call failed. Retried a bounded number of times, then fatal.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Disk or write failure during merge. Fatal, triggers rollback.
    #[error("index write failed: {0}")]
    IndexWrite(String),

    /// Snapshot or restore failure. Fatal, run aborted without merge.
    #[error("backup failed: {0}")]
    Backup(String),

    /// Invalid configuration update, rejected at the boundary.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Overall run timeout expired. Treated as a failed run.
    #[error("sync run timed out after {0:?}")]
    Timeout(Duration),

    /// A run is already in flight. The request is rejected, not queued.
    #[error("a sync run is already in progress")]
    Conflict,
}

impl SyncError {
    /// Whether a local retry with backoff is worth attempting
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Extraction(_) | Self::Embedding(_))
    }
}

/// Retry an async operation with bounded exponential backoff.
///
/// Non-retryable errors are returned immediately. The delay doubles after
/// each failed attempt, starting from `base_delay`.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SyncError>>,
{
    let mut delay = base_delay;
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| SyncError::Extraction("retry exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Extraction("down".into()).is_retryable());
        assert!(SyncError::Embedding("503".into()).is_retryable());
        assert!(!SyncError::IndexWrite("disk full".into()).is_retryable());
        assert!(!SyncError::Backup("copy failed".into()).is_retryable());
        assert!(!SyncError::Validation("missing id".into()).is_retryable());
        assert!(!SyncError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::Extraction("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Embedding("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Embedding(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(5, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::IndexWrite("bad".into())) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::IndexWrite(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
