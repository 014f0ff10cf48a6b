//! Deadline and cancellation wrappers.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, Result};

/// Race `operation` against a deadline.
///
/// On expiry the operation's future is dropped, which aborts any in-flight
/// HTTP request it owns, and a [`FetchError::Timeout`] carrying `label` is
/// returned.
pub async fn with_timeout<T, Fut>(operation: Fut, duration: Duration, label: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(
                label,
                timeout_ms = duration.as_millis() as u64,
                "operation timed out"
            );
            Err(FetchError::timeout(label, duration))
        }
    }
}

/// Run `operation` until it completes or `token` is cancelled, whichever
/// comes first. Cancellation drops the operation and yields
/// [`FetchError::Cancelled`].
pub async fn until_cancelled<T, Fut>(
    token: &CancellationToken,
    operation: Fut,
    label: &str,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(FetchError::Cancelled(label.to_owned())),
        result = operation => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn completes_within_deadline() {
        let result = with_timeout(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(5)
            },
            Duration::from_millis(100),
            "fast",
        )
        .await;
        assert_eq!(result.ok(), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_returns_labelled_timeout_and_drops_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let result: Result<()> = with_timeout(
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(100),
            "serp lookup",
        )
        .await;

        match result {
            Err(FetchError::Timeout { label, after }) => {
                assert_eq!(label, "serp lookup");
                assert_eq!(after, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let result: Result<()> = with_timeout(
            async { Err(FetchError::Validation("not xml".into())) },
            Duration::from_secs(1),
            "x",
        )
        .await;
        assert!(matches!(result, Err(FetchError::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_operation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = until_cancelled(
            &token,
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            "crawl",
        )
        .await;
        assert!(matches!(result, Err(FetchError::Cancelled(ref l)) if l == "crawl"));
    }

    #[tokio::test]
    async fn uncancelled_operation_completes() {
        let token = CancellationToken::new();
        let result = until_cancelled(&token, async { Ok("done") }, "x").await;
        assert_eq!(result.ok(), Some("done"));
    }
}
