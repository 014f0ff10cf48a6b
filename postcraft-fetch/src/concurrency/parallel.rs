//! Keyed parallel fan-out with per-task isolation.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{FetchError, Result};

/// Label carried by timeout errors for tasks cut off by the batch deadline.
pub const BATCH_TIMEOUT_LABEL: &str = "parallel batch";

/// Run every keyed task concurrently under one shared deadline.
///
/// Each task runs on its own tokio task, so a failure (or panic) in one never
/// cancels or affects its siblings; it only shows up as that key's `Err`.
/// Tasks still running when `overall_timeout` elapses are aborted and
/// reported as [`FetchError::Timeout`]. The map is returned only once every
/// key has either completed or been timed out, and always contains every key.
///
/// If the same key appears more than once, the later task wins.
pub async fn execute_parallel<K, T, Fut, I>(
    tasks: I,
    overall_timeout: Duration,
) -> HashMap<K, Result<T>>
where
    I: IntoIterator<Item = (K, Fut)>,
    K: Eq + Hash + Clone + Send + 'static,
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let deadline = Instant::now() + overall_timeout;
    let mut set = JoinSet::new();
    let mut pending: HashSet<K> = HashSet::new();

    for (key, task) in tasks {
        pending.insert(key.clone());
        set.spawn(async move {
            let outcome = AssertUnwindSafe(task)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FetchError::TaskFailed("task panicked".into())));
            (key, outcome)
        });
    }

    let mut results = HashMap::with_capacity(pending.len());
    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((key, outcome)))) => {
                if pending.remove(&key) {
                    results.insert(key, outcome);
                }
            }
            Ok(Some(Err(join_err))) => {
                // Only reachable if the runtime cancels the task; the key
                // stays pending and is reported when the set drains.
                tracing::warn!(error = %join_err, "parallel task did not complete");
            }
            Ok(None) => break,
            Err(_) => {
                set.abort_all();
                tracing::warn!(
                    unfinished = pending.len(),
                    timeout_ms = overall_timeout.as_millis() as u64,
                    "parallel batch deadline reached"
                );
                break;
            }
        }
    }

    for key in pending {
        results.insert(key, Err(FetchError::timeout(BATCH_TIMEOUT_LABEL, overall_timeout)));
    }
    results
}
