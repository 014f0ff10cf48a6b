//! Concurrency-limited probing that stops once enough candidates pass.

use std::future::Future;

use futures::stream::{FuturesUnordered, StreamExt};

/// Check `candidates` with at most `concurrency_limit` checks in flight,
/// returning up to `target_count` candidates that passed, in input order.
///
/// Once `target_count` candidates have passed no new checks are started.
/// Checks already in flight at that moment are allowed to finish (they are
/// awaited, never orphaned), and any extra passes are discarded.
pub async fn bounded_probe<T, F, Fut>(
    candidates: Vec<T>,
    check: F,
    concurrency_limit: usize,
    target_count: usize,
) -> Vec<T>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = bool>,
{
    if target_count == 0 || candidates.is_empty() {
        return Vec::new();
    }
    let limit = concurrency_limit.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut next = 0;
    let mut passed: Vec<usize> = Vec::new();

    let launch = |index: usize| {
        let fut = check(candidates[index].clone());
        async move { (index, fut.await) }
    };

    while next < candidates.len() && in_flight.len() < limit {
        in_flight.push(launch(next));
        next += 1;
    }

    while let Some((index, ok)) = in_flight.next().await {
        if ok {
            passed.push(index);
        }
        if passed.len() < target_count && next < candidates.len() {
            in_flight.push(launch(next));
            next += 1;
        }
    }

    tracing::trace!(
        checked = next,
        total = candidates.len(),
        passed = passed.len(),
        "bounded probe finished"
    );

    passed.sort_unstable();
    passed.truncate(target_count);
    passed.into_iter().map(|i| candidates[i].clone()).collect()
}
