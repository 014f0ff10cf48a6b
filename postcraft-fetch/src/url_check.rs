//! Cached URL reachability checks.
//!
//! Used to validate candidate links and sitemap locations cheaply: a `HEAD`
//! request first, falling back to `GET` for servers that reject `HEAD`.
//! Definite answers (reachable or not) are cached per URL; transport
//! failures and timeouts are not, so the next caller checks again.

use std::time::Duration;

use reqwest::StatusCode;

use crate::cache::{CacheStats, TtlCache};
use crate::concurrency::{bounded_probe, with_timeout};
use crate::error::{FetchError, Result};
use crate::sitemap::dedup_key;

/// Default deadline for a single reachability check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks whether URLs answer with a success status.
#[derive(Clone)]
pub struct UrlChecker {
    client: reqwest::Client,
    cache: TtlCache<bool>,
    timeout: Duration,
}

impl std::fmt::Debug for UrlChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlChecker")
            .field("cache", &self.cache.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl UrlChecker {
    /// Create a checker storing verdicts in `cache`.
    pub fn new(client: reqwest::Client, cache: TtlCache<bool>) -> Self {
        Self {
            client,
            cache,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    /// Override the per-check deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The HTTP client used for checks.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Counters of the verdict cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Check `url`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure or timeout. Those
    /// outcomes are not cached.
    pub async fn check(&self, url: &str) -> Result<bool> {
        let key = dedup_key(url);
        let client = self.client.clone();
        let target = url.trim().to_owned();
        let timeout = self.timeout;
        self.cache
            .get_or_compute(&key, self.cache.ttl(), move || async move {
                with_timeout(probe(&client, &target), timeout, "url check").await
            })
            .await
    }

    /// Returns `true` if `url` answered with a success status. Failures of
    /// any kind count as unreachable.
    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.check(url).await {
            Ok(reachable) => reachable,
            Err(err) => {
                tracing::debug!(url, error = %err, "reachability check failed");
                false
            }
        }
    }

    /// Keep up to `target` reachable URLs from `urls`, in input order,
    /// checking at most `concurrency` at a time.
    pub async fn filter_reachable(
        &self,
        urls: Vec<String>,
        concurrency: usize,
        target: usize,
    ) -> Vec<String> {
        let checker = self;
        bounded_probe(
            urls,
            move |url| async move { checker.is_reachable(&url).await },
            concurrency,
            target,
        )
        .await
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> Result<bool> {
    let head = client
        .head(url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest("url check", &e))?;
    let status = head.status();
    if status != StatusCode::METHOD_NOT_ALLOWED && status != StatusCode::NOT_IMPLEMENTED {
        return Ok(status.is_success());
    }
    tracing::trace!(url, %status, "HEAD rejected; retrying with GET");
    let get = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest("url check", &e))?;
    Ok(get.status().is_success())
}
