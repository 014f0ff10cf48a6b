//! # postcraft-fetch
//!
//! External-data acquisition and resilience layer for postcraft.
//!
//! Search providers, sitemap servers and proxy relays are slow, flaky and
//! occasionally down. This crate wraps every call to them in the same small
//! set of building blocks, so content generation degrades instead of
//! failing when an upstream misbehaves.
//!
//! ## Design
//!
//! - [`TtlCache`]: bounded TTL/LRU cache with single-flight computation, one
//!   instance per upstream kind
//! - [`CircuitBreaker`]: per-dependency failure tracking that short-circuits
//!   calls to an upstream known to be down
//! - [`concurrency`]: `with_timeout`, `with_retry`, `execute_parallel` and
//!   `bounded_probe`
//! - [`RacingFetcher`]: several transport paths for one document, first
//!   valid answer wins
//! - [`SitemapCrawler`]: breadth-first walk of a sitemap tree with bounded
//!   fan-out, cycle suppression and per-node failure isolation
//!
//! All state is in-process and owned by whoever constructs it. Nothing is
//! global and nothing survives a restart.

pub mod cache;
pub mod circuit_breaker;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod http;
pub mod race;
pub mod sitemap;
mod sync;
pub mod url_check;

pub use cache::{cache_key, CacheConfig, CacheStats, TtlCache};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitReport, CircuitState,
};
pub use concurrency::{
    bounded_probe, execute_parallel, until_cancelled, with_retry, with_timeout, RetryPolicy,
};
pub use config::{CrawlConfig, HttpConfig, ProxyConfig, RaceConfig};
pub use error::{FetchError, Result, StrategyFailure};
pub use race::{looks_like_sitemap, FetchStrategy, RaceWinner, RacingFetcher};
pub use sitemap::{
    CrawlObserver, CrawlProgress, CrawlReport, SitemapCrawler, SitemapSource, StopReason,
};
pub use url_check::UrlChecker;

/// Crawl the sitemap tree at `entry` through a [`RacingFetcher`] built
/// from `race`, using a client built from `http`.
///
/// Convenience wrapper for one-off crawls; long-lived callers should build
/// the fetcher once and reuse it.
///
/// # Errors
///
/// Returns [`FetchError::Config`] for invalid configuration, otherwise the
/// errors of [`SitemapCrawler::crawl`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> postcraft_fetch::Result<()> {
/// use postcraft_fetch::{CrawlConfig, CrawlObserver, HttpConfig, RaceConfig};
///
/// let report = postcraft_fetch::crawl_sitemap(
///     "example.com",
///     &HttpConfig::default(),
///     &RaceConfig::default(),
///     &CrawlConfig::default(),
///     &CrawlObserver::new(),
/// )
/// .await?;
/// println!("{} URLs", report.urls.len());
/// # Ok(())
/// # }
/// ```
pub async fn crawl_sitemap(
    entry: &str,
    http: &HttpConfig,
    race: &RaceConfig,
    crawl: &CrawlConfig,
    observer: &CrawlObserver,
) -> Result<CrawlReport> {
    let client = http::build_client(http)?;
    let fetcher = RacingFetcher::from_config(race, &client)?;
    SitemapCrawler::new(fetcher, crawl.clone())?
        .crawl(entry, observer)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crawl_rejects_invalid_crawl_config() {
        let result = crawl_sitemap(
            "example.com",
            &HttpConfig::default(),
            &RaceConfig::default(),
            &CrawlConfig::default().with_concurrency(0),
            &CrawlObserver::new(),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("concurrency"));
    }

    #[tokio::test]
    async fn crawl_rejects_race_without_strategies() {
        let result = crawl_sitemap(
            "example.com",
            &HttpConfig::default(),
            &RaceConfig::default().with_direct(false),
            &CrawlConfig::default(),
            &CrawlObserver::new(),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Config(_))));
    }

    #[tokio::test]
    async fn crawl_rejects_empty_entry() {
        let result = crawl_sitemap(
            " ",
            &HttpConfig::default(),
            &RaceConfig::default(),
            &CrawlConfig::default(),
            &CrawlObserver::new(),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Validation(_))));
    }
}
