//! The acquisition facade.
//!
//! [`Acquisition`] owns every piece of shared resilience state for one
//! process: the per-kind caches, the circuit breaker registry, the HTTP
//! client and the URL checker. It is built once at startup from a
//! [`PostcraftConfig`] and handed to whatever generates content.
//!
//! Two entry points:
//!
//! - [`Acquisition::lookup`] runs an upstream call through
//!   cache → breaker → retry → timeout and never fails; a broken upstream
//!   yields `T::default()`.
//! - [`Acquisition::acquire_sitemap`] resolves a site to its sitemap(s) and
//!   crawls them through the racing fetcher.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use postcraft_fetch::http::build_client;
use postcraft_fetch::sitemap::{dedup_key, discover_sitemaps, is_site_root, parse_site_url};
use postcraft_fetch::{
    cache_key, with_retry, with_timeout, CacheStats, CircuitBreaker, CircuitReport, CrawlConfig,
    CrawlObserver, CrawlReport, FetchError, RaceConfig, RacingFetcher, RetryPolicy,
    SitemapCrawler, StopReason, TtlCache, UrlChecker,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::PostcraftConfig;
use crate::error::Result;

/// Logical upstream data kinds, each with its own cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Search-term suggestions.
    Terms,
    /// Search engine result pages.
    Serp,
    /// Video search results.
    Video,
    /// Reference link lookups.
    References,
}

impl CacheKind {
    /// Every kind, in diagnostic order.
    pub const ALL: [Self; 4] = [Self::Terms, Self::Serp, Self::Video, Self::References];

    /// Stable lowercase name, matching the config section.
    pub fn name(self) -> &'static str {
        match self {
            Self::Terms => "terms",
            Self::Serp => "serp",
            Self::Video => "video",
            Self::References => "references",
        }
    }
}

/// Shared acquisition state.
#[derive(Debug, Clone)]
pub struct Acquisition {
    client: reqwest::Client,
    terms: TtlCache<Value>,
    serp: TtlCache<Value>,
    video: TtlCache<Value>,
    references: TtlCache<Value>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    race: RaceConfig,
    crawl: CrawlConfig,
    url_checker: UrlChecker,
    shutdown: CancellationToken,
}

impl Acquisition {
    /// Build all shared state from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PostcraftError::Config`] if any section is invalid,
    /// or a fetch error if the HTTP client cannot be built.
    pub fn new(config: &PostcraftConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config.http)?;
        let caches = &config.caches;
        let url_validity = TtlCache::new("url_validity", &caches.url_validity)?;

        Ok(Self {
            terms: TtlCache::new(CacheKind::Terms.name(), &caches.terms)?,
            serp: TtlCache::new(CacheKind::Serp.name(), &caches.serp)?,
            video: TtlCache::new(CacheKind::Video.name(), &caches.video)?,
            references: TtlCache::new(CacheKind::References.name(), &caches.references)?,
            breaker: CircuitBreaker::new(config.breaker.clone()),
            retry: config.retry.clone(),
            race: config.race.clone(),
            crawl: config.crawl.clone(),
            url_checker: UrlChecker::new(client.clone(), url_validity),
            shutdown: CancellationToken::new(),
            client,
        })
    }

    fn cache(&self, kind: CacheKind) -> &TtlCache<Value> {
        match kind {
            CacheKind::Terms => &self.terms,
            CacheKind::Serp => &self.serp,
            CacheKind::Video => &self.video,
            CacheKind::References => &self.references,
        }
    }

    /// The shared HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// The shared circuit breaker registry.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The cached URL reachability checker.
    pub fn url_checker(&self) -> &UrlChecker {
        &self.url_checker
    }

    /// Token cancelled by [`Acquisition::shutdown`]; every crawl observes a
    /// child of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Cancel in-progress crawls. They return what they found so far.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run `op` against `dependency` with caching, circuit breaking,
    /// retrying and a per-attempt deadline, surfacing any failure.
    ///
    /// Concurrent lookups of the same `(dependency, key)` share one call.
    /// Failures, including short-circuits, are never cached.
    ///
    /// # Errors
    ///
    /// [`FetchError::CircuitOpen`] when the dependency is short-circuited,
    /// otherwise the last failure of `op` after retries, or
    /// [`FetchError::Parse`] if a cached value has a different shape than `T`.
    pub async fn try_lookup<T, F, Fut>(
        &self,
        kind: CacheKind,
        dependency: &str,
        key: &str,
        timeout: Duration,
        op: F,
    ) -> postcraft_fetch::Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = postcraft_fetch::Result<T>> + Send + 'static,
    {
        let cache = self.cache(kind);
        let breaker = self.breaker.clone();
        let retry = self.retry.clone();
        let key = cache_key(&[dependency, key]);
        let dependency = dependency.to_owned();

        let value = cache
            .get_or_compute(&key, cache.ttl(), move || async move {
                let op = &op;
                let label = dependency.as_str();
                breaker
                    .call(label, || {
                        with_retry(
                            move || async move {
                                let result = with_timeout(op(), timeout, label).await?;
                                serde_json::to_value(result)
                                    .map_err(|e| FetchError::Parse(e.to_string()))
                            },
                            &retry,
                            label,
                        )
                    })
                    .await
            })
            .await?;

        serde_json::from_value(value).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// [`Acquisition::try_lookup`] that degrades to `T::default()` on any
    /// failure.
    ///
    /// Content generation calls this for optional enrichment: an upstream
    /// that is slow, down or short-circuited yields an empty result instead
    /// of an error.
    pub async fn lookup<T, F, Fut>(
        &self,
        kind: CacheKind,
        dependency: &str,
        key: &str,
        timeout: Duration,
        op: F,
    ) -> T
    where
        T: Serialize + DeserializeOwned + Default + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = postcraft_fetch::Result<T>> + Send + 'static,
    {
        match self.try_lookup(kind, dependency, key, timeout, op).await {
            Ok(value) => value,
            Err(FetchError::CircuitOpen(_)) => T::default(),
            Err(err) => {
                tracing::warn!(
                    cache = kind.name(),
                    dependency,
                    key,
                    error = %err,
                    "lookup failed; using empty result"
                );
                T::default()
            }
        }
    }

    /// Find and crawl the sitemap tree for `site`.
    ///
    /// A bare host or site root is first resolved through `robots.txt` and
    /// well-known paths; every sitemap found is crawled in turn, sharing one
    /// URL and sitemap budget. Anything else is crawled as given.
    ///
    /// # Errors
    ///
    /// [`FetchError::Validation`] for an unusable `site`,
    /// [`FetchError::Config`] for an invalid race configuration, and
    /// [`FetchError::NoUrlsFound`] if no page URL was found anywhere.
    pub async fn acquire_sitemap(
        &self,
        site: &str,
        observer: &CrawlObserver,
    ) -> Result<CrawlReport> {
        let url = parse_site_url(site)?;
        let entries = if is_site_root(&url) {
            let found = discover_sitemaps(site, &self.url_checker).await?;
            if found.is_empty() {
                vec![url.to_string()]
            } else {
                found
            }
        } else {
            vec![url.to_string()]
        };

        let fetcher = RacingFetcher::from_config(&self.race, &self.client)?;
        Ok(self.crawl_entries(&fetcher, &entries, observer).await?)
    }

    async fn crawl_entries(
        &self,
        fetcher: &RacingFetcher,
        entries: &[String],
        observer: &CrawlObserver,
    ) -> postcraft_fetch::Result<CrawlReport> {
        let mut merged: Option<CrawlReport> = None;
        let mut seen: HashSet<String> = HashSet::new();
        let mut failures: Vec<(String, String)> = Vec::new();
        let mut failed_entry: Option<String> = None;
        let mut budget_stop: Option<StopReason> = None;

        for entry in entries {
            let (url_room, sitemap_room) = match &merged {
                Some(report) => (
                    self.crawl.max_urls.saturating_sub(report.urls.len()),
                    self.crawl
                        .max_sitemaps
                        .saturating_sub(report.sitemaps_processed),
                ),
                None => (self.crawl.max_urls, self.crawl.max_sitemaps),
            };
            if url_room == 0 {
                budget_stop = Some(StopReason::UrlLimit);
                break;
            }
            if sitemap_room == 0 {
                budget_stop = Some(StopReason::SitemapLimit);
                break;
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            let config = self
                .crawl
                .clone()
                .with_max_urls(url_room)
                .with_max_sitemaps(sitemap_room);
            let crawler = SitemapCrawler::new(fetcher.clone(), config)?
                .with_cancellation(self.shutdown.child_token());

            match crawler.crawl(entry, observer).await {
                Ok(report) => merge_report(&mut merged, &mut seen, report),
                Err(FetchError::NoUrlsFound {
                    entry: normalized,
                    failures: more,
                }) => {
                    failed_entry.get_or_insert(normalized);
                    failures.extend(more);
                }
                Err(FetchError::Cancelled(_)) => break,
                Err(err) => failures.push((entry.clone(), err.to_string())),
            }
        }

        match merged {
            Some(mut report) => {
                if let Some(reason) = budget_stop {
                    report.stop_reason = reason;
                } else if report.stop_reason == StopReason::Exhausted && self.shutdown.is_cancelled() {
                    report.stop_reason = StopReason::Cancelled;
                }
                Ok(report)
            }
            None if self.shutdown.is_cancelled() => {
                Err(FetchError::Cancelled("sitemap crawl".into()))
            }
            None => Err(FetchError::NoUrlsFound {
                entry: failed_entry
                    .or_else(|| entries.first().cloned())
                    .unwrap_or_default(),
                failures,
            }),
        }
    }

    /// Snapshot of every lookup cache, plus the URL checker's.
    pub fn cache_stats(&self) -> Vec<(&'static str, CacheStats)> {
        let mut stats: Vec<(&'static str, CacheStats)> = CacheKind::ALL
            .iter()
            .map(|kind| (kind.name(), self.cache(*kind).stats()))
            .collect();
        stats.push(("url_validity", self.url_checker.cache_stats()));
        stats
    }

    /// Circuit state of every dependency seen so far.
    pub fn health_report(&self) -> Vec<CircuitReport> {
        self.breaker.health_report()
    }
}

fn merge_report(merged: &mut Option<CrawlReport>, seen: &mut HashSet<String>, report: CrawlReport) {
    let CrawlReport {
        entry,
        urls,
        sitemaps_processed,
        failures,
        stop_reason,
    } = report;
    let urls: Vec<String> = urls
        .into_iter()
        .filter(|url| seen.insert(dedup_key(url)))
        .collect();

    match merged {
        Some(total) => {
            total.urls.extend(urls);
            total.sitemaps_processed += sitemaps_processed;
            total.failures.extend(failures);
            total.stop_reason = stop_reason;
        }
        None => {
            *merged = Some(CrawlReport {
                entry,
                urls,
                sitemaps_processed,
                failures,
                stop_reason,
            });
        }
    }
}
