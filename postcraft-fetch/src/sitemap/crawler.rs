//! Breadth-first sitemap crawl with bounded fan-out.
//!
//! The frontier starts with the entry sitemap. Each round takes up to
//! `concurrency` queued sitemaps, fetches them together and files each
//! result: index documents push their children back onto the frontier,
//! url-sets add page URLs to the discovered set, and failures are recorded
//! without stopping the crawl. The walk ends when the frontier drains or a
//! sitemap / URL cap is hit.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::concurrency::until_cancelled;
use crate::config::CrawlConfig;
use crate::error::{FetchError, Result};
use crate::race::RacingFetcher;

use super::parse::{parse_sitemap, ParsedSitemap, SitemapKind};
use super::url_normalize::{dedup_key, normalize_entry_url, resolve_loc};

/// Where sitemap documents come from.
#[async_trait]
pub trait SitemapSource: Send + Sync {
    /// Fetch the raw body of the sitemap at `url`.
    async fn fetch_sitemap(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl<S: SitemapSource + ?Sized> SitemapSource for Arc<S> {
    async fn fetch_sitemap(&self, url: &str) -> Result<String> {
        (**self).fetch_sitemap(url).await
    }
}

#[async_trait]
impl SitemapSource for RacingFetcher {
    async fn fetch_sitemap(&self, url: &str) -> Result<String> {
        let winner = self.race(url).await?;
        tracing::trace!(url, strategy = %winner.strategy, "sitemap fetched");
        Ok(winner.content)
    }
}

/// Counts reported after every crawl round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrawlProgress {
    /// Sitemaps fetched so far, successfully or not.
    pub processed: usize,
    /// Sitemaps waiting in the frontier.
    pub queued: usize,
    /// Distinct page URLs discovered so far.
    pub discovered: usize,
    /// Sitemaps that failed to fetch or parse.
    pub failed: usize,
}

/// Callback receiving round-by-round progress.
pub type ProgressCallback = Box<dyn Fn(CrawlProgress) + Send + Sync>;

/// Callback receiving newly discovered page URLs.
pub type UrlBatchCallback = Box<dyn Fn(&[String]) + Send + Sync>;

/// Optional callbacks for following a crawl while it runs.
#[derive(Default)]
pub struct CrawlObserver {
    on_progress: Option<ProgressCallback>,
    on_urls: Option<UrlBatchCallback>,
}

impl std::fmt::Debug for CrawlObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlObserver")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_urls", &self.on_urls.is_some())
            .finish()
    }
}

impl CrawlObserver {
    /// An observer that ignores everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the progress callback.
    pub fn on_progress(mut self, callback: impl Fn(CrawlProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    /// Set the URL batch callback.
    pub fn on_urls(mut self, callback: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.on_urls = Some(Box::new(callback));
        self
    }

    fn progress(&self, progress: CrawlProgress) {
        if let Some(callback) = &self.on_progress {
            callback(progress);
        }
    }

    fn urls(&self, batch: &[String]) {
        if let Some(callback) = &self.on_urls {
            callback(batch);
        }
    }
}

/// Why a crawl stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every reachable sitemap was processed.
    Exhausted,
    /// `max_sitemaps` sitemaps were dispatched with more still queued.
    SitemapLimit,
    /// `max_urls` page URLs were discovered.
    UrlLimit,
    /// The crawl's cancellation token fired.
    Cancelled,
}

/// A sitemap that could not be fetched or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitemapFailure {
    /// Sitemap URL.
    pub url: String,
    /// Failure description.
    pub reason: String,
}

/// Result of a crawl that discovered at least one page URL.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    /// Normalised entry sitemap URL.
    pub entry: String,
    /// Discovered page URLs in discovery order, without duplicates.
    pub urls: Vec<String>,
    /// Sitemaps fetched, including failed ones.
    pub sitemaps_processed: usize,
    /// Per-sitemap failures.
    pub failures: Vec<SitemapFailure>,
    /// Why the crawl stopped.
    pub stop_reason: StopReason,
}

/// Pending, visited and discovered sets of one crawl.
struct Frontier {
    pending: VecDeque<String>,
    visited: HashSet<String>,
    discovered: HashSet<String>,
    urls: Vec<String>,
}

impl Frontier {
    fn new(entry: &str) -> Self {
        let mut frontier = Self {
            pending: VecDeque::new(),
            visited: HashSet::new(),
            discovered: HashSet::new(),
            urls: Vec::new(),
        };
        frontier.enqueue(entry.to_owned());
        frontier
    }

    /// Queue a sitemap unless it was queued before.
    fn enqueue(&mut self, url: String) -> bool {
        if self.visited.insert(dedup_key(&url)) {
            self.pending.push_back(url);
            true
        } else {
            false
        }
    }

    fn take_batch(&mut self, size: usize) -> Vec<String> {
        let size = size.min(self.pending.len());
        self.pending.drain(..size).collect()
    }

    fn is_discovered(&self, url: &str) -> bool {
        self.discovered.contains(&dedup_key(url))
    }

    /// Record a page URL unless already discovered.
    fn discover(&mut self, url: String) -> bool {
        if self.discovered.insert(dedup_key(&url)) {
            self.urls.push(url);
            true
        } else {
            false
        }
    }
}

/// Crawls a sitemap tree through a [`SitemapSource`].
#[derive(Debug)]
pub struct SitemapCrawler<S> {
    source: S,
    config: CrawlConfig,
    cancel: Option<CancellationToken>,
}

impl<S: SitemapSource> SitemapCrawler<S> {
    /// Create a crawler.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if `config` is invalid.
    pub fn new(source: S, config: CrawlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            cancel: None,
        })
    }

    /// Stop crawling when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The crawl limits in effect.
    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    async fn visit(&self, url: &str) -> Result<(Url, ParsedSitemap)> {
        let base = Url::parse(url)
            .map_err(|e| FetchError::Validation(format!("invalid sitemap URL: {e}")))?;
        let body = self.source.fetch_sitemap(url).await?;
        let parsed = parse_sitemap(&body)?;
        if parsed.recovered {
            tracing::debug!(url, entries = parsed.locs.len(), "recovered entries from malformed sitemap");
        }
        Ok((base, parsed))
    }

    /// Crawl the sitemap tree rooted at `entry`.
    ///
    /// `entry` may omit the scheme or name only a host; see
    /// [`normalize_entry_url`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Validation`] for an unusable entry URL,
    /// [`FetchError::NoUrlsFound`] if the crawl ends without a single page
    /// URL, and [`FetchError::Cancelled`] if it was cancelled before finding
    /// any. Individual sitemap failures never abort the crawl.
    pub async fn crawl(&self, entry: &str, observer: &CrawlObserver) -> Result<CrawlReport> {
        let entry = normalize_entry_url(entry)?;
        let max_urls = self.config.max_urls;
        let mut frontier = Frontier::new(&entry);
        let mut failures: Vec<SitemapFailure> = Vec::new();
        let mut dispatched = 0usize;
        let mut processed = 0usize;

        tracing::info!(url = %entry, max_sitemaps = self.config.max_sitemaps, max_urls, "starting sitemap crawl");

        let mut truncated = false;

        let stop_reason = loop {
            if frontier.urls.len() >= max_urls && (truncated || !frontier.pending.is_empty()) {
                break StopReason::UrlLimit;
            }
            if frontier.pending.is_empty() {
                break StopReason::Exhausted;
            }
            if dispatched >= self.config.max_sitemaps {
                break StopReason::SitemapLimit;
            }
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                break StopReason::Cancelled;
            }

            let room = self.config.max_sitemaps - dispatched;
            let batch = frontier.take_batch(self.config.concurrency.min(room));
            dispatched += batch.len();

            let visits = batch.iter().map(move |url| async move { (url, self.visit(url).await) });
            let outcomes = match &self.cancel {
                Some(token) => {
                    match until_cancelled(token, async { Ok(join_all(visits).await) }, "sitemap crawl")
                        .await
                    {
                        Ok(outcomes) => outcomes,
                        Err(_) => break StopReason::Cancelled,
                    }
                }
                None => join_all(visits).await,
            };

            let mut fresh: Vec<String> = Vec::new();
            for (url, outcome) in outcomes {
                processed += 1;
                match outcome {
                    Ok((base, parsed)) => {
                        let locs = parsed.locs.iter().filter_map(|loc| resolve_loc(&base, loc));
                        match parsed.kind {
                            SitemapKind::Index => {
                                let queued = locs.filter(|child| frontier.enqueue(child.clone())).count();
                                tracing::debug!(url = %url, children = parsed.locs.len(), queued, "expanded sitemap index");
                            }
                            SitemapKind::UrlSet => {
                                for page in locs {
                                    if frontier.urls.len() >= max_urls {
                                        if !frontier.is_discovered(&page) {
                                            truncated = true;
                                            break;
                                        }
                                        continue;
                                    }
                                    if frontier.discover(page.clone()) {
                                        fresh.push(page);
                                    }
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(url = %url, error = %err, "sitemap failed; continuing crawl");
                        failures.push(SitemapFailure {
                            url: url.clone(),
                            reason: err.to_string(),
                        });
                    }
                }
            }

            for chunk in fresh.chunks(self.config.url_batch_size) {
                observer.urls(chunk);
            }
            let progress = CrawlProgress {
                processed,
                queued: frontier.pending.len(),
                discovered: frontier.urls.len(),
                failed: failures.len(),
            };
            tracing::debug!(
                processed = progress.processed,
                queued = progress.queued,
                discovered = progress.discovered,
                failed = progress.failed,
                "crawl round complete"
            );
            observer.progress(progress);
        };

        if frontier.urls.is_empty() {
            if stop_reason == StopReason::Cancelled {
                return Err(FetchError::Cancelled("sitemap crawl".into()));
            }
            tracing::warn!(url = %entry, failed = failures.len(), "sitemap crawl found no URLs");
            return Err(FetchError::NoUrlsFound {
                entry,
                failures: failures.into_iter().map(|f| (f.url, f.reason)).collect(),
            });
        }

        tracing::info!(
            url = %entry,
            urls = frontier.urls.len(),
            sitemaps = processed,
            failed = failures.len(),
            stop_reason = ?stop_reason,
            "sitemap crawl finished"
        );
        Ok(CrawlReport {
            entry,
            urls: frontier.urls,
            sitemaps_processed: processed,
            failures,
            stop_reason,
        })
    }
}
