//! Racing fetch: several transport strategies, first valid answer wins.
//!
//! Sitemaps have no single reliable access path. The origin may block
//! browsers (CORS) or bots, our relay may be cold, and public relays come
//! and go. [`RacingFetcher::race`] launches every configured strategy at
//! once under one cancellation scope. A response only counts if it passes
//! the validity predicate. The first one that does wins and every other
//! attempt is cancelled on the spot.

mod strategy;

pub use strategy::{
    strategies_from_config, DirectStrategy, FetchStrategy, FnStrategy, ProxyStrategy,
    RelayStrategy, DIRECT_TIMEOUT, PROXY_TIMEOUT, RELAY_TIMEOUT,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::concurrency::{until_cancelled, with_timeout};
use crate::config::RaceConfig;
use crate::error::{FetchError, Result, StrategyFailure};

/// Content check applied to every strategy result.
pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The accepted result of a race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceWinner {
    /// Name of the strategy that produced `content`.
    pub strategy: String,
    /// The validated document body.
    pub content: String,
    /// Time from race start to the winning result.
    pub elapsed: Duration,
}

/// Returns `true` if `text` looks like a sitemap (`<urlset>` or
/// `<sitemapindex>`) rather than an HTML error or landing page.
pub fn looks_like_sitemap(text: &str) -> bool {
    let head: String = text
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(512)
        .collect::<String>()
        .to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return false;
    }
    text.contains("<urlset") || text.contains("<sitemapindex")
}

/// Runs a fixed set of [`FetchStrategy`]s against one target at a time.
///
/// Cheap to clone; clones share the strategy set.
#[derive(Clone)]
pub struct RacingFetcher {
    strategies: Arc<[Arc<dyn FetchStrategy>]>,
    validator: Validator,
    config: RaceConfig,
}

impl fmt::Debug for RacingFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RacingFetcher")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RacingFetcher {
    /// Create a fetcher over `strategies` using [`looks_like_sitemap`] as the
    /// validity predicate.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if `strategies` is empty or the overall
    /// deadline is zero.
    pub fn new(strategies: Vec<Arc<dyn FetchStrategy>>, config: RaceConfig) -> Result<Self> {
        if strategies.is_empty() {
            return Err(FetchError::Config("no fetch strategies configured".into()));
        }
        if config.overall_timeout_ms == 0 {
            return Err(FetchError::Config(
                "overall_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(Self {
            strategies: strategies.into(),
            validator: Arc::new(looks_like_sitemap),
            config,
        })
    }

    /// Build a fetcher from configuration with the given HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the configuration is invalid.
    pub fn from_config(config: &RaceConfig, client: &reqwest::Client) -> Result<Self> {
        let strategies = strategies_from_config(config, client)?;
        Self::new(strategies, config.clone())
    }

    /// Replace the validity predicate.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.validator = Arc::new(validator);
        self
    }

    /// Names of the configured strategies, in launch order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Race every strategy for `target` and return the first valid result.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::AllStrategiesFailed`] naming each strategy and
    /// its failure reason when none produced valid content before the
    /// overall deadline.
    pub async fn race(&self, target: &str) -> Result<RaceWinner> {
        let started = Instant::now();
        let deadline = started + self.config.overall_timeout();
        let scope = CancellationToken::new();

        let mut attempts = FuturesUnordered::new();
        for (index, strategy) in self.strategies.iter().enumerate() {
            let strategy = Arc::clone(strategy);
            let token = scope.child_token();
            let target = target.to_owned();
            attempts.push(async move {
                let name = strategy.name().to_owned();
                let attempt = with_timeout(strategy.fetch(&target), strategy.timeout(), &name);
                let outcome = until_cancelled(&token, attempt, &name).await;
                (index, name, outcome)
            });
        }

        let mut failures: Vec<(usize, StrategyFailure)> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, attempts.next()).await {
                Ok(Some((_, name, Ok(content)))) if (self.validator)(&content) => {
                    scope.cancel();
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        url = target,
                        strategy = %name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "race won"
                    );
                    return Ok(RaceWinner {
                        strategy: name,
                        content,
                        elapsed,
                    });
                }
                Ok(Some((index, name, outcome))) => {
                    let reason = match outcome {
                        Ok(content) => FetchError::Validation(format!(
                            "{} bytes did not look like the expected document",
                            content.len()
                        ))
                        .to_string(),
                        Err(err) => err.to_string(),
                    };
                    tracing::debug!(url = target, strategy = %name, %reason, "strategy failed");
                    failures.push((
                        index,
                        StrategyFailure {
                            strategy: name,
                            reason,
                        },
                    ));
                }
                Ok(None) => break,
                Err(_) => {
                    scope.cancel();
                    let reason = FetchError::timeout("race", self.config.overall_timeout());
                    for (index, strategy) in self.strategies.iter().enumerate() {
                        if failures.iter().all(|(i, _)| *i != index) {
                            failures.push((
                                index,
                                StrategyFailure {
                                    strategy: strategy.name().to_owned(),
                                    reason: reason.to_string(),
                                },
                            ));
                        }
                    }
                    break;
                }
            }
        }

        failures.sort_by_key(|(index, _)| *index);
        let failures: Vec<StrategyFailure> = failures.into_iter().map(|(_, f)| f).collect();
        tracing::warn!(
            url = target,
            strategies = failures.len(),
            "all fetch strategies failed"
        );
        Err(FetchError::AllStrategiesFailed(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const SITEMAP: &str = r#"<?xml version="1.0"?><urlset><url><loc>https://a.test/</loc></url></urlset>"#;

    fn fixed(name: &str, delay_ms: u64, body: Result<&str>) -> Arc<dyn FetchStrategy> {
        let body = body.map(str::to_owned);
        Arc::new(FnStrategy::new(
            name,
            Duration::from_secs(5),
            move |_url: String| {
                let body = body.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    body
                }
            },
        ))
    }

    #[test]
    fn sitemap_predicate() {
        assert!(looks_like_sitemap(SITEMAP));
        assert!(looks_like_sitemap(
            "\u{feff}  <sitemapindex xmlns=\"x\"><sitemap/></sitemapindex>"
        ));
        assert!(!looks_like_sitemap(
            "<!DOCTYPE html><html><body>urlset</body></html>"
        ));
        assert!(!looks_like_sitemap("<HTML><p><urlset></p></HTML>"));
        assert!(!looks_like_sitemap(""));
        assert!(!looks_like_sitemap("{\"error\": \"forbidden\"}"));
    }

    #[test]
    fn empty_strategy_list_rejected() {
        let result = RacingFetcher::new(Vec::new(), RaceConfig::default());
        assert!(matches!(result, Err(FetchError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_valid_result_wins_and_cancels_the_rest() {
        let slow_finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&slow_finished);
        let slow: Arc<dyn FetchStrategy> = Arc::new(FnStrategy::new(
            "slow-success",
            Duration::from_secs(5),
            move |_url: String| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(SITEMAP.to_owned())
                }
            },
        ));

        let fetcher = RacingFetcher::new(
            vec![
                slow,
                fixed("fast-invalid", 50, Ok("<html>blocked</html>")),
                fixed("fast-valid", 100, Ok(SITEMAP)),
            ],
            RaceConfig::default(),
        )
        .expect("fetcher");

        let winner = fetcher
            .race("https://a.test/sitemap.xml")
            .await
            .expect("a strategy should win");
        assert_eq!(winner.strategy, "fast-valid");
        assert_eq!(winner.content, SITEMAP);
        assert!(winner.elapsed >= Duration::from_millis(100));
        assert!(winner.elapsed < Duration::from_millis(150));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(
            !slow_finished.load(Ordering::SeqCst),
            "losing strategy must be cancelled"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_are_reported_in_strategy_order() {
        let fetcher = RacingFetcher::new(
            vec![
                fixed(
                    "via-edge-function",
                    30,
                    Err(FetchError::Upstream {
                        status: Some(502),
                        message: "bad gateway".into(),
                    }),
                ),
                fixed("direct", 10, Ok("<html>captcha</html>")),
                fixed("via-proxy-a", 20, Err(FetchError::Http("dns".into()))),
            ],
            RaceConfig::default(),
        )
        .expect("fetcher");

        match fetcher.race("https://a.test/sitemap.xml").await {
            Err(FetchError::AllStrategiesFailed(failures)) => {
                let names: Vec<&str> = failures.iter().map(|f| f.strategy.as_str()).collect();
                assert_eq!(names, ["via-edge-function", "direct", "via-proxy-a"]);
                assert!(failures[0].reason.contains("502"));
                assert!(failures[1].reason.contains("validation failed"));
                assert!(failures[2].reason.contains("dns"));
            }
            other => panic!("expected aggregate failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn per_strategy_timeout_counts_as_failure() {
        let stuck: Arc<dyn FetchStrategy> = Arc::new(FnStrategy::new(
            "via-proxy-b",
            Duration::from_millis(200),
            |_url: String| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(SITEMAP.to_owned())
            },
        ));
        let fetcher = RacingFetcher::new(
            vec![stuck, fixed("direct", 400, Ok(SITEMAP))],
            RaceConfig::default(),
        )
        .expect("fetcher");

        let winner = fetcher.race("https://a.test/sitemap.xml").await.expect("win");
        assert_eq!(winner.strategy, "direct");
    }

    #[tokio::test(start_paused = true)]
    async fn overall_deadline_bounds_the_race() {
        let hung = |name: &str| -> Arc<dyn FetchStrategy> {
            Arc::new(FnStrategy::new(
                name,
                Duration::from_secs(600),
                |_url: String| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(SITEMAP.to_owned())
                },
            ))
        };
        let fetcher = RacingFetcher::new(
            vec![hung("direct"), hung("via-proxy-a")],
            RaceConfig::default().with_overall_timeout(Duration::from_millis(300)),
        )
        .expect("fetcher");

        let start = Instant::now();
        let result = fetcher.race("https://a.test/sitemap.xml").await;
        assert!(start.elapsed() < Duration::from_secs(1));
        match result {
            Err(FetchError::AllStrategiesFailed(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.reason.contains("timed out")));
            }
            other => panic!("expected aggregate failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn custom_validator_is_applied() {
        let fetcher = RacingFetcher::new(
            vec![fixed("direct", 0, Ok("User-agent: *"))],
            RaceConfig::default(),
        )
        .expect("fetcher")
        .with_validator(|text| text.starts_with("User-agent"));
        let winner = fetcher.race("https://a.test/robots.txt").await.expect("win");
        assert_eq!(winner.content, "User-agent: *");
    }
}
