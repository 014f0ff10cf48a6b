//! Fetch, race and crawl configuration with sensible defaults.
//!
//! Every tunable of the acquisition layer is a named option. The defaults
//! are starting points tuned for public sitemap servers and CORS relays;
//! deployments should revisit them against observed upstream latency.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// `Accept` header sent when fetching sitemap content.
pub const SITEMAP_ACCEPT: &str = "application/xml, text/xml, text/html, */*";

/// Default client identifier sent with every outbound request.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "postcraft-fetch/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/postcraft/postcraft)"
);

/// HTTP client configuration shared by all fetch strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Descriptive client identifier sent as `User-Agent`.
    pub user_agent: String,
    /// Transport-level request timeout in seconds. Strategy and race
    /// deadlines are enforced separately and are usually shorter.
    pub timeout_secs: u64,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl HttpConfig {
    /// Transport timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.user_agent.trim().is_empty() {
            return Err(FetchError::Config("user_agent must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(FetchError::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// A public CORS-style relay that fetches a target URL on our behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Strategy name reported in race results, e.g. `"via-proxy-a"`.
    pub name: String,
    /// Request URL template; `{url}` is replaced by the percent-encoded target.
    pub template: String,
    /// Per-attempt deadline in milliseconds.
    #[serde(default = "default_proxy_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_proxy_timeout_ms() -> u64 {
    8_000
}

/// Configuration for a racing fetch.
///
/// Strategies are launched in this order: relay (when an endpoint is set),
/// direct (when enabled), then each proxy. Order only affects tie-breaking
/// in logs; all strategies run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Hard deadline for the whole race in milliseconds, independent of the
    /// per-strategy timeouts.
    pub overall_timeout_ms: u64,
    /// Server-side relay endpoint accepting `POST {"url": ...}`.
    pub relay_endpoint: Option<String>,
    /// Relay attempt deadline in milliseconds.
    pub relay_timeout_ms: u64,
    /// Whether to fetch the target directly.
    pub direct: bool,
    /// Direct attempt deadline in milliseconds.
    pub direct_timeout_ms: u64,
    /// Public relays tried alongside the other strategies.
    pub proxies: Vec<ProxyConfig>,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            overall_timeout_ms: 20_000,
            relay_endpoint: None,
            relay_timeout_ms: 15_000,
            direct: true,
            direct_timeout_ms: 10_000,
            proxies: Vec::new(),
        }
    }
}

impl RaceConfig {
    /// Overall race deadline as a [`Duration`].
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    /// Set the overall race deadline.
    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the relay endpoint.
    pub fn with_relay_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.relay_endpoint = Some(endpoint.into());
        self
    }

    /// Add a proxy relay with the default proxy timeout.
    pub fn with_proxy(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.proxies.push(ProxyConfig {
            name: name.into(),
            template: template.into(),
            timeout_ms: default_proxy_timeout_ms(),
        });
        self
    }

    /// Enable or disable the direct strategy.
    pub fn with_direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    /// Validates this configuration.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.overall_timeout_ms == 0 {
            return Err(FetchError::Config(
                "overall_timeout_ms must be greater than 0".into(),
            ));
        }
        if !self.direct && self.relay_endpoint.is_none() && self.proxies.is_empty() {
            return Err(FetchError::Config(
                "at least one fetch strategy must be enabled".into(),
            ));
        }
        for proxy in &self.proxies {
            if !proxy.template.contains("{url}") {
                return Err(FetchError::Config(format!(
                    "proxy {} template must contain {{url}}",
                    proxy.name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for a sitemap crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum number of sitemap documents fetched concurrently.
    pub concurrency: usize,
    /// Stop after this many sitemap documents have been dispatched.
    pub max_sitemaps: usize,
    /// Stop once this many page URLs have been discovered.
    pub max_urls: usize,
    /// Newly discovered URLs are delivered to the observer in chunks of at
    /// most this size.
    pub url_batch_size: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_sitemaps: 500,
            max_urls: 50_000,
            url_batch_size: 250,
        }
    }
}

impl CrawlConfig {
    /// Set the fetch concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the sitemap cap.
    pub fn with_max_sitemaps(mut self, max: usize) -> Self {
        self.max_sitemaps = max;
        self
    }

    /// Set the discovered-URL cap.
    pub fn with_max_urls(mut self, max: usize) -> Self {
        self.max_urls = max;
        self
    }

    /// Validates this configuration.
    ///
    /// Checks:
    /// - `concurrency` must be greater than 0
    /// - `max_sitemaps` must be greater than 0
    /// - `max_urls` must be greater than 0
    /// - `url_batch_size` must be greater than 0
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.concurrency == 0 {
            return Err(FetchError::Config(
                "concurrency must be greater than 0".into(),
            ));
        }
        if self.max_sitemaps == 0 {
            return Err(FetchError::Config(
                "max_sitemaps must be greater than 0".into(),
            ));
        }
        if self.max_urls == 0 {
            return Err(FetchError::Config("max_urls must be greater than 0".into()));
        }
        if self.url_batch_size == 0 {
            return Err(FetchError::Config(
                "url_batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_http_config_is_valid() {
        let config = HttpConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.user_agent.starts_with("postcraft-fetch/"));
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn empty_user_agent_rejected() {
        let config = HttpConfig {
            user_agent: "  ".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("user_agent"));
    }

    #[test]
    fn default_race_config() {
        let config = RaceConfig::default();
        assert_eq!(config.overall_timeout(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_race_timeout_rejected() {
        let config = RaceConfig::default().with_overall_timeout(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overall_timeout_ms"));
    }

    #[test]
    fn race_without_strategies_rejected() {
        let config = RaceConfig::default().with_direct(false);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("strategy"));
    }

    #[test]
    fn proxy_template_needs_placeholder() {
        let config = RaceConfig::default().with_proxy("via-proxy-a", "https://relay.test/raw");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("via-proxy-a"));

        let config = RaceConfig::default().with_proxy("via-proxy-a", "https://relay.test/?u={url}");
        assert!(config.validate().is_ok());
        assert_eq!(config.proxies[0].timeout_ms, 8_000);
    }

    #[test]
    fn default_crawl_config_has_sensible_values() {
        let config = CrawlConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_sitemaps, 500);
        assert_eq!(config.max_urls, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = CrawlConfig::default().with_concurrency(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn zero_caps_rejected() {
        assert!(CrawlConfig::default()
            .with_max_sitemaps(0)
            .validate()
            .is_err());
        assert!(CrawlConfig::default().with_max_urls(0).validate().is_err());
    }

    #[test]
    fn crawl_config_deserialises_with_defaults() {
        let config: CrawlConfig =
            serde_json::from_str(r#"{"max_urls": 100}"#).expect("deserialize");
        assert_eq!(config.max_urls, 100);
        assert_eq!(config.concurrency, 5);
    }
}
