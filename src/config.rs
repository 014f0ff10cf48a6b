//! Configuration types for postcraft.
//!
//! One TOML file covers the whole acquisition layer. Every section is
//! optional; anything left out falls back to the defaults of the
//! corresponding `postcraft-fetch` type.

use std::path::{Path, PathBuf};

use postcraft_fetch::{
    CacheConfig, CircuitBreakerConfig, CrawlConfig, HttpConfig, RaceConfig, RetryPolicy,
};
use serde::{Deserialize, Serialize};

use crate::error::{PostcraftError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostcraftConfig {
    /// Shared HTTP client settings.
    pub http: HttpConfig,
    /// One cache per upstream kind.
    pub caches: CachesConfig,
    /// Per-dependency circuit breaker policy.
    pub breaker: CircuitBreakerConfig,
    /// Retry policy for cached lookups.
    pub retry: RetryPolicy,
    /// Racing fetch strategies for sitemap documents.
    pub race: RaceConfig,
    /// Sitemap crawl bounds.
    pub crawl: CrawlConfig,
}

/// Capacity and TTL of each logical cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachesConfig {
    /// Search-term suggestions.
    pub terms: CacheConfig,
    /// Search engine result pages.
    pub serp: CacheConfig,
    /// Video search results.
    pub video: CacheConfig,
    /// Reference link lookups.
    pub references: CacheConfig,
    /// URL reachability verdicts.
    pub url_validity: CacheConfig,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            terms: CacheConfig::default(),
            serp: CacheConfig::default(),
            video: CacheConfig::default(),
            references: CacheConfig::default(),
            // Reachability changes slowly and is probed in bulk.
            url_validity: CacheConfig {
                capacity: 1_000,
                ttl_secs: 3_600,
            },
        }
    }
}

impl CachesConfig {
    fn sections(&self) -> [(&'static str, &CacheConfig); 5] {
        [
            ("terms", &self.terms),
            ("serp", &self.serp),
            ("video", &self.video),
            ("references", &self.references),
            ("url_validity", &self.url_validity),
        ]
    }
}

impl PostcraftConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns [`PostcraftError::Config`] naming the first offending section.
    pub fn validate(&self) -> Result<()> {
        let section = |name: &str, result: postcraft_fetch::Result<()>| {
            result.map_err(|e| PostcraftError::Config(format!("[{name}] {e}")))
        };
        section("http", self.http.validate())?;
        for (name, cache) in self.caches.sections() {
            section(&format!("caches.{name}"), cache.validate())?;
        }
        section("breaker", self.breaker.validate())?;
        section("retry", self.retry.validate())?;
        section("race", self.race.validate())?;
        section("crawl", self.crawl.validate())?;
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PostcraftError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PostcraftError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/postcraft/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("postcraft").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("postcraft")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/postcraft-config/config.toml")
        }
    }
}
