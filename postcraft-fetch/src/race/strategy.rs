//! Transport strategies for fetching one logical resource.
//!
//! Each strategy is one independent path to the same document: straight
//! from the origin, through our own server-side relay, or through a public
//! CORS relay. The [`RacingFetcher`](super::RacingFetcher) runs them side by
//! side and keeps the first valid answer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;

use crate::config::{RaceConfig, SITEMAP_ACCEPT};
use crate::error::{FetchError, Result};
use crate::http::text_or_upstream;

/// Default deadline for a direct fetch.
pub const DIRECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default deadline for the server-side relay.
pub const RELAY_TIMEOUT: Duration = Duration::from_secs(15);
/// Default deadline for a public proxy relay.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(8);

/// One way of retrieving raw text for a target URL.
///
/// All implementations must be `Send + Sync` so a single set of strategies
/// can serve concurrent races.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Name reported in race results and failure lists.
    fn name(&self) -> &str;

    /// Budget for one attempt of this strategy.
    fn timeout(&self) -> Duration;

    /// Fetch the raw body for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure or a non-success status.
    async fn fetch(&self, target: &str) -> Result<String>;
}

/// Fetch the target straight from its origin.
#[derive(Debug, Clone)]
pub struct DirectStrategy {
    client: reqwest::Client,
    timeout: Duration,
}

impl DirectStrategy {
    /// Create a direct strategy with the default deadline.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DIRECT_TIMEOUT,
        }
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    fn name(&self) -> &str {
        "direct"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &str) -> Result<String> {
        tracing::trace!(url = target, "direct fetch");
        let response = self
            .client
            .get(target)
            .header(ACCEPT, SITEMAP_ACCEPT)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest("direct fetch", &e))?;
        text_or_upstream("direct fetch", response).await
    }
}

/// Fetch the target through our own edge function.
///
/// The relay takes `POST {"url": target}` and answers either with the raw
/// document or with a JSON envelope `{"content": "..."}`.
#[derive(Debug, Clone)]
pub struct RelayStrategy {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RelayStrategy {
    /// Create a relay strategy posting to `endpoint`.
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout: RELAY_TIMEOUT,
        }
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Unwrap a relay response: a JSON object with a string `content` field
/// yields that field, anything else is taken as the document itself.
fn unwrap_relay_body(body: String) -> String {
    if !body.trim_start().starts_with('{') {
        return body;
    }
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(serde_json::Value::Object(mut map)) => match map.remove("content") {
            Some(serde_json::Value::String(content)) => content,
            _ => body,
        },
        _ => body,
    }
}

#[async_trait]
impl FetchStrategy for RelayStrategy {
    fn name(&self) -> &str {
        "via-edge-function"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &str) -> Result<String> {
        tracing::trace!(url = target, endpoint = %self.endpoint, "relay fetch");
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, SITEMAP_ACCEPT)
            .json(&serde_json::json!({ "url": target }))
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest("relay fetch", &e))?;
        let body = text_or_upstream("relay fetch", response).await?;
        Ok(unwrap_relay_body(body))
    }
}

/// Fetch the target through a public relay addressed by URL template.
#[derive(Debug, Clone)]
pub struct ProxyStrategy {
    name: String,
    client: reqwest::Client,
    template: String,
    timeout: Duration,
}

impl ProxyStrategy {
    /// Create a proxy strategy. `template` must contain `{url}`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the placeholder is missing.
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        template: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        let template = template.into();
        if !template.contains("{url}") {
            return Err(FetchError::Config(format!(
                "proxy {name} template must contain {{url}}"
            )));
        }
        Ok(Self {
            name,
            client,
            template,
            timeout: PROXY_TIMEOUT,
        })
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The relay URL used for `target`.
    pub fn request_url(&self, target: &str) -> String {
        self.template
            .replace("{url}", &urlencoding::encode(target))
    }
}

#[async_trait]
impl FetchStrategy for ProxyStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &str) -> Result<String> {
        let request_url = self.request_url(target);
        tracing::trace!(url = target, strategy = %self.name, "proxy fetch");
        let response = self
            .client
            .get(&request_url)
            .header(ACCEPT, SITEMAP_ACCEPT)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&self.name, &e))?;
        text_or_upstream(&self.name, response).await
    }
}

/// A strategy backed by an async closure.
pub struct FnStrategy<F> {
    name: String,
    timeout: Duration,
    fetch: F,
}

impl<F, Fut> FnStrategy<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    /// Wrap `fetch` as a named strategy.
    pub fn new(name: impl Into<String>, timeout: Duration, fetch: F) -> Self {
        Self {
            name: name.into(),
            timeout,
            fetch,
        }
    }
}

#[async_trait]
impl<F, Fut> FetchStrategy for FnStrategy<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, target: &str) -> Result<String> {
        (self.fetch)(target.to_owned()).await
    }
}

/// Build the configured strategy set: relay, direct, then proxies.
///
/// # Errors
///
/// Returns [`FetchError::Config`] if the configuration is invalid.
pub fn strategies_from_config(
    config: &RaceConfig,
    client: &reqwest::Client,
) -> Result<Vec<Arc<dyn FetchStrategy>>> {
    config.validate()?;
    let mut strategies: Vec<Arc<dyn FetchStrategy>> = Vec::new();

    if let Some(endpoint) = &config.relay_endpoint {
        strategies.push(Arc::new(
            RelayStrategy::new(client.clone(), endpoint.clone())
                .with_timeout(Duration::from_millis(config.relay_timeout_ms)),
        ));
    }
    if config.direct {
        strategies.push(Arc::new(
            DirectStrategy::new(client.clone())
                .with_timeout(Duration::from_millis(config.direct_timeout_ms)),
        ));
    }
    for proxy in &config.proxies {
        strategies.push(Arc::new(
            ProxyStrategy::new(proxy.name.clone(), client.clone(), proxy.template.clone())?
                .with_timeout(Duration::from_millis(proxy.timeout_ms)),
        ));
    }
    Ok(strategies)
}
