//! Shared HTTP client for upstream requests.
//!
//! Provides a configured [`reqwest::Client`] carrying the descriptive
//! client identifier and transparent brotli/gzip decompression. One client
//! is built at startup and cloned into every strategy (clones share the
//! connection pool).

use crate::config::HttpConfig;
use crate::error::FetchError;

/// Build a [`reqwest::Client`] from the given configuration.
///
/// The client has:
/// - `User-Agent` from config
/// - Transport timeout from config
/// - Bounded redirect following
/// - Brotli and gzip decompression
///
/// # Errors
///
/// Returns [`FetchError::Config`] if the configuration is invalid, or
/// [`FetchError::Http`] if the client cannot be constructed.
pub fn build_client(config: &HttpConfig) -> Result<reqwest::Client, FetchError> {
    config.validate()?;
    reqwest::Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .build()
        .map_err(|e| FetchError::Http(format!("failed to build HTTP client: {e}")))
}

/// Read a response body as text, mapping non-success statuses to
/// [`FetchError::Upstream`] with a short excerpt of the body.
pub(crate) async fn text_or_upstream(
    context: &str,
    response: reqwest::Response,
) -> Result<String, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(200).collect();
        return Err(FetchError::Upstream {
            status: Some(status.as_u16()),
            message: if excerpt.is_empty() {
                context.to_owned()
            } else {
                format!("{context}: {excerpt}")
            },
        });
    }
    response
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(context, &e))
}
