//! Error types for the postcraft-fetch crate.
//!
//! All errors carry owned string payloads so a single failure can be cloned
//! and delivered to every caller waiting on the same in-flight computation.
//! Messages are stable and lowercase for display and log correlation.

use std::fmt;
use std::time::Duration;

/// Why a single racing strategy did not produce the winning result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Strategy name, e.g. `"direct"` or `"via-proxy-a"`.
    pub strategy: String,
    /// Human-readable failure reason.
    pub reason: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Errors that can occur while acquiring data from upstream services.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// A deadline elapsed before the operation completed. Any late result is discarded.
    #[error("{label} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Label of the guarded operation.
        label: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// Fetched content failed a type or shape check.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The remote service answered with a non-success status.
    #[error("upstream error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Upstream {
        /// HTTP status code, when one was received.
        status: Option<u16>,
        /// Response excerpt or description.
        message: String,
    },

    /// Transport-level failure (connect, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// A document could not be parsed, even by the fallback extractor.
    #[error("parse error: {0}")]
    Parse(String),

    /// The named dependency's circuit is open; no call was made.
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    /// Every racing strategy failed or returned invalid content.
    #[error("all strategies failed: {}", join_failures(.0))]
    AllStrategiesFailed(Vec<StrategyFailure>),

    /// A sitemap crawl finished without discovering a single page URL.
    #[error("no URLs found in sitemap {entry} ({} sitemap(s) failed)", .failures.len())]
    NoUrlsFound {
        /// The entry sitemap URL.
        entry: String,
        /// `(sitemap_url, reason)` for each sitemap that failed.
        failures: Vec<(String, String)>,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl FetchError {
    /// Returns `true` for failure classes worth retrying: timeouts, transport
    /// errors, rate limiting and server-side (5xx) responses.
    ///
    /// Validation, parse, configuration and client (4xx) errors are never
    /// transient: repeating the same request will not change the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http(_) => true,
            Self::Upstream { status, .. } => match status {
                Some(code) => *code == 429 || *code >= 500,
                None => true,
            },
            _ => false,
        }
    }

    /// Build a [`FetchError::Timeout`].
    pub fn timeout(label: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            label: label.into(),
            after,
        }
    }

    /// Map a [`reqwest::Error`] into the matching variant.
    pub fn from_reqwest(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                label: context.to_owned(),
                after: Duration::ZERO,
            }
        } else if let Some(status) = err.status() {
            Self::Upstream {
                status: Some(status.as_u16()),
                message: format!("{context}: {err}"),
            }
        } else {
            Self::Http(format!("{context}: {err}"))
        }
    }
}

fn join_failures(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no strategies configured".to_owned();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience type alias for postcraft-fetch results.
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_timeout() {
        let err = FetchError::timeout("serp lookup", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "serp lookup timed out after 1500ms");
    }

    #[test]
    fn display_upstream_with_status() {
        let err = FetchError::Upstream {
            status: Some(503),
            message: "service unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "upstream error (HTTP 503): service unavailable"
        );
    }

    #[test]
    fn display_upstream_without_status() {
        let err = FetchError::Upstream {
            status: None,
            message: "empty body".into(),
        };
        assert_eq!(err.to_string(), "upstream error: empty body");
    }

    #[test]
    fn display_aggregate_names_every_strategy() {
        let err = FetchError::AllStrategiesFailed(vec![
            StrategyFailure {
                strategy: "direct".into(),
                reason: "HTTP error: connection refused".into(),
            },
            StrategyFailure {
                strategy: "via-proxy-a".into(),
                reason: "validation failed: not a sitemap".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("direct: HTTP error: connection refused"));
        assert!(msg.contains("via-proxy-a: validation failed"));
    }

    #[test]
    fn display_aggregate_empty() {
        let err = FetchError::AllStrategiesFailed(vec![]);
        assert_eq!(
            err.to_string(),
            "all strategies failed: no strategies configured"
        );
    }

    #[test]
    fn display_no_urls_found() {
        let err = FetchError::NoUrlsFound {
            entry: "https://example.com/sitemap.xml".into(),
            failures: vec![("https://example.com/sitemap.xml".into(), "404".into())],
        };
        assert_eq!(
            err.to_string(),
            "no URLs found in sitemap https://example.com/sitemap.xml (1 sitemap(s) failed)"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::timeout("x", Duration::from_secs(1)).is_transient());
        assert!(FetchError::Http("reset".into()).is_transient());
        assert!(FetchError::Upstream {
            status: Some(502),
            message: String::new()
        }
        .is_transient());
        assert!(FetchError::Upstream {
            status: Some(429),
            message: String::new()
        }
        .is_transient());
        assert!(!FetchError::Upstream {
            status: Some(404),
            message: String::new()
        }
        .is_transient());
        assert!(!FetchError::Validation("html".into()).is_transient());
        assert!(!FetchError::Parse("bad".into()).is_transient());
        assert!(!FetchError::CircuitOpen("serp".into()).is_transient());
    }

    #[test]
    fn error_is_send_sync_clone() {
        fn assert_bounds<T: Send + Sync + Clone>() {}
        assert_bounds::<FetchError>();
    }
}
