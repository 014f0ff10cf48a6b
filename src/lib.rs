//! Postcraft: blog post generation backed by resilient external data.
//!
//! This crate is the host side of the acquisition layer. It loads
//! configuration, builds the shared caches, breaker registry and HTTP client
//! once, and exposes them through [`Acquisition`]:
//!
//! - **Lookups**: search terms, result pages, videos and references, each
//!   cached per kind and degrading to an empty result when the upstream fails
//! - **Sitemaps**: discovery and bounded crawling of a site's sitemap tree
//!   through several racing transport paths
//!
//! The resilience building blocks themselves live in [`postcraft_fetch`].

pub mod acquisition;
pub mod config;
pub mod error;
pub mod telemetry;

pub use acquisition::{Acquisition, CacheKind};
pub use config::{CachesConfig, PostcraftConfig};
pub use error::{PostcraftError, Result};
