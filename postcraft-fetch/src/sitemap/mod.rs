//! Sitemap discovery, parsing and bounded crawling.

mod crawler;
mod discovery;
mod parse;
mod url_normalize;

pub use crawler::{
    CrawlObserver, CrawlProgress, CrawlReport, ProgressCallback, SitemapCrawler, SitemapFailure,
    SitemapSource, StopReason, UrlBatchCallback,
};
pub use discovery::{discover_sitemaps, CANDIDATE_PATHS};
pub use parse::{parse_sitemap, robots_sitemaps, ParsedSitemap, SitemapKind};
pub use url_normalize::{
    dedup_key, is_site_root, normalize_entry_url, parse_site_url, resolve_loc,
    DEFAULT_SITEMAP_PATH,
};
