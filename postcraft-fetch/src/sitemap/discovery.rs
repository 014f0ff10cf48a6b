//! Locating a site's sitemap when the user only gives a host.

use reqwest::header::ACCEPT;

use crate::error::{FetchError, Result};
use crate::http::text_or_upstream;
use crate::url_check::UrlChecker;

use super::parse::robots_sitemaps;
use super::url_normalize::{parse_site_url, resolve_loc};

/// Well-known sitemap locations probed in this order.
pub const CANDIDATE_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/wp-sitemap.xml",
    "/sitemap-index.xml",
];

const PROBE_CONCURRENCY: usize = 4;

/// Find sitemap URLs for `site`.
///
/// `Sitemap:` directives in `robots.txt` take precedence. Without any, the
/// [`CANDIDATE_PATHS`] are probed for reachability and the first reachable
/// one (in candidate order) is returned. An empty list means nothing was
/// found.
///
/// # Errors
///
/// Returns [`FetchError::Validation`] if `site` is not a usable URL.
pub async fn discover_sitemaps(site: &str, checker: &UrlChecker) -> Result<Vec<String>> {
    let mut root = parse_site_url(site)?;
    root.set_path("/");
    root.set_query(None);

    match fetch_robots(&root, checker.client()).await {
        Ok(listed) if !listed.is_empty() => {
            tracing::debug!(site = %root, count = listed.len(), "sitemaps listed in robots.txt");
            return Ok(listed);
        }
        Ok(_) => tracing::debug!(site = %root, "robots.txt lists no sitemaps"),
        Err(err) => tracing::debug!(site = %root, error = %err, "robots.txt unavailable"),
    }

    let candidates: Vec<String> = CANDIDATE_PATHS
        .iter()
        .filter_map(|path| resolve_loc(&root, path))
        .collect();
    let found = checker
        .filter_reachable(candidates, PROBE_CONCURRENCY, 1)
        .await;
    if found.is_empty() {
        tracing::info!(site = %root, "no sitemap found at well-known locations");
    }
    Ok(found)
}

async fn fetch_robots(root: &url::Url, client: &reqwest::Client) -> Result<Vec<String>> {
    let robots_url = root
        .join("/robots.txt")
        .map_err(|e| FetchError::Validation(format!("robots.txt URL: {e}")))?;
    let response = client
        .get(robots_url)
        .header(ACCEPT, "text/plain, */*")
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest("robots.txt", &e))?;
    let body = text_or_upstream("robots.txt", response).await?;
    Ok(robots_sitemaps(&body)
        .into_iter()
        .filter_map(|loc| resolve_loc(root, &loc))
        .collect())
}
