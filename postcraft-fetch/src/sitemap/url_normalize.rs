//! URL handling for sitemap entry points and frontier deduplication.
//!
//! Users type sitemap locations loosely (`example.com`, `www.example.com/`,
//! `https://example.com/sitemap.xml#top`). Entry normalisation turns those
//! into one fetchable URL; dedup keys make equivalent spellings of the same
//! sitemap or page collapse to one frontier entry.

use url::Url;

use crate::error::{FetchError, Result};

/// Path used when the entry names only a host.
pub const DEFAULT_SITEMAP_PATH: &str = "/sitemap.xml";

/// Parse user input as an http(s) URL, prefixing `https://` when the scheme
/// is omitted. Whitespace is trimmed and the fragment dropped.
///
/// # Errors
///
/// Returns [`FetchError::Validation`] for empty input, unparsable URLs and
/// non-http(s) schemes.
pub fn parse_site_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FetchError::Validation("sitemap URL is empty".into()));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };
    let mut url = Url::parse(&with_scheme)
        .map_err(|e| FetchError::Validation(format!("invalid sitemap URL {trimmed:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::Validation(format!(
            "unsupported scheme {:?} in {trimmed:?}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(FetchError::Validation(format!(
            "sitemap URL {trimmed:?} has no host"
        )));
    }
    url.set_fragment(None);
    Ok(url)
}

/// Returns `true` if `url` names a site rather than a document: root path
/// and no query.
pub fn is_site_root(url: &Url) -> bool {
    url.path() == "/" && url.query().is_none()
}

/// Normalise a crawl entry point.
///
/// A bare host or site root resolves to `/sitemap.xml` on that host; any
/// other path is kept as given.
///
/// ```
/// use postcraft_fetch::sitemap::normalize_entry_url;
///
/// assert_eq!(
///     normalize_entry_url(" example.com ").unwrap(),
///     "https://example.com/sitemap.xml"
/// );
/// ```
///
/// # Errors
///
/// See [`parse_site_url`].
pub fn normalize_entry_url(raw: &str) -> Result<String> {
    let mut url = parse_site_url(raw)?;
    if is_site_root(&url) {
        url.set_path(DEFAULT_SITEMAP_PATH);
    }
    Ok(url.into())
}

/// Key under which a sitemap or page URL is deduplicated.
///
/// Scheme and host are lowercased (by the parser), default ports and
/// fragments removed. Path and query are kept verbatim since both are
/// significant for sitemap pagination. Unparsable input is keyed by its
/// trimmed text.
pub fn dedup_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_owned();
    };
    url.set_fragment(None);
    if is_default_port(&url) {
        let _ = url.set_port(None);
    }
    url.into()
}

/// Resolve a `<loc>` value against the document it appeared in.
///
/// Returns `None` for empty values and anything that does not resolve to an
/// http(s) URL.
pub fn resolve_loc(base: &Url, loc: &str) -> Option<String> {
    let loc = loc.trim();
    if loc.is_empty() {
        return None;
    }
    let mut resolved = base.join(loc).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.into())
}

fn is_default_port(url: &Url) -> bool {
    matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_scheme_and_default_path() {
        assert_eq!(
            normalize_entry_url("example.com").unwrap(),
            "https://example.com/sitemap.xml"
        );
        assert_eq!(
            normalize_entry_url("http://Example.com/").unwrap(),
            "http://example.com/sitemap.xml"
        );
    }

    #[test]
    fn explicit_path_is_kept() {
        assert_eq!(
            normalize_entry_url("  https://example.com/post-sitemap.xml#frag ").unwrap(),
            "https://example.com/post-sitemap.xml"
        );
        assert_eq!(
            normalize_entry_url("example.com/?sitemap=1").unwrap(),
            "https://example.com/?sitemap=1"
        );
    }

    #[test]
    fn rejects_empty_and_foreign_schemes() {
        assert!(matches!(
            normalize_entry_url("   "),
            Err(FetchError::Validation(_))
        ));
        assert!(matches!(
            normalize_entry_url("ftp://example.com/sitemap.xml"),
            Err(FetchError::Validation(_))
        ));
        assert!(normalize_entry_url("https://").is_err());
    }

    #[test]
    fn dedup_key_collapses_equivalent_spellings() {
        let a = dedup_key("HTTPS://Example.COM:443/sitemap-1.xml#x");
        let b = dedup_key("https://example.com/sitemap-1.xml");
        assert_eq!(a, b);
    }

    #[test]
    fn dedup_key_keeps_query_and_path_case() {
        assert_ne!(
            dedup_key("https://example.com/sitemap.xml?page=1"),
            dedup_key("https://example.com/sitemap.xml?page=2")
        );
        assert_eq!(
            dedup_key("https://example.com/Posts.xml"),
            "https://example.com/Posts.xml"
        );
        assert_eq!(
            dedup_key("http://example.com:8080/a"),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn dedup_key_of_garbage_is_trimmed_text() {
        assert_eq!(dedup_key("  not a url "), "not a url");
    }

    #[test]
    fn relative_locs_resolve_against_document() {
        let base = Url::parse("https://example.com/sitemaps/index.xml").unwrap();
        assert_eq!(
            resolve_loc(&base, "posts.xml").as_deref(),
            Some("https://example.com/sitemaps/posts.xml")
        );
        assert_eq!(
            resolve_loc(&base, "/pages.xml").as_deref(),
            Some("https://example.com/pages.xml")
        );
        assert_eq!(
            resolve_loc(&base, " https://cdn.example.com/a.xml ").as_deref(),
            Some("https://cdn.example.com/a.xml")
        );
        assert_eq!(resolve_loc(&base, "mailto:x@example.com"), None);
        assert_eq!(resolve_loc(&base, "  "), None);
    }
}
