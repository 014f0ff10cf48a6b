//! Sitemap document parsing.
//!
//! Parsing is two-tier. The strict tier runs a real XML reader and only
//! accepts well-formed `<urlset>` / `<sitemapindex>` documents. When that
//! fails (truncated responses, stray HTML, broken entities) the fallback
//! tier scans the raw text for `<loc>` elements. Only if both come up empty
//! is the document rejected.

use std::sync::LazyLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::error::{FetchError, Result};

/// What a sitemap document lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    /// `<sitemapindex>`: entries are child sitemaps.
    Index,
    /// `<urlset>`: entries are pages.
    UrlSet,
}

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSitemap {
    /// Document type.
    pub kind: SitemapKind,
    /// `<loc>` values in document order, trimmed and unescaped.
    pub locs: Vec<String>,
    /// `true` when the strict parse failed and the fallback scan was used.
    pub recovered: bool,
}

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</loc>")
        .expect("invalid loc regex")
});

static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:[a-z0-9_]+:)?(?:sitemapindex|sitemap)[\s>]")
        .expect("invalid sitemap index regex")
});

/// Parse a sitemap document.
///
/// # Errors
///
/// Returns [`FetchError::Parse`] if neither tier can make sense of `text`.
pub fn parse_sitemap(text: &str) -> Result<ParsedSitemap> {
    match parse_strict(text) {
        Ok(parsed) => Ok(parsed),
        Err(strict_err) => {
            tracing::debug!(error = %strict_err, "strict sitemap parse failed; scanning for <loc>");
            parse_lenient(text).ok_or_else(|| {
                FetchError::Parse(format!("no sitemap entries found ({strict_err})"))
            })
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_owned(),
        None => name.into_owned(),
    }
}

fn root_kind(name: &str) -> std::result::Result<SitemapKind, String> {
    match name {
        "urlset" => Ok(SitemapKind::UrlSet),
        "sitemapindex" => Ok(SitemapKind::Index),
        other => Err(format!("unexpected root element <{other}>")),
    }
}

fn parse_strict(text: &str) -> std::result::Result<ParsedSitemap, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut kind = None;
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut locs = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if stack.is_empty() {
                    kind = Some(root_kind(&name)?);
                }
                let entry_parent = matches!(
                    stack.last().map(String::as_str),
                    Some("url") | Some("sitemap")
                );
                if name == "loc" && entry_parent {
                    current = Some(String::new());
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) if stack.is_empty() => {
                kind = Some(root_kind(&local_name(e.name().as_ref()))?);
            }
            Ok(Event::End(_)) => {
                if stack.pop().as_deref() == Some("loc") {
                    if let Some(loc) = current.take() {
                        let loc = loc.trim();
                        if !loc.is_empty() {
                            locs.push(loc.to_owned());
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(buf) = current.as_mut() {
                    let value = t.unescape().map_err(|e| e.to_string())?;
                    buf.push_str(&value);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(buf) = current.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                ))
            }
        }
    }

    if !stack.is_empty() {
        return Err(format!("document truncated inside <{}>", stack.join("><")));
    }
    let kind = kind.ok_or_else(|| "document has no root element".to_owned())?;
    Ok(ParsedSitemap {
        kind,
        locs,
        recovered: false,
    })
}

fn parse_lenient(text: &str) -> Option<ParsedSitemap> {
    let locs: Vec<String> = LOC_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let raw = m.as_str().trim();
            quick_xml::escape::unescape(raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_owned())
        })
        .filter(|loc| !loc.is_empty())
        .collect();
    if locs.is_empty() {
        return None;
    }
    let kind = if INDEX_RE.is_match(text) {
        SitemapKind::Index
    } else {
        SitemapKind::UrlSet
    };
    Some(ParsedSitemap {
        kind,
        locs,
        recovered: true,
    })
}

/// Extract `Sitemap:` directives from a `robots.txt` body, in order and
/// without duplicates.
pub fn robots_sitemaps(robots: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in robots.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("sitemap") {
            continue;
        }
        let value = value.trim();
        if !value.is_empty() && !found.iter().any(|f| f == value) {
            found.push(value.to_owned());
        }
    }
    found
}
