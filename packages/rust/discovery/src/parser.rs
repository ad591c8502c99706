//! Sitemap `<loc>` extraction and document URL detection.
//!
//! Both `<urlset>` and `<sitemapindex>` files are handled the same way: every
//! `<loc>` value is collected, and only the ones whose path ends in the
//! document extension are kept. Nested sitemaps are not followed.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Target document extension (compared case-insensitively).
pub const DOCUMENT_EXTENSION: &str = ".pdf";

/// Matches `<loc>…</loc>`, including values split across lines.
static LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>").expect("loc regex"));

/// Extract every `<loc>` value in document order, with XML entities decoded.
pub fn parse_locs(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .map(|caps| unescape_xml(&caps[1]))
        .filter(|loc| !loc.is_empty())
        .collect()
}

/// Whether the URL path ends in the document extension.
pub fn is_document_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(DOCUMENT_EXTENSION)
}

/// Parse `<loc>` values and keep the absolute document URLs, deduplicated.
pub fn document_locs(xml: &str) -> Vec<Url> {
    let mut out: Vec<Url> = Vec::new();
    for loc in parse_locs(xml) {
        let Ok(url) = Url::parse(&loc) else {
            tracing::debug!(%loc, "skipping unparseable sitemap entry");
            continue;
        };
        if is_document_url(&url) && !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

fn unescape_xml(raw: &str) -> String {
    raw.trim()
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
