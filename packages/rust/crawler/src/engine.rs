//! Domain-scoped, breadth-first document crawler.
//!
//! The crawler first records the documents listed in the origin's sitemaps,
//! then walks HTML pages breadth-first from the start URL, recording every
//! linked document and following in-domain page links up to the depth limit.

use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use pdfaudit_discovery::{DiscoveryOptions, is_document_url, probe_sitemaps};
use pdfaudit_shared::{AuditError, CrawlConfig, Result};

use crate::ledger::DocumentLedger;

/// Extensions of binary/media resources that are never fetched as pages.
const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".zip", ".gz", ".mp3", ".mp4",
    ".avi", ".mov", ".webm",
];

/// Link prefixes that never lead to a fetchable page.
const SKIPPED_PREFIXES: &[&str] = &["#", "javascript:", "mailto:", "tel:"];

// ---------------------------------------------------------------------------
// CrawlScope
// ---------------------------------------------------------------------------

/// Immutable per-run crawl limits.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    pub start_url: Url,
    /// Host (and port) with any `www.` prefix removed, lowercase.
    pub allowed_domain: String,
    pub max_pages: usize,
    pub max_depth: u32,
}

impl CrawlScope {
    pub fn new(start_url: Url, max_pages: usize, max_depth: u32) -> Result<Self> {
        match start_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(AuditError::data(format!(
                    "unsupported URL scheme '{other}': {start_url}"
                )));
            }
        }
        let allowed_domain = normalized_domain(&start_url)
            .ok_or_else(|| AuditError::data(format!("URL has no host: {start_url}")))?;

        Ok(Self {
            start_url,
            allowed_domain,
            max_pages,
            max_depth,
        })
    }

    /// Same domain as the start URL; `www.` is optional, subdomains are not.
    pub fn in_domain(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && normalized_domain(url).is_some_and(|d| d == self.allowed_domain)
    }
}

/// Lowercase host without a leading `www.`, plus an explicit port if any.
fn normalized_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

fn is_media_url(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Summary of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// Discovered documents in discovery order, without duplicates.
    pub documents: Vec<Url>,
    /// Documents that came from sitemaps.
    pub from_sitemaps: usize,
    /// Pages taken from the frontier, failed ones included.
    pub pages_scanned: usize,
    /// Pages that could not be fetched or were refused.
    pub pages_failed: usize,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

pub struct Crawler {
    config: CrawlConfig,
    client: Client,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuditError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Crawl `scope`, recording every discovered document in `ledger`.
    #[instrument(skip_all, fields(start_url = %scope.start_url, max_pages = scope.max_pages, max_depth = scope.max_depth))]
    pub async fn crawl(&self, scope: &CrawlScope, ledger: &mut DocumentLedger) -> Result<CrawlResult> {
        let start_time = Instant::now();
        info!(domain = %scope.allowed_domain, "starting crawl");

        let discovery = DiscoveryOptions {
            timeout: self.config.request_timeout,
            user_agent: self.config.user_agent.clone(),
        };
        let mut from_sitemaps = 0;
        for doc in probe_sitemaps(&scope.start_url, &discovery).await {
            if ledger.record_if_new(&doc)? {
                from_sitemaps += 1;
            }
        }

        let mut frontier: VecDeque<(Url, u32)> = VecDeque::from([(scope.start_url.clone(), 0)]);
        let mut visited: HashSet<String> = HashSet::from([normalize_url(&scope.start_url)]);
        let mut pages_scanned = 0;
        let mut pages_failed = 0;

        while pages_scanned < scope.max_pages {
            let Some((url, depth)) = frontier.pop_front() else {
                break;
            };

            if pages_scanned % 10 == 0 || depth == 0 {
                info!(page = pages_scanned + 1, of = scope.max_pages, depth, %url, "scanning");
            } else {
                debug!(page = pages_scanned + 1, depth, %url, "scanning");
            }
            pages_scanned += 1;

            let links = match self.fetch_links(&url).await {
                Ok(Some(links)) => links,
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(%url, error = %e, "page failed, continuing");
                    pages_failed += 1;
                    Vec::new()
                }
            };

            for link in links {
                if is_document_url(&link) {
                    ledger.record_if_new(&link)?;
                } else if depth < scope.max_depth
                    && scope.in_domain(&link)
                    && !is_media_url(&link)
                    && visited.insert(normalize_url(&link))
                {
                    frontier.push_back((link, depth + 1));
                }
            }

            if !self.config.politeness_delay.is_zero() && pages_scanned < scope.max_pages {
                tokio::time::sleep(self.config.politeness_delay).await;
            }
        }

        let result = CrawlResult {
            documents: ledger.documents().to_vec(),
            from_sitemaps,
            pages_scanned,
            pages_failed,
            duration: start_time.elapsed(),
        };

        info!(
            documents = result.documents.len(),
            from_sitemaps = result.from_sitemaps,
            pages_scanned = result.pages_scanned,
            pages_failed = result.pages_failed,
            duration_ms = result.duration.as_millis(),
            "crawl completed"
        );

        Ok(result)
    }

    /// Fetch a page and return its links, or `None` when it is not HTML.
    async fn fetch_links(&self, url: &Url) -> Result<Option<Vec<Url>>> {
        if !self.config.allow_private_hosts && is_ssrf_target(url) {
            return Err(AuditError::Network(format!(
                "{url}: refusing private or loopback host"
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| AuditError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Network(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("text/html") {
            debug!(%url, %content_type, "not HTML, links not followed");
            return Ok(None);
        }

        // Links are resolved against the final URL after redirects.
        let base = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| AuditError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(Some(extract_links(&body, &base)))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Link extraction
// ---------------------------------------------------------------------------

static LINK_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("a[href]").expect("link selector"));

/// Extract all `<a href>` targets, resolved against `base_url`, fragments stripped.
fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();

    for el in doc.select(&LINK_SELECTOR) {
        let Some(href) = el.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || SKIPPED_PREFIXES.iter().any(|p| href.starts_with(p)) {
            continue;
        }
        if let Ok(mut resolved) = base_url.join(href) {
            resolved.set_fragment(None);
            links.push(resolved);
        }
    }

    links
}

/// Normalize a URL for the visited set (no fragment, no trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}
