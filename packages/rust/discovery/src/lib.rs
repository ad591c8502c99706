//! Sitemap discovery.
//!
//! Before crawling a site, pdfaudit checks whether the origin publishes a
//! `sitemap.xml` or `sitemap_index.xml`. Document links listed there are
//! recorded directly, without visiting the pages that link to them.
//! Probe failures never abort a run.

mod parser;

use std::time::Duration;

use pdfaudit_shared::{AuditError, DEFAULT_USER_AGENT, Result};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

pub use parser::{DOCUMENT_EXTENSION, document_locs, is_document_url, parse_locs};

/// Sitemap locations probed at the origin, in probe order.
pub const SITEMAP_PATHS: [&str; 2] = ["/sitemap.xml", "/sitemap_index.xml"];

/// Maximum number of redirects to follow when fetching a sitemap.
const MAX_REDIRECTS: usize = 3;

/// Default timeout in seconds for fetching a sitemap.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum sitemap size we read (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for the sitemap probe.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Probe the sitemap locations at `url`'s origin and return the document URLs
/// they list, in sitemap order and without duplicates.
///
/// Missing sitemaps, HTTP errors and malformed bodies are logged at debug
/// level and yield an empty contribution.
#[instrument(skip_all, fields(url = %url))]
pub async fn probe_sitemaps(url: &Url, opts: &DiscoveryOptions) -> Vec<Url> {
    let origin = match origin_url(url) {
        Ok(origin) => origin,
        Err(e) => {
            debug!(error = %e, "cannot probe sitemaps");
            return Vec::new();
        }
    };

    let client = match build_client(opts) {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "cannot probe sitemaps");
            return Vec::new();
        }
    };

    let sitemap_url = format!("{origin}{}", SITEMAP_PATHS[0]);
    let index_url = format!("{origin}{}", SITEMAP_PATHS[1]);

    let (sitemap, index) = tokio::join!(
        fetch_sitemap(&client, &sitemap_url, MAX_RESPONSE_SIZE),
        fetch_sitemap(&client, &index_url, MAX_RESPONSE_SIZE),
    );

    let mut documents: Vec<Url> = Vec::new();
    for (location, body) in [(sitemap_url, sitemap), (index_url, index)] {
        match body {
            Ok(xml) => {
                let found = document_locs(&xml);
                debug!(%location, documents = found.len(), "sitemap parsed");
                for doc in found {
                    if !documents.contains(&doc) {
                        documents.push(doc);
                    }
                }
            }
            Err(e) => debug!(%location, error = %e, "sitemap not available"),
        }
    }

    if !documents.is_empty() {
        info!(documents = documents.len(), "documents listed in sitemaps");
    }
    documents
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
pub fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| AuditError::data(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(opts.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(opts.timeout)
        .build()
        .map_err(|e| AuditError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch a sitemap body, rejecting error statuses and bodies over `limit`
/// bytes (declared or streamed).
async fn fetch_sitemap(client: &Client, url: &str, limit: u64) -> Result<String> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AuditError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuditError::Network(format!("{url}: HTTP {status}")));
    }

    let too_large = |size: u64| {
        AuditError::data(format!("{url}: sitemap too large ({size} bytes, max {limit})"))
    };
    if let Some(len) = response.content_length() {
        if len > limit {
            return Err(too_large(len));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AuditError::Network(format!("{url}: failed to read body: {e}")))?
    {
        body.extend_from_slice(&chunk);
        if body.len() as u64 > limit {
            return Err(too_large(body.len() as u64));
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}
