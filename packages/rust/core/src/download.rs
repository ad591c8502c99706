//! Document download with retry on transient failures.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use url::Url;

use pdfaudit_shared::{AuditError, DownloadConfig, Result};

#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    config: DownloadConfig,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| AuditError::Network(format!("client build: {e}")))?;
        Ok(Self { client, config })
    }

    /// Download `url` into `dest`, retrying network errors, timeouts and
    /// truncated bodies. Returns the number of bytes written.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn download(&self, url: &Url, dest: &Path) -> Result<u64> {
        let outcome = self
            .config
            .retry
            .run("download", |attempt| self.fetch_once(url, dest, attempt.budget))
            .await;
        outcome.result
    }

    async fn fetch_once(&self, url: &Url, dest: &Path, timeout: Duration) -> Result<u64> {
        let mut response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(url, timeout, e))?;

        let status = response.status();
        if status.is_client_error() {
            // Not transient; retrying would not help.
            return Err(AuditError::data(format!("{url}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AuditError::Network(format!("{url}: HTTP {status}")));
        }

        let expected = response.content_length();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| AuditError::io(dest, e))?;

        let mut received: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| request_error(url, timeout, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| AuditError::io(dest, e))?;
            received += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| AuditError::io(dest, e))?;

        check_complete(url, expected, received)?;
        debug!(bytes = received, "document downloaded");
        Ok(received)
    }
}

fn request_error(url: &Url, timeout: Duration, e: reqwest::Error) -> AuditError {
    if e.is_timeout() {
        AuditError::timeout(format!("GET {url}"), timeout)
    } else {
        AuditError::Network(format!("{url}: {e}"))
    }
}

/// A body shorter than the announced `Content-Length` is an incomplete download.
fn check_complete(url: &Url, expected: Option<u64>, received: u64) -> Result<()> {
    match expected {
        Some(expected) if received < expected => Err(AuditError::IncompleteDownload {
            url: url.to_string(),
            expected,
            received,
        }),
        _ => Ok(()),
    }
}

/// File name for a document: the last URL path segment, or `doc_<index>.pdf`.
pub fn document_filename(url: &Url, index: usize) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("doc_{index}.pdf"))
}
