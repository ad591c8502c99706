//! Discovered-document ledger and the link-list artifact.
//!
//! The link list is a plain text file: a `# Crawl Results for <url>` header,
//! then one absolute document URL per line. Each URL is flushed as soon as it
//! is recorded so an interrupted crawl keeps its partial results.

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use url::Url;

use pdfaudit_shared::{AuditError, Result};

// ---------------------------------------------------------------------------
// LinkListWriter
// ---------------------------------------------------------------------------

/// Append-only writer for the link-list artifact.
#[derive(Debug)]
pub struct LinkListWriter {
    path: PathBuf,
    file: File,
}

impl LinkListWriter {
    /// Create (or truncate) the link list and write its header.
    pub fn create(path: &Path, start_url: &Url) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::io(parent, e))?;
        }
        let mut file = File::create(path).map_err(|e| AuditError::io(path, e))?;
        writeln!(file, "# Crawl Results for {start_url}\n")
            .and_then(|()| file.flush())
            .map_err(|e| AuditError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one URL and flush it to disk.
    pub fn append(&mut self, url: &Url) -> Result<()> {
        writeln!(self.file, "{url}")
            .and_then(|()| self.file.flush())
            .map_err(|e| AuditError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a link list, skipping comment lines, blank lines and invalid URLs.
pub fn read_link_list(path: &Path) -> Result<Vec<Url>> {
    let content = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;

    let mut urls = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match Url::parse(line) {
            Ok(url) => urls.push(url),
            Err(e) => warn!(line, error = %e, "skipping invalid link-list entry"),
        }
    }
    Ok(urls)
}

// ---------------------------------------------------------------------------
// DocumentLedger
// ---------------------------------------------------------------------------

/// Ordered, duplicate-free set of discovered document URLs.
#[derive(Debug, Default)]
pub struct DocumentLedger {
    seen: HashSet<String>,
    documents: Vec<Url>,
    sink: Option<LinkListWriter>,
}

impl DocumentLedger {
    /// A ledger that keeps documents in memory only.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A ledger that also appends every new document to `sink`.
    pub fn with_sink(sink: LinkListWriter) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    /// Record `url` unless it was recorded before. Returns whether it was new.
    pub fn record_if_new(&mut self, url: &Url) -> Result<bool> {
        if !self.seen.insert(url.as_str().to_string()) {
            debug!(%url, "document already recorded");
            return Ok(false);
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.append(url)?;
        }
        info!(document = file_label(url), "document found");
        self.documents.push(url.clone());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Documents in discovery order.
    pub fn documents(&self) -> &[Url] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<Url> {
        self.documents
    }
}

/// Last path segment, for log lines.
fn file_label(url: &Url) -> &str {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or(url.as_str())
}
