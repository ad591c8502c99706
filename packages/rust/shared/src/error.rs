//! Error types for pdfaudit.
//!
//! Library crates use [`AuditError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all pdfaudit operations.
///
/// Variants follow failure classes so callers can tell retryable
/// conditions from fatal ones (see [`AuditError::is_retryable`]).
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during crawl, download, or heartbeat.
    #[error("network error: {0}")]
    Network(String),

    /// A download ended before the advertised body length was received.
    #[error("incomplete download from {url}: received {received} of {expected} bytes")]
    IncompleteDownload {
        url: String,
        expected: u64,
        received: u64,
    },

    /// An external tool or request did not finish in time.
    #[error("{what} timed out after {}s", .after.as_secs_f64())]
    Timeout { what: String, after: Duration },

    /// An external tool could not be spawned or exited abnormally.
    #[error("{program} failed: {message}")]
    Subprocess { program: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed data (document, sitemap, JSON artifact, archive).
    #[error("data error: {message}")]
    Data { message: String },

    /// Job runner failure (queue closed, worker panicked).
    #[error("job error: {0}")]
    Job(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AuditError>;

impl AuditError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a data error from any displayable message.
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data {
            message: msg.into(),
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Create a subprocess error for the named program.
    pub fn subprocess(program: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Subprocess {
            program: program.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::IncompleteDownload { .. } | Self::Timeout { .. }
        )
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
