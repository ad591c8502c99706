//! Core domain types for pdfaudit runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder used when document metadata is missing.
pub const UNKNOWN: &str = "Unknown";

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for audit job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// First 8 hex characters, used in directory and file names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// AuditRequest
// ---------------------------------------------------------------------------

/// Parameters of a single audit run, as received from the trigger interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRequest {
    /// Start URL of the crawl.
    pub url: String,
    /// Maximum number of HTML pages to scan.
    pub max_pages: usize,
    /// Maximum link depth from the start URL.
    pub depth: u32,
    /// Request semantic reconstruction for failing documents.
    #[serde(default)]
    pub force_ai: bool,
}

// ---------------------------------------------------------------------------
// ValidationStatus
// ---------------------------------------------------------------------------

/// Verdict of one conformance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Pass,
    Fail,
    Error,
    #[default]
    Unknown,
}

impl ValidationStatus {
    /// Sort rank for result sets: PASS before FAIL before everything else.
    pub fn severity_rank(self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
            Self::Error | Self::Unknown => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ValidationRecord
// ---------------------------------------------------------------------------

/// Result for one document after pipeline processing.
///
/// `status` is the strict-profile verdict; it decides whether a repair is
/// attempted and where the record sorts in the result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Original document URL.
    pub url: String,
    /// File name derived from the URL path.
    pub filename: String,
    /// Strict-profile verdict.
    pub status: ValidationStatus,
    /// Strict-profile detail line.
    pub details: String,
    /// Profile name reported by the validator (`?` when unknown).
    pub profile: String,
    /// Screen-reader profile verdict.
    pub screen_reader_status: ValidationStatus,
    /// Screen-reader profile detail line.
    pub screen_reader_details: String,
    /// Document author from the info dictionary.
    pub author: String,
    /// Formatted creation date from the info dictionary.
    pub date: String,
    /// Whether a repaired artifact was produced.
    pub repaired: bool,
    /// Location of the repaired artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repaired_path: Option<String>,
    /// Strict-profile verdict of the repaired artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_after: Option<ValidationStatus>,
}

impl ValidationRecord {
    /// A fresh record for a document that has not been processed yet.
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            status: ValidationStatus::Unknown,
            details: String::new(),
            profile: String::new(),
            screen_reader_status: ValidationStatus::Unknown,
            screen_reader_details: String::new(),
            author: UNKNOWN.to_string(),
            date: UNKNOWN.to_string(),
            repaired: false,
            repaired_path: None,
            status_after: None,
        }
    }
}

/// Stable sort by severity; ties keep discovery order.
pub fn sort_by_severity(records: &mut [ValidationRecord]) {
    records.sort_by_key(|r| r.status.severity_rank());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&ValidationStatus::Pass).unwrap();
        assert_eq!(json, r#""PASS""#);
        let parsed: ValidationStatus = serde_json::from_str(r#""ERROR""#).unwrap();
        assert_eq!(parsed, ValidationStatus::Error);
    }

    #[test]
    fn record_omits_absent_repair_fields() {
        let record = ValidationRecord::new("https://example.com/a.pdf", "a.pdf");
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("repaired_path"));
        assert!(!json.contains("status_after"));
        assert!(json.contains(r#""author":"Unknown""#));
    }

    #[test]
    fn severity_sort_is_stable() {
        let mut records: Vec<ValidationRecord> = [
            ("e1", ValidationStatus::Error),
            ("f1", ValidationStatus::Fail),
            ("p1", ValidationStatus::Pass),
            ("u1", ValidationStatus::Unknown),
            ("f2", ValidationStatus::Fail),
            ("p2", ValidationStatus::Pass),
        ]
        .into_iter()
        .map(|(name, status)| {
            let mut r = ValidationRecord::new(name, name);
            r.status = status;
            r
        })
        .collect();

        sort_by_severity(&mut records);

        let order: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(order, ["p1", "p2", "f1", "f2", "e1", "u1"]);
        assert!(
            records
                .windows(2)
                .all(|w| w[0].status.severity_rank() <= w[1].status.severity_rank())
        );
    }
}
