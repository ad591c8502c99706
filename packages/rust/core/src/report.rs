//! Report rendering.
//!
//! The audit service hands a finished run to a [`ReportRenderer`]. The
//! default [`JsonReportRenderer`] publishes the result set together with the
//! report header (site, checker version, settings, status counts).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use pdfaudit_shared::{AuditError, Result, ValidationRecord, ValidationStatus};

/// Everything a renderer needs to describe one run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportInput<'a> {
    pub base_url: &'a str,
    pub validator_version: &'a str,
    pub max_pages: usize,
    pub depth: u32,
    pub generated_at: DateTime<Utc>,
    pub records: &'a [ValidationRecord],
}

/// Status counts for the report header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub repaired: usize,
}

impl StatusCounts {
    pub fn of(records: &[ValidationRecord]) -> Self {
        let mut counts = Self {
            total: records.len(),
            ..Self::default()
        };
        for r in records {
            match r.status {
                ValidationStatus::Pass => counts.pass += 1,
                ValidationStatus::Fail => counts.fail += 1,
                ValidationStatus::Error | ValidationStatus::Unknown => counts.error += 1,
            }
            if r.repaired {
                counts.repaired += 1;
            }
        }
        counts
    }
}

pub trait ReportRenderer: Send + Sync {
    /// Write the report for `input` next to `base` (a path without
    /// extension) and return the artifact path.
    fn render(&self, input: &ReportInput<'_>, base: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportRenderer;

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    input: &'a ReportInput<'a>,
    summary: StatusCounts,
}

impl ReportRenderer for JsonReportRenderer {
    fn render(&self, input: &ReportInput<'_>, base: &Path) -> Result<PathBuf> {
        let path = with_suffix(base, "_report.json");
        let report = JsonReport {
            input,
            summary: StatusCounts::of(input.records),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| AuditError::data(format!("serialize report: {e}")))?;
        std::fs::write(&path, json).map_err(|e| AuditError::io(&path, e))?;
        Ok(path)
    }
}

/// `base` with `suffix` appended to its file name.
pub(crate) fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: ValidationStatus, repaired: bool) -> ValidationRecord {
        let mut r = ValidationRecord::new("https://example.com/a.pdf", "a.pdf");
        r.status = status;
        r.repaired = repaired;
        r
    }

    #[test]
    fn counts_statuses() {
        let records = vec![
            record(ValidationStatus::Pass, false),
            record(ValidationStatus::Fail, true),
            record(ValidationStatus::Fail, false),
            record(ValidationStatus::Error, false),
        ];
        assert_eq!(
            StatusCounts::of(&records),
            StatusCounts {
                total: 4,
                pass: 1,
                fail: 2,
                error: 1,
                repaired: 1
            }
        );
    }

    #[test]
    fn json_report_has_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record(ValidationStatus::Pass, false)];
        let input = ReportInput {
            base_url: "https://example.com",
            validator_version: "veraPDF 1.26",
            max_pages: 10,
            depth: 2,
            generated_at: Utc::now(),
            records: &records,
        };

        let path = JsonReportRenderer
            .render(&input, &dir.path().join("REPORT_x"))
            .unwrap();
        assert_eq!(path, dir.path().join("REPORT_x_report.json"));

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["base_url"], "https://example.com");
        assert_eq!(value["validator_version"], "veraPDF 1.26");
        assert_eq!(value["summary"]["pass"], 1);
        assert_eq!(value["records"][0]["status"], "PASS");
    }
}
