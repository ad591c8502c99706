//! Classification of the checker's text report.

use pdfaudit_shared::ValidationStatus;

/// Profile name used when the report does not name one.
pub const UNKNOWN_PROFILE: &str = "?";

/// Status, detail line and profile name parsed from one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: ValidationStatus,
    pub details: String,
    pub profile: String,
}

/// Classify the first line of a checker report.
///
/// The checked file's path is removed and whitespace collapsed so the detail
/// line is stable across runs. The profile name is the last token.
pub fn classify(text: &str, document_path: &str) -> Classification {
    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(first_line) = first_line else {
        return Classification {
            status: ValidationStatus::Error,
            details: "No output".into(),
            profile: UNKNOWN_PROFILE.into(),
        };
    };

    let without_path = if document_path.is_empty() {
        first_line.to_string()
    } else {
        first_line.replace(document_path, "")
    };
    let tokens: Vec<&str> = without_path.split_whitespace().collect();
    let clean = tokens.join(" ");

    let profile = match tokens.as_slice() {
        [_, .., last] => (*last).to_string(),
        _ => UNKNOWN_PROFILE.to_string(),
    };

    if clean.contains("PASS") {
        Classification {
            status: ValidationStatus::Pass,
            details: clean,
            profile,
        }
    } else if clean.contains("FAIL") {
        Classification {
            status: ValidationStatus::Fail,
            details: clean,
            profile,
        }
    } else {
        Classification {
            status: ValidationStatus::Error,
            details: format!("VeraPDF Error: {clean}"),
            profile: UNKNOWN_PROFILE.into(),
        }
    }
}
