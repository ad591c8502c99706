//! Conformance checking through the external veraPDF command line.
//!
//! Every document is checked twice: under the checker's standard PDF/UA
//! profile (strict) and under a custom screen-reader ruleset. Slow runs are
//! retried with an escalating timeout.

pub mod output;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use pdfaudit_shared::{AuditError, RetryPolicy, ValidationStatus, ValidatorConfig, run_tool};

pub use output::{Classification, UNKNOWN_PROFILE, classify};

/// Timeout for the `--version` query.
const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which ruleset a check runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// The checker's built-in PDF/UA profile.
    Strict,
    /// The custom screen-reader ruleset.
    ScreenReader,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::ScreenReader => "screen-reader",
        }
    }
}

/// Outcome of one profile check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: ValidationStatus,
    pub details: String,
    pub profile_name: String,
    /// Timeout of the last attempt.
    pub timeout_used: Duration,
    /// Every attempt ran out of time.
    pub timed_out: bool,
}

/// Both profile checks for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentVerdict {
    pub strict: CheckResult,
    pub screen_reader: CheckResult,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Check `document` under `profile` using the configured retry policy.
    pub async fn validate(&self, document: &Path, profile: Profile) -> CheckResult {
        self.validate_with(document, profile, self.config.retry).await
    }

    /// Check `document` under `profile`, escalating timeouts per `policy`.
    #[instrument(skip_all, fields(document = %document.display(), profile = profile.as_str()))]
    pub async fn validate_with(
        &self,
        document: &Path,
        profile: Profile,
        policy: RetryPolicy,
    ) -> CheckResult {
        let args = self.check_args(document, profile);
        let document_str = document.to_string_lossy();

        let outcome = policy
            .run("veraPDF", |attempt| {
                let args = &args;
                async move { run_tool(&self.config.program, args, attempt.budget).await }
            })
            .await;

        let timeout_used = outcome.last.budget;
        match outcome.result {
            Ok(output) => {
                let c = classify(output.primary_text(), &document_str);
                CheckResult {
                    status: c.status,
                    details: c.details,
                    profile_name: c.profile,
                    timeout_used,
                    timed_out: false,
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(
                    attempts = outcome.last.index + 1,
                    timeout_secs = timeout_used.as_secs_f64(),
                    "validator timed out on every attempt"
                );
                CheckResult {
                    status: ValidationStatus::Error,
                    details: format!(
                        "VeraPDF Timeout ({}s exceeded, {} attempts)",
                        timeout_used.as_secs_f64(),
                        outcome.last.index + 1
                    ),
                    profile_name: UNKNOWN_PROFILE.into(),
                    timeout_used,
                    timed_out: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "validator could not run");
                CheckResult {
                    status: ValidationStatus::Error,
                    details: error_details(&e),
                    profile_name: UNKNOWN_PROFILE.into(),
                    timeout_used,
                    timed_out: false,
                }
            }
        }
    }

    /// Strict check first; the screen-reader check reuses its final timeout,
    /// or is skipped when the strict check timed out.
    pub async fn validate_document(&self, document: &Path) -> DocumentVerdict {
        let strict = self.validate(document, Profile::Strict).await;

        let screen_reader = if strict.timed_out {
            CheckResult {
                status: ValidationStatus::Error,
                details: "Skipped: strict check hit the VeraPDF Timeout".into(),
                profile_name: UNKNOWN_PROFILE.into(),
                timeout_used: strict.timeout_used,
                timed_out: false,
            }
        } else {
            let policy = self.config.retry.with_base(strict.timeout_used);
            self.validate_with(document, Profile::ScreenReader, policy)
                .await
        };

        info!(
            document = %document.display(),
            strict = %strict.status,
            screen_reader = %screen_reader.status,
            "document checked"
        );
        DocumentVerdict {
            strict,
            screen_reader,
        }
    }

    /// Checker version string, or `Version error: …`.
    pub async fn version(&self) -> String {
        let mut args = self.config.args.clone();
        args.push("--version".into());

        match run_tool(&self.config.program, &args, VERSION_TIMEOUT).await {
            Ok(output) => output
                .primary_text()
                .lines()
                .next()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "Version error: no output".into()),
            Err(e) => format!("Version error: {e}"),
        }
    }

    fn check_args(&self, document: &Path, profile: Profile) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.extend(["--format".to_string(), "text".to_string()]);
        if profile == Profile::ScreenReader {
            args.push("--profile".into());
            args.push(path_arg(&self.config.screen_reader_profile));
        }
        args.push(path_arg(document));
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn error_details(err: &AuditError) -> String {
    match err {
        AuditError::Subprocess { message, .. } => format!("VeraPDF Error: {message}"),
        other => other.to_string(),
    }
}
