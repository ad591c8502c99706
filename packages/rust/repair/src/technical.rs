//! Deterministic repair: rewrite the document through Ghostscript's PDF/A
//! pipeline, which normalizes the syntax and embeds fonts.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, instrument};

use pdfaudit_shared::{AuditError, Result, run_command};

/// Ghostscript arguments placed before the output and input paths.
const GS_ARGS: &[&str] = &[
    "-dPDFA",
    "-dBATCH",
    "-dNOPAUSE",
    "-dNOOUTERSAVE",
    "-sDEVICE=pdfwrite",
    "-dPDFACompatibilityPolicy=1",
];

#[derive(Debug, Clone)]
pub struct TechnicalFixer {
    command: Vec<String>,
    timeout: Duration,
}

impl TechnicalFixer {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    /// Rewrite `input` into `output`. Succeeds only when the tool exits 0 and
    /// the output file exists.
    #[instrument(skip_all, fields(input = %input.display()))]
    pub async fn fix(&self, input: &Path, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AuditError::io(parent, e))?;
        }

        let mut args: Vec<String> = GS_ARGS.iter().map(|a| (*a).to_string()).collect();
        args.push(format!("-sOutputFile={}", output.display()));
        args.push(input.to_string_lossy().into_owned());

        let out = run_command(&self.command, &args, self.timeout).await?;
        if !out.success() {
            return Err(AuditError::subprocess(
                program_name(&self.command),
                format!("exit {:?}: {}", out.exit_code, last_line(&out.stderr)),
            ));
        }
        if !output.exists() {
            return Err(AuditError::subprocess(
                program_name(&self.command),
                format!("no output written to {}", output.display()),
            ));
        }

        debug!(output = %output.display(), "technical fix written");
        Ok(())
    }
}

pub(crate) fn program_name(command: &[String]) -> &str {
    command.first().map(String::as_str).unwrap_or("?")
}

pub(crate) fn last_line(text: &str) -> &str {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}
