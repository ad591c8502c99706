//! External tool invocation with a hard timeout.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;

use crate::error::{AuditError, Result};

/// Captured result of a finished tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed stdout, or trimmed stderr when stdout is empty.
    pub fn primary_text(&self) -> &str {
        let out = self.stdout.trim();
        if out.is_empty() {
            self.stderr.trim()
        } else {
            out
        }
    }
}

/// Run `program args…` and capture its output.
///
/// The child is killed when `timeout` elapses, which yields
/// [`AuditError::Timeout`]. Spawn failures yield [`AuditError::Subprocess`].
/// A non-zero exit is not an error; callers inspect [`ToolOutput::exit_code`].
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AuditError::subprocess(program, format!("failed to spawn: {e}")))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(AuditError::subprocess(program, e.to_string())),
        Err(_) => return Err(AuditError::timeout(program, timeout)),
    };

    let result = ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start.elapsed(),
    };
    debug!(
        program,
        exit = ?result.exit_code,
        stdout_bytes = result.stdout.len(),
        stderr_bytes = result.stderr.len(),
        duration_ms = result.duration.as_millis(),
        "tool finished"
    );
    Ok(result)
}

/// Run a configured command (program plus leading arguments) with `extra`
/// arguments appended.
pub async fn run_command(
    command: &[String],
    extra: &[String],
    timeout: Duration,
) -> Result<ToolOutput> {
    let (program, leading) = command
        .split_first()
        .ok_or_else(|| AuditError::config("external command is empty"))?;
    run_tool(program, leading.iter().chain(extra), timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = run_tool("sh", ["-c", "echo hello; echo oops >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
        assert_eq!(out.primary_text(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn falls_back_to_stderr() {
        let out = run_tool("sh", ["-c", "echo only-err >&2"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.primary_text(), "only-err");
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let err = run_tool("sh", ["-c", "sleep 5"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn command_prefix_and_extra_args() {
        let command = vec!["sh".to_string(), "-c".into(), r#"echo "$1-$2""#.into(), "tool".into()];
        let out = run_command(&command, &["a".into(), "b".into()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.primary_text(), "a-b");

        let err = run_command(&[], &[], Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, AuditError::Config { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_subprocess_error() {
        let err = run_tool("pdfaudit-no-such-tool", ["--version"], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Subprocess { .. }));
        assert!(!err.is_retryable());
    }
}
