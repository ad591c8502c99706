//! Output-root housekeeping: the retention sweep at job start, the
//! administrative cleanup and the lock that keeps the two apart.
//!
//! Audits hold [`OutputRootLock::shared`] while they write below the output
//! root; [`cleanup_output_root`] takes [`OutputRootLock::exclusive`]. The lock
//! is an advisory file lock, so it also orders separate `pdfaudit` processes.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, SystemTime};

use fs4::fs_std::FileExt;
use tracing::{debug, info, warn};

use pdfaudit_shared::{AuditError, Result};

/// Directory holding per-job report namespaces.
pub const REPORTS_DIR: &str = "reports";

/// Lock file directly under the output root. Never swept or cleaned.
pub const LOCK_FILE: &str = ".pdfaudit.lock";

// ---------------------------------------------------------------------------
// Output-root lock
// ---------------------------------------------------------------------------

/// Held advisory lock on an output root. Released on drop.
#[derive(Debug)]
pub struct OutputRootLock {
    file: File,
    exclusive: bool,
}

impl OutputRootLock {
    /// Wait for a shared lock (audits).
    pub async fn shared(root: &Path) -> Result<Self> {
        Self::acquire(root, false).await
    }

    /// Wait for the exclusive lock (cleanup).
    pub async fn exclusive(root: &Path) -> Result<Self> {
        Self::acquire(root, true).await
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    async fn acquire(root: &Path, exclusive: bool) -> Result<Self> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || Self::acquire_blocking(&root, exclusive))
            .await
            .map_err(|e| AuditError::Job(format!("output root lock: {e}")))?
    }

    fn acquire_blocking(root: &Path, exclusive: bool) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| AuditError::io(root, e))?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| AuditError::io(&path, e))?;

        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| AuditError::io(&path, e))?;
        debug!(path = %path.display(), exclusive, "output root locked");
        Ok(Self { file, exclusive })
    }
}

impl Drop for OutputRootLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(error = %e, "output root unlock failed, released on close");
        }
    }
}

// ---------------------------------------------------------------------------
// Retention sweep
// ---------------------------------------------------------------------------

/// Delete files under `root` last modified before `now - max_age`, except
/// files named `keep`. Errors are logged and skipped. Returns the number of
/// files deleted.
pub fn sweep_old_files(root: &Path, max_age: Duration, keep: &str) -> usize {
    let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
        return 0;
    };
    let removed = sweep_dir(root, cutoff, keep);
    if removed > 0 {
        info!(removed, root = %root.display(), "expired files removed");
    }
    removed
}

fn sweep_dir(dir: &Path, cutoff: SystemTime, keep: &str) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "sweep skipped directory");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            removed += sweep_dir(&path, cutoff, keep);
            continue;
        }
        if entry.file_name() == keep || entry.file_name() == LOCK_FILE {
            continue;
        }
        let expired = meta.modified().is_ok_and(|m| m < cutoff);
        if expired {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to delete expired file"),
            }
        }
    }
    removed
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// [`clean_output_root`] once no audit holds the output root.
pub async fn cleanup_output_root(root: &Path, keep: &str) -> Result<usize> {
    let _exclusive = OutputRootLock::exclusive(root).await?;
    clean_output_root(root, keep)
}

/// Remove everything directly under `root` except the file named `keep` and
/// the lock file, then recreate the reports directory. Returns the number of
/// entries removed. Callers outside tests go through [`cleanup_output_root`].
pub fn clean_output_root(root: &Path, keep: &str) -> Result<usize> {
    std::fs::create_dir_all(root).map_err(|e| AuditError::io(root, e))?;

    let mut removed = 0;
    for entry in std::fs::read_dir(root).map_err(|e| AuditError::io(root, e))?.flatten() {
        if entry.file_name() == keep || entry.file_name() == LOCK_FILE {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "cleanup could not remove entry"),
        }
    }

    let reports = root.join(REPORTS_DIR);
    std::fs::create_dir_all(&reports).map_err(|e| AuditError::io(&reports, e))?;
    info!(removed, root = %root.display(), "output root cleaned");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_keeps_fresh_files_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("reports").join("job");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("audit.log"), "log").unwrap();
        std::fs::write(nested.join("REPORT.json"), "[]").unwrap();

        assert_eq!(sweep_old_files(dir.path(), Duration::from_secs(3600), "audit.log"), 0);
        assert!(nested.join("REPORT.json").exists());

        // Zero age: everything already written is expired.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sweep_old_files(dir.path(), Duration::ZERO, "audit.log"), 1);
        assert!(!nested.join("REPORT.json").exists());
        assert!(dir.path().join("audit.log").exists());
    }

    #[test]
    fn sweep_of_missing_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            sweep_old_files(&dir.path().join("nope"), Duration::ZERO, "audit.log"),
            0
        );
    }

    #[test]
    fn cleanup_keeps_log_and_recreates_reports() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("reports").join("job")).unwrap();
        std::fs::create_dir_all(root.join("temp_pdfs")).unwrap();
        std::fs::write(root.join("reports").join("job").join("x.json"), "[]").unwrap();
        std::fs::write(root.join("REPORT_old.json"), "{}").unwrap();
        std::fs::write(root.join("audit.log"), "log").unwrap();

        assert_eq!(clean_output_root(root, "audit.log").unwrap(), 3);
        assert!(root.join("audit.log").exists());
        assert!(root.join("reports").is_dir());
        assert_eq!(std::fs::read_dir(root.join("reports")).unwrap().count(), 0);
        assert!(!root.join("temp_pdfs").exists());
    }

    #[tokio::test]
    async fn exclusive_lock_waits_for_every_shared_holder() {
        let dir = tempfile::tempdir().unwrap();
        let first = OutputRootLock::shared(dir.path()).await.unwrap();
        let second = OutputRootLock::shared(dir.path()).await.unwrap();
        assert!(!first.is_exclusive());

        let root = dir.path().to_path_buf();
        let writer = tokio::spawn(async move { OutputRootLock::exclusive(&root).await.unwrap() });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!writer.is_finished());

        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        drop(second);
        let lock = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .unwrap()
            .unwrap();
        assert!(lock.is_exclusive());
    }

    #[tokio::test]
    async fn cleanup_waits_for_running_audit() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let job_dir = root.join("reports").join("job");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(root.join("audit.log"), "log").unwrap();

        let audit = OutputRootLock::shared(&root).await.unwrap();
        let cleanup = {
            let root = root.clone();
            tokio::spawn(async move { cleanup_output_root(&root, "audit.log").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!cleanup.is_finished());
        assert!(job_dir.exists());

        drop(audit);
        let removed = tokio::time::timeout(Duration::from_secs(5), cleanup)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!job_dir.exists());
        assert!(root.join(LOCK_FILE).exists());
        assert!(root.join("audit.log").exists());
    }
}
