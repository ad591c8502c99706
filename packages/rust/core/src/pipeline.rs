//! Per-document processing: download → validate → repair → re-validate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};
use url::Url;

use pdfaudit_repair::RepairOrchestrator;
use pdfaudit_shared::{AuditError, Result, ValidationRecord, ValidationStatus, sort_by_severity};
use pdfaudit_validator::{Profile, Validator};

use crate::bundle::unique_name;
use crate::download::{Downloader, document_filename};
use crate::metadata::{DocumentMetadata, read_metadata};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait AuditProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a document is downloaded.
    fn document_started(&self, url: &str, current: usize, total: usize);
    /// Called once a document has its final record.
    fn document_finished(&self, record: &ValidationRecord, current: usize, total: usize);
}

/// No-op progress reporter for background jobs and tests.
pub struct SilentProgress;

impl AuditProgress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_started(&self, _url: &str, _current: usize, _total: usize) {}
    fn document_finished(&self, _record: &ValidationRecord, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Scratch file guard
// ---------------------------------------------------------------------------

/// Removes the downloaded file when processing of a document ends.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.0.display(), error = %e, "failed to remove scratch file");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Where one run keeps its files.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Downloads land here and are deleted after processing.
    pub scratch_dir: PathBuf,
    /// Repaired artifacts.
    pub repaired_dir: PathBuf,
    /// The JSON result set.
    pub results_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    downloader: Downloader,
    validator: Arc<Validator>,
    repairer: Arc<RepairOrchestrator>,
}

impl Pipeline {
    pub fn new(
        downloader: Downloader,
        validator: Arc<Validator>,
        repairer: Arc<RepairOrchestrator>,
    ) -> Self {
        Self {
            downloader,
            validator,
            repairer,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Process every link in order, sort the records by severity and write
    /// them as pretty JSON to `paths.results_path`.
    #[instrument(skip_all, fields(documents = links.len(), force_ai = force_ai))]
    pub async fn run(
        &self,
        links: &[Url],
        paths: &RunPaths,
        force_ai: bool,
        progress: &dyn AuditProgress,
    ) -> Result<Vec<ValidationRecord>> {
        for dir in [&paths.scratch_dir, &paths.repaired_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AuditError::io(dir, e))?;
        }

        let total = links.len();
        info!(total, "checking documents");

        let mut records = Vec::with_capacity(total);
        for (i, url) in links.iter().enumerate() {
            let index = i + 1;
            progress.document_started(url.as_str(), index, total);
            let record = self.process_document(url, index, total, paths, force_ai).await;
            progress.document_finished(&record, index, total);
            records.push(record);
        }

        sort_by_severity(&mut records);
        write_results(&paths.results_path, &records).await?;
        Ok(records)
    }

    #[instrument(skip_all, fields(url = %url, index = index, total = total))]
    async fn process_document(
        &self,
        url: &Url,
        index: usize,
        total: usize,
        paths: &RunPaths,
        force_ai: bool,
    ) -> ValidationRecord {
        let filename = document_filename(url, index);
        let mut record = ValidationRecord::new(url.as_str(), filename.as_str());
        let scratch = ScratchFile(paths.scratch_dir.join(&filename));

        if let Err(e) = self.downloader.download(url, scratch.path()).await {
            warn!(error = %e, "download failed");
            record.status = ValidationStatus::Error;
            record.details = e.to_string();
            return record;
        }

        let meta = metadata_of(scratch.path()).await;
        record.author = meta.author;
        record.date = meta.date;

        let verdict = self.validator.validate_document(scratch.path()).await;
        record.status = verdict.strict.status;
        record.details = verdict.strict.details;
        record.profile = verdict.strict.profile_name;
        record.screen_reader_status = verdict.screen_reader.status;
        record.screen_reader_details = verdict.screen_reader.details;

        if record.status == ValidationStatus::Fail {
            let target = repaired_target(&paths.repaired_dir, &filename, index);
            if self.repairer.repair(scratch.path(), &target, force_ai).await {
                let after = self.validator.validate(&target, Profile::Strict).await;
                record.repaired = true;
                record.repaired_path = Some(target.to_string_lossy().into_owned());
                record.status_after = Some(after.status);
            }
        }

        match record.status {
            ValidationStatus::Pass => info!(%filename, "PASS"),
            ValidationStatus::Fail => info!(
                %filename,
                details = %shorten(&record.details, 50),
                repaired = record.repaired,
                status_after = ?record.status_after,
                "FAIL"
            ),
            status => warn!(%filename, %status, details = %record.details, "not checked"),
        }
        record
    }
}

async fn metadata_of(path: &Path) -> DocumentMetadata {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_metadata(&path))
        .await
        .unwrap_or_default()
}

/// A path in `repaired_dir` for `filename` that no earlier artifact uses.
fn repaired_target(repaired_dir: &Path, filename: &str, index: usize) -> PathBuf {
    repaired_dir.join(unique_name(filename, index, |n| repaired_dir.join(n).exists()))
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}..")
    } else {
        text.to_string()
    }
}

async fn write_results(path: &Path, records: &[ValidationRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AuditError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| AuditError::data(format!("serialize results: {e}")))?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| AuditError::io(path, e))
}

/// Read a result set written by [`Pipeline::run`].
pub fn read_results(path: &Path) -> Result<Vec<ValidationRecord>> {
    let json = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;
    serde_json::from_str(&json)
        .map_err(|e| AuditError::data(format!("parse {}: {e}", path.display())))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pdfaudit_repair::ModelHandles;
    use pdfaudit_shared::{
        AppConfig, DownloadConfig, HostEnvironment, RepairConfig, RetryPolicy, ValidatorConfig,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fake validator: inspects the file content (last argument) and prints
    /// a veraPDF-like summary line.
    pub(crate) fn fake_validator() -> ValidatorConfig {
        let script = r#"for f; do :; done
case "$(cat "$f")" in
  *GOOD*|*REPAIRED*) echo "PASS $f PDF/UA-1" ;;
  *BAD*) echo "FAIL $f PDF/UA-1" ;;
  *) echo "java.lang.Exception: cannot parse" >&2; exit 1 ;;
esac"#;
        ValidatorConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "verapdf".into()],
            screen_reader_profile: PathBuf::from("/tmp/profile.xml"),
            retry: RetryPolicy::new(Duration::from_secs(10), 2.0, 2),
        }
    }

    /// Fake Ghostscript writing a document the fake validator passes.
    pub(crate) fn fake_repair() -> RepairConfig {
        let mut config = RepairConfig::from(&AppConfig::default());
        let script = r#"for a; do case "$a" in -sOutputFile=*) out="${a#-sOutputFile=}";; esac; done; echo REPAIRED > "$out""#;
        config.ghostscript_command = vec!["sh".into(), "-c".into(), script.into(), "gs".into()];
        config.technical_timeout = Duration::from_secs(10);
        config
    }

    pub(crate) fn test_pipeline(repair: RepairConfig) -> Pipeline {
        let downloader = Downloader::new(DownloadConfig {
            user_agent: "test".into(),
            retry: RetryPolicy::new(Duration::from_secs(5), 1.0, 2),
        })
        .unwrap();
        let repairer = RepairOrchestrator::with_memory(
            &repair,
            HostEnvironment::local(),
            ModelHandles::from_config(&repair),
            0,
        );
        Pipeline::new(
            downloader,
            Arc::new(Validator::new(fake_validator())),
            Arc::new(repairer),
        )
    }

    pub(crate) async fn serve(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_bytes().to_vec()))
            .mount(server)
            .await;
    }

    fn paths(dir: &Path) -> RunPaths {
        RunPaths {
            scratch_dir: dir.join("scratch"),
            repaired_dir: dir.join("repaired"),
            results_path: dir.join("results.json"),
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        finished: Mutex<Vec<String>>,
    }

    impl AuditProgress for RecordingProgress {
        fn phase(&self, _name: &str) {}
        fn document_started(&self, _url: &str, _current: usize, _total: usize) {}
        fn document_finished(&self, record: &ValidationRecord, current: usize, total: usize) {
            self.finished
                .lock()
                .unwrap()
                .push(format!("{current}/{total} {}", record.filename));
        }
    }

    #[tokio::test]
    async fn processes_sorts_and_writes_results() {
        let server = MockServer::start().await;
        serve(&server, "/broken.pdf", "garbage").await;
        serve(&server, "/bad.pdf", "%PDF BAD").await;
        serve(&server, "/good.pdf", "%PDF GOOD").await;

        let links: Vec<Url> = ["/broken.pdf", "/bad.pdf", "/good.pdf", "/gone.pdf"]
            .iter()
            .map(|p| Url::parse(&format!("{}{p}", server.uri())).unwrap())
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let progress = RecordingProgress::default();
        let records = test_pipeline(fake_repair())
            .run(&links, &paths, false, &progress)
            .await
            .unwrap();

        let order: Vec<_> = records.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(order, ["good.pdf", "bad.pdf", "broken.pdf", "gone.pdf"]);

        let good = &records[0];
        assert_eq!(good.status, ValidationStatus::Pass);
        assert_eq!(good.screen_reader_status, ValidationStatus::Pass);
        assert_eq!(good.profile, "PDF/UA-1");
        assert!(!good.repaired);
        assert!(good.repaired_path.is_none());
        assert!(good.status_after.is_none());

        let bad = &records[1];
        assert_eq!(bad.status, ValidationStatus::Fail);
        assert!(bad.repaired);
        assert_eq!(bad.status_after, Some(ValidationStatus::Pass));
        let repaired = PathBuf::from(bad.repaired_path.as_deref().unwrap());
        assert!(repaired.starts_with(&paths.repaired_dir));
        assert!(repaired.exists());

        assert_eq!(records[2].status, ValidationStatus::Error);
        assert!(records[2].details.starts_with("VeraPDF Error:"));
        assert_eq!(records[3].status, ValidationStatus::Error);
        assert!(records[3].details.contains("404"));

        // Downloads are gone, the result set is on disk.
        assert_eq!(std::fs::read_dir(&paths.scratch_dir).unwrap().count(), 0);
        assert_eq!(read_results(&paths.results_path).unwrap(), records);
        assert_eq!(progress.finished.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn failed_repair_leaves_record_unrepaired() {
        let server = MockServer::start().await;
        serve(&server, "/bad.pdf", "%PDF BAD").await;
        let links = vec![Url::parse(&format!("{}/bad.pdf", server.uri())).unwrap()];

        let mut repair = fake_repair();
        repair.ghostscript_command = vec!["sh".into(), "-c".into(), "exit 1".into()];

        let dir = tempfile::tempdir().unwrap();
        let records = test_pipeline(repair)
            .run(&links, &paths(dir.path()), false, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(records[0].status, ValidationStatus::Fail);
        assert!(!records[0].repaired);
        assert!(records[0].repaired_path.is_none());
        assert!(records[0].status_after.is_none());
    }

    #[test]
    fn repaired_names_stay_unique() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(repaired_target(dir.path(), "a.pdf", 3), dir.path().join("a.pdf"));
        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        assert_eq!(repaired_target(dir.path(), "a.pdf", 3), dir.path().join("3_a.pdf"));
    }

    #[test]
    fn repaired_name_skips_prefixed_name_of_earlier_document() {
        let dir = tempfile::tempdir().unwrap();
        // Document 1 was `3_a.pdf`, document 2 was `a.pdf`.
        std::fs::write(dir.path().join("3_a.pdf"), b"doc1").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"doc2").unwrap();

        let target = repaired_target(dir.path(), "a.pdf", 3);
        assert_eq!(target, dir.path().join("3_2_a.pdf"));
        assert!(!target.exists());
    }

    #[test]
    fn scratch_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"x").unwrap();
        drop(ScratchFile(path.clone()));
        assert!(!path.exists());
        drop(ScratchFile(dir.path().join("never-created.pdf")));
    }
}
