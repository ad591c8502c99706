//! End-to-end audit of one site: crawl → check → bundle → report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, Utc};
use tracing::{info, instrument};
use url::Url;

use pdfaudit_crawler::{CrawlScope, Crawler, DocumentLedger, LinkListWriter};
use pdfaudit_repair::{ModelHandles, RepairOrchestrator};
use pdfaudit_shared::{
    AppConfig, AuditError, AuditRequest, CrawlConfig, DownloadConfig, HostEnvironment, JobId,
    RepairConfig, Result, ValidatorConfig,
};
use pdfaudit_validator::Validator;

use crate::bundle::create_repair_bundle;
use crate::download::Downloader;
use crate::housekeeping::{OutputRootLock, REPORTS_DIR};
use crate::pipeline::{AuditProgress, Pipeline, RunPaths};
use crate::report::{JsonReportRenderer, ReportInput, ReportRenderer, StatusCounts, with_suffix};

/// Scratch downloads live below this directory of the output root.
const SCRATCH_DIR: &str = "temp_pdfs";

/// Characters of the URL kept in artifact names.
const SAFE_NAME_CHARS: usize = 30;

/// Artifacts of a finished run.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub job_id: JobId,
    pub report_path: PathBuf,
    pub results_path: PathBuf,
    pub links_path: PathBuf,
    pub bundle_path: Option<PathBuf>,
    pub counts: StatusCounts,
    pub elapsed: std::time::Duration,
}

pub struct AuditService {
    crawl: CrawlConfig,
    pipeline: Pipeline,
    renderer: Arc<dyn ReportRenderer>,
    output_root: PathBuf,
}

impl AuditService {
    pub fn new(crawl: CrawlConfig, pipeline: Pipeline, output_root: PathBuf) -> Self {
        Self {
            crawl,
            pipeline,
            renderer: Arc::new(JsonReportRenderer),
            output_root,
        }
    }

    /// Wire every component from the loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        host: &HostEnvironment,
        models: ModelHandles,
    ) -> Result<Self> {
        let repair = RepairConfig::from(config);
        let pipeline = Pipeline::new(
            Downloader::new(DownloadConfig::from(config))?,
            Arc::new(Validator::new(ValidatorConfig::from(config))),
            Arc::new(RepairOrchestrator::new(&repair, host.clone(), models)),
        );
        Ok(Self::new(
            CrawlConfig::from(config),
            pipeline,
            host.output_dir(config),
        ))
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    #[instrument(skip_all, fields(job_id = %job_id, url = %request.url, max_pages = request.max_pages, depth = request.depth))]
    pub async fn run_full_audit(
        &self,
        job_id: JobId,
        request: &AuditRequest,
        progress: &dyn AuditProgress,
    ) -> Result<AuditOutcome> {
        let start = Instant::now();
        let url = Url::parse(request.url.trim())
            .map_err(|e| AuditError::data(format!("invalid URL '{}': {e}", request.url)))?;
        let scope = CrawlScope::new(url.clone(), request.max_pages, request.depth)?;
        let _running = OutputRootLock::shared(&self.output_root).await?;

        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let safe = safe_name(&request.url);
        let reports_dir = self.output_root.join(REPORTS_DIR).join(job_id.to_string());
        let base = reports_dir.join(format!(
            "REPORT_{timestamp}_{safe}_MaxPages{}_CrawlDepth{}",
            request.max_pages, request.depth
        ));
        std::fs::create_dir_all(&reports_dir).map_err(|e| AuditError::io(&reports_dir, e))?;

        // --- Phase 1: Crawl ---
        progress.phase("Crawling site");
        info!("[1/4] crawling");
        let links_path = with_suffix(&base, "_links.txt");
        let mut ledger = DocumentLedger::with_sink(LinkListWriter::create(&links_path, &url)?);
        let crawl = Crawler::new(self.crawl.clone())?
            .crawl(&scope, &mut ledger)
            .await?;
        let links = ledger.into_documents();
        info!(
            documents = links.len(),
            pages = crawl.pages_scanned,
            "crawl finished"
        );

        // --- Phase 2: Check documents ---
        progress.phase("Checking documents");
        info!("[2/4] checking documents");
        let scratch_root = self.output_root.join(SCRATCH_DIR);
        std::fs::create_dir_all(&scratch_root).map_err(|e| AuditError::io(&scratch_root, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("run-{}-", job_id.short()))
            .tempdir_in(&scratch_root)
            .map_err(|e| AuditError::io(&scratch_root, e))?;

        let paths = RunPaths {
            scratch_dir: scratch.path().to_path_buf(),
            repaired_dir: reports_dir.join("repaired"),
            results_path: with_suffix(&base, ".json"),
        };
        let records = self
            .pipeline
            .run(&links, &paths, request.force_ai, progress)
            .await?;

        // --- Phase 3: Repair bundle ---
        progress.phase("Bundling repaired documents");
        info!("[3/4] bundling repaired documents");
        let repaired: Vec<PathBuf> = records
            .iter()
            .filter(|r| r.repaired)
            .filter_map(|r| r.repaired_path.as_ref().map(PathBuf::from))
            .collect();
        let zip_path = reports_dir.join(format!("FIX_PACK_{timestamp}_{safe}.zip"));
        let bundle_path = match create_repair_bundle(&repaired, &zip_path)? {
            Some(entries) => {
                info!(entries, zip = %zip_path.display(), "repair bundle written");
                Some(zip_path)
            }
            None => {
                info!("no repairs, no bundle");
                None
            }
        };
        drop(scratch);

        // --- Phase 4: Report ---
        progress.phase("Generating report");
        info!("[4/4] generating report");
        let version = self.pipeline.validator().version().await;
        let input = ReportInput {
            base_url: &request.url,
            validator_version: &version,
            max_pages: request.max_pages,
            depth: request.depth,
            generated_at: Utc::now(),
            records: &records,
        };
        let report_path = self.renderer.render(&input, &base)?;

        let outcome = AuditOutcome {
            job_id,
            report_path,
            results_path: paths.results_path,
            links_path,
            bundle_path,
            counts: StatusCounts::of(&records),
            elapsed: start.elapsed(),
        };
        info!(
            report = %outcome.report_path.display(),
            pass = outcome.counts.pass,
            fail = outcome.counts.fail,
            error = outcome.counts.error,
            elapsed_ms = outcome.elapsed.as_millis(),
            "audit complete"
        );
        Ok(outcome)
    }
}

/// URL without scheme, slashes replaced, cut to the first 30 characters.
pub fn safe_name(url: &str) -> String {
    url.replace("https://", "")
        .replace("http://", "")
        .replace('/', "_")
        .chars()
        .take(SAFE_NAME_CHARS)
        .collect()
}
