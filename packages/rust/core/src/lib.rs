//! Audit orchestration for pdfaudit.
//!
//! This crate ties together crawling, checking and repair into end-to-end
//! workflows:
//! - [`pipeline`] — per-document download, check, repair and re-check
//! - [`audit`] — the full-site audit facade and its artifact naming
//! - [`jobs`] — background job queue, worker pool and status table
//! - [`heartbeat`] and [`housekeeping`] — hosted-instance liveness and
//!   output-root retention

pub mod audit;
pub mod bundle;
pub mod download;
pub mod heartbeat;
pub mod housekeeping;
pub mod jobs;
pub mod metadata;
pub mod pipeline;
pub mod report;

pub use audit::{AuditOutcome, AuditService, safe_name};
pub use bundle::create_repair_bundle;
pub use download::{Downloader, document_filename};
pub use heartbeat::Heartbeat;
pub use housekeeping::{
    LOCK_FILE, OutputRootLock, REPORTS_DIR, clean_output_root, cleanup_output_root, sweep_old_files,
};
pub use jobs::{JobRunner, JobRunnerOptions, JobState, JobStatus, RunExecutor};
pub use metadata::{DocumentMetadata, format_pdf_date, read_metadata};
pub use pipeline::{AuditProgress, Pipeline, RunPaths, SilentProgress, read_results};
pub use report::{JsonReportRenderer, ReportInput, ReportRenderer, StatusCounts};
