//! Shared types, error model, and configuration for pdfaudit.
//!
//! This crate is the foundation depended on by all other pdfaudit crates.
//! It provides:
//! - [`AuditError`] — the unified error type
//! - Domain types ([`ValidationRecord`], [`ValidationStatus`], [`AuditRequest`], [`JobId`])
//! - Configuration ([`AppConfig`] and the runtime configs derived from it)
//! - [`RetryPolicy`], [`HostEnvironment`] and [`run_tool`] for external tools

pub mod config;
pub mod error;
pub mod host;
pub mod process;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlerSection, DEFAULT_USER_AGENT, DownloadConfig, DownloadSection,
    HeartbeatConfig, HostSection, JobsSection, PathsSection, RepairConfig, RepairSection,
    ValidatorConfig, ValidatorSection, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, validate_config,
};
pub use error::{AuditError, Result};
pub use host::HostEnvironment;
pub use process::{ToolOutput, run_command, run_tool};
pub use retry::{Attempt, MAX_BUDGET, RetryOutcome, RetryPolicy};
pub use types::{AuditRequest, JobId, UNKNOWN, ValidationRecord, ValidationStatus, sort_by_severity};
