//! Application configuration for pdfaudit.
//!
//! User config lives at `~/.pdfaudit/pdfaudit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "pdfaudit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".pdfaudit";

/// Agent string sent with every crawl, download and heartbeat request.
pub const DEFAULT_USER_AGENT: &str = "a11y-pdf-audit-bot/0.1";

// ---------------------------------------------------------------------------
// Config structs (matching pdfaudit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub crawler: CrawlerSection,

    #[serde(default)]
    pub download: DownloadSection,

    #[serde(default)]
    pub validator: ValidatorSection,

    #[serde(default)]
    pub repair: RepairSection,

    #[serde(default)]
    pub host: HostSection,

    #[serde(default)]
    pub jobs: JobsSection,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Explicit output root. Empty means "resolve from the host environment".
    #[serde(default)]
    pub output_dir: String,

    /// Output root used on unconstrained (local) hosts.
    #[serde(default = "default_local_output_dir")]
    pub local_output_dir: String,

    /// Output root used on a constrained host when `OUTPUT_DIR` is unset.
    #[serde(default = "default_constrained_output_dir")]
    pub constrained_output_dir: String,

    /// Env var that overrides the output root on a constrained host.
    #[serde(default = "default_output_dir_var")]
    pub output_dir_var: String,

    /// Name of the append-only log file kept under the output root.
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
            local_output_dir: default_local_output_dir(),
            constrained_output_dir: default_constrained_output_dir(),
            output_dir_var: default_output_dir_var(),
            log_file: default_log_file(),
        }
    }
}

fn default_local_output_dir() -> String {
    "~/pdfaudit-output".into()
}
fn default_constrained_output_dir() -> String {
    "/data/output".into()
}
fn default_output_dir_var() -> String {
    "OUTPUT_DIR".into()
}
fn default_log_file() -> String {
    "audit.log".into()
}

/// `[crawler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerSection {
    /// Default page cap when the request does not specify one.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Default link depth when the request does not specify one.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Pause between page fetches.
    #[serde(default = "default_politeness_delay")]
    pub politeness_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Allow crawling loopback and private-network hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for CrawlerSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_depth: default_max_depth(),
            request_timeout_secs: default_request_timeout(),
            politeness_delay_ms: default_politeness_delay(),
            user_agent: default_user_agent(),
            allow_private_hosts: false,
        }
    }
}

fn default_max_pages() -> usize {
    50
}
fn default_max_depth() -> u32 {
    2
}
fn default_request_timeout() -> u64 {
    10
}
fn default_politeness_delay() -> u64 {
    200
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// `[download]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSection {
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_download_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_download_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            max_attempts: default_download_attempts(),
            retry_delay_ms: default_download_retry_delay(),
        }
    }
}

fn default_download_timeout() -> u64 {
    15
}
fn default_download_attempts() -> u32 {
    3
}
fn default_download_retry_delay() -> u64 {
    1000
}

/// `[validator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSection {
    /// Program to launch (usually `java`).
    #[serde(default = "default_validator_program")]
    pub program: String,

    /// Arguments placed before the format/profile/file arguments.
    #[serde(default = "default_validator_args")]
    pub args: Vec<String>,

    /// Custom ruleset used for the screen-reader profile.
    #[serde(default = "default_screen_reader_profile")]
    pub screen_reader_profile: String,

    /// Base timeout for one validator invocation.
    #[serde(default = "default_validator_timeout")]
    pub timeout_secs: u64,

    /// Retries after a timed-out invocation.
    #[serde(default = "default_validator_retries")]
    pub max_retries: u32,

    /// Timeout multiplier applied on each retry.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_retry_pause")]
    pub retry_pause_ms: u64,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            program: default_validator_program(),
            args: default_validator_args(),
            screen_reader_profile: default_screen_reader_profile(),
            timeout_secs: default_validator_timeout(),
            max_retries: default_validator_retries(),
            backoff_factor: default_backoff_factor(),
            retry_pause_ms: default_retry_pause(),
        }
    }
}

fn default_validator_program() -> String {
    "java".into()
}
fn default_validator_args() -> Vec<String> {
    vec![
        "-cp".into(),
        "/opt/verapdf/verapdf-cli.jar".into(),
        "org.verapdf.apps.GreenfieldCliWrapper".into(),
    ]
}
fn default_screen_reader_profile() -> String {
    "/opt/verapdf/profiles/screen_reader.xml".into()
}
fn default_validator_timeout() -> u64 {
    120
}
fn default_validator_retries() -> u32 {
    1
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_retry_pause() -> u64 {
    2000
}

/// `[repair]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSection {
    /// Minimum host memory for semantic reconstruction.
    #[serde(default = "default_min_memory_gb")]
    pub min_memory_gb: f64,

    /// Ghostscript command; output and input arguments are appended.
    #[serde(default = "default_gs_command")]
    pub ghostscript_command: Vec<String>,

    #[serde(default = "default_technical_timeout")]
    pub technical_timeout_secs: u64,

    /// Text/image extraction command; input and output options are appended.
    #[serde(default = "default_extraction_command")]
    pub extraction_command: Vec<String>,

    /// HTML to PDF/UA renderer; HTML path, PDF path and variant are appended.
    #[serde(default = "default_renderer_command")]
    pub renderer_command: Vec<String>,

    #[serde(default = "default_semantic_timeout")]
    pub semantic_timeout_secs: u64,

    /// Language assumed when a document has too little text to classify.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Captioning command; the image path is appended. Empty disables it.
    #[serde(default)]
    pub captioner_command: Vec<String>,

    /// Translation command; target language and text are appended. Empty disables it.
    #[serde(default)]
    pub translator_command: Vec<String>,
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            min_memory_gb: default_min_memory_gb(),
            ghostscript_command: default_gs_command(),
            technical_timeout_secs: default_technical_timeout(),
            extraction_command: default_extraction_command(),
            renderer_command: default_renderer_command(),
            semantic_timeout_secs: default_semantic_timeout(),
            default_language: default_language(),
            captioner_command: Vec::new(),
            translator_command: Vec::new(),
        }
    }
}

fn default_min_memory_gb() -> f64 {
    4.0
}
fn default_gs_command() -> Vec<String> {
    vec!["gs".into()]
}
fn default_technical_timeout() -> u64 {
    300
}
fn default_extraction_command() -> Vec<String> {
    vec!["marker_single".into()]
}
fn default_renderer_command() -> Vec<String> {
    vec!["weasyprint".into()]
}
fn default_semantic_timeout() -> u64 {
    1800
}
fn default_language() -> String {
    "de".into()
}

/// `[host]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSection {
    /// Env var carrying the public host identity.
    #[serde(default = "default_identity_var")]
    pub identity_var: String,

    /// Health-check URL; `{host}` is replaced with the host identity.
    #[serde(default = "default_heartbeat_url")]
    pub heartbeat_url: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_request_timeout_secs: u64,

    /// How long stopping the heartbeat waits for the task to exit.
    #[serde(default = "default_heartbeat_join")]
    pub heartbeat_join_timeout_ms: u64,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            identity_var: default_identity_var(),
            heartbeat_url: default_heartbeat_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_request_timeout_secs: default_heartbeat_timeout(),
            heartbeat_join_timeout_ms: default_heartbeat_join(),
        }
    }
}

fn default_identity_var() -> String {
    "FLY_APP_NAME".into()
}
fn default_heartbeat_url() -> String {
    "https://{host}.fly.dev/".into()
}
fn default_heartbeat_interval() -> u64 {
    20
}
fn default_heartbeat_timeout() -> u64 {
    10
}
fn default_heartbeat_join() -> u64 {
    2000
}

/// `[jobs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSection {
    /// Number of runs allowed to execute at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending submissions held before `submit` waits for room.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Files under the output root older than this are swept at job start.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Finished jobs stay in the status table this long.
    #[serde(default = "default_history_hours")]
    pub history_hours: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            retention_days: default_retention_days(),
            history_hours: default_history_hours(),
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_queue_capacity() -> usize {
    16
}
fn default_retention_days() -> u64 {
    14
}
fn default_history_hours() -> u64 {
    24
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from the file config, overridable by CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub request_timeout: Duration,
    pub politeness_delay: Duration,
    pub user_agent: String,
    pub allow_private_hosts: bool,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.crawler.request_timeout_secs),
            politeness_delay: Duration::from_millis(config.crawler.politeness_delay_ms),
            user_agent: config.crawler.user_agent.clone(),
            allow_private_hosts: config.crawler.allow_private_hosts,
        }
    }
}

/// Runtime download configuration.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub user_agent: String,
    /// `base` is the per-request timeout; `factor` is 1 (no escalation).
    pub retry: RetryPolicy,
}

impl From<&AppConfig> for DownloadConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.crawler.user_agent.clone(),
            retry: RetryPolicy::new(
                Duration::from_secs(config.download.timeout_secs),
                1.0,
                config.download.max_attempts,
            )
            .with_pause(Duration::from_millis(config.download.retry_delay_ms)),
        }
    }
}

/// Runtime validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub screen_reader_profile: PathBuf,
    /// `base` is the first invocation's timeout, escalated by `factor`.
    pub retry: RetryPolicy,
}

impl From<&AppConfig> for ValidatorConfig {
    fn from(config: &AppConfig) -> Self {
        let v = &config.validator;
        Self {
            program: v.program.clone(),
            args: v.args.clone(),
            screen_reader_profile: PathBuf::from(&v.screen_reader_profile),
            retry: RetryPolicy::new(
                Duration::from_secs(v.timeout_secs),
                v.backoff_factor,
                v.max_retries.saturating_add(1),
            )
            .with_pause(Duration::from_millis(v.retry_pause_ms)),
        }
    }
}

/// Runtime repair configuration.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    pub min_memory_bytes: u64,
    pub ghostscript_command: Vec<String>,
    pub technical_timeout: Duration,
    pub extraction_command: Vec<String>,
    pub renderer_command: Vec<String>,
    pub semantic_timeout: Duration,
    pub default_language: String,
    pub captioner_command: Vec<String>,
    pub translator_command: Vec<String>,
}

impl From<&AppConfig> for RepairConfig {
    fn from(config: &AppConfig) -> Self {
        let r = &config.repair;
        Self {
            min_memory_bytes: (r.min_memory_gb.max(0.0) * 1024.0 * 1024.0 * 1024.0) as u64,
            ghostscript_command: r.ghostscript_command.clone(),
            technical_timeout: Duration::from_secs(r.technical_timeout_secs),
            extraction_command: r.extraction_command.clone(),
            renderer_command: r.renderer_command.clone(),
            semantic_timeout: Duration::from_secs(r.semantic_timeout_secs),
            default_language: r.default_language.clone(),
            captioner_command: r.captioner_command.clone(),
            translator_command: r.translator_command.clone(),
        }
    }
}

/// Runtime heartbeat configuration (the target URL comes from the host).
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
    pub join_timeout: Duration,
    pub user_agent: String,
}

impl From<&AppConfig> for HeartbeatConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.host.heartbeat_interval_secs),
            request_timeout: Duration::from_secs(config.host.heartbeat_request_timeout_secs),
            join_timeout: Duration::from_millis(config.host.heartbeat_join_timeout_ms),
            user_agent: config.crawler.user_agent.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.pdfaudit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AuditError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.pdfaudit/pdfaudit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| AuditError::config(format!("failed to parse {}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject values that would make a run meaningless.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.jobs.workers == 0 {
        return Err(AuditError::config("jobs.workers must be at least 1"));
    }
    if config.download.max_attempts == 0 {
        return Err(AuditError::config("download.max_attempts must be at least 1"));
    }
    if !config.validator.backoff_factor.is_finite() || config.validator.backoff_factor < 1.0 {
        return Err(AuditError::config(
            "validator.backoff_factor must be a finite number of 1.0 or greater",
        ));
    }
    if config.validator.program.trim().is_empty() {
        return Err(AuditError::config("validator.program must not be empty"));
    }
    for (name, command) in [
        ("repair.ghostscript_command", &config.repair.ghostscript_command),
        ("repair.extraction_command", &config.repair.extraction_command),
        ("repair.renderer_command", &config.repair.renderer_command),
    ] {
        if command.is_empty() {
            return Err(AuditError::config(format!("{name} must not be empty")));
        }
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AuditError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AuditError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AuditError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("local_output_dir"));
        assert!(toml_str.contains("FLY_APP_NAME"));
        assert!(toml_str.contains("GreenfieldCliWrapper"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawler.request_timeout_secs, 10);
        assert_eq!(parsed.jobs.retention_days, 14);
        assert_eq!(parsed.jobs.workers, 1);
        assert_eq!(parsed.host.identity_var, "FLY_APP_NAME");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[validator]
program = "sh"
args = ["-c", "echo PASS"]
max_retries = 3

[jobs]
workers = 2
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.validator.program, "sh");
        assert_eq!(config.validator.max_retries, 3);
        assert_eq!(config.validator.timeout_secs, 120);
        assert_eq!(config.jobs.workers, 2);
        assert_eq!(config.download.max_attempts, 3);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let app = AppConfig::default();

        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.request_timeout, Duration::from_secs(10));
        assert_eq!(crawl.politeness_delay, Duration::from_millis(200));
        assert!(!crawl.allow_private_hosts);

        let validator = ValidatorConfig::from(&app);
        assert_eq!(validator.retry.max_attempts, 2);
        assert_eq!(validator.retry.value_at(1), Duration::from_secs(240));

        let download = DownloadConfig::from(&app);
        assert_eq!(download.retry.max_attempts, 3);
        assert_eq!(download.retry.value_at(2), Duration::from_secs(15));

        let repair = RepairConfig::from(&app);
        assert_eq!(repair.min_memory_bytes, 4 * 1024 * 1024 * 1024);
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.jobs.workers = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("jobs.workers"));

        let mut config = AppConfig::default();
        config.validator.backoff_factor = 0.5;
        assert!(validate_config(&config).is_err());

        for factor in [f64::NAN, f64::INFINITY] {
            let mut config = AppConfig::default();
            config.validator.backoff_factor = factor;
            let err = validate_config(&config).unwrap_err();
            assert!(err.to_string().contains("validator.backoff_factor"));
        }

        let mut config = AppConfig::default();
        config.repair.ghostscript_command.clear();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("repair.ghostscript_command"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdfaudit.toml");
        std::fs::write(&path, "[crawler]\nmax_pages = 7\n").unwrap();
        let config = load_config_from(&path).expect("load");
        assert_eq!(config.crawler.max_pages, 7);

        std::fs::write(&path, "[crawler\nbroken").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/data/output"), PathBuf::from("/data/output"));
        assert!(!expand_home("~/pdfaudit-output").starts_with("~"));
    }
}
