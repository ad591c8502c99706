//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use url::Url;

use pdfaudit_core::{
    AuditProgress, AuditService, JobRunner, JobRunnerOptions, JobState, cleanup_output_root,
    read_metadata,
};
use pdfaudit_crawler::{CrawlScope, Crawler, DocumentLedger, LinkListWriter};
use pdfaudit_repair::{ModelHandles, RepairOrchestrator};
use pdfaudit_shared::{
    AppConfig, AuditRequest, CrawlConfig, HostEnvironment, JobId, RepairConfig, ValidationRecord,
    ValidatorConfig, init_config, load_config,
};
use pdfaudit_validator::Validator;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pdfaudit — accessibility audits for the PDFs published on a website.
#[derive(Parser)]
#[command(
    name = "pdfaudit",
    version,
    about = "Crawl a website for PDFs, check them against PDF/UA and repair failing documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output root (overrides config and host detection).
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Audit every PDF reachable from a start URL.
    Audit {
        /// Start URL of the crawl.
        url: String,

        /// Maximum number of HTML pages to scan.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum link depth from the start URL.
        #[arg(long)]
        depth: Option<u32>,

        /// Use semantic reconstruction for failing documents when the host allows it.
        #[arg(long)]
        ai: bool,

        /// Run as a background job (heartbeat, retention sweep, report copy
        /// to the output root); prints the job id and waits for it.
        #[arg(long)]
        detach: bool,
    },

    /// Crawl a site and write the discovered PDF links to a file.
    Crawl {
        /// Start URL of the crawl.
        url: String,

        /// Link-list file to write.
        #[arg(short, long)]
        out: PathBuf,

        /// Maximum number of HTML pages to scan.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum link depth from the start URL.
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Check a local PDF under both profiles.
    Check {
        /// Path to the PDF.
        pdf: PathBuf,
    },

    /// Repair a local PDF.
    Repair {
        /// Input PDF.
        input: PathBuf,

        /// Output path for the repaired PDF.
        output: PathBuf,

        /// Request semantic reconstruction.
        #[arg(long)]
        ai: bool,
    },

    /// Remove everything under the output root except the log file.
    Cleanup,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Config & tracing setup
// ---------------------------------------------------------------------------

/// Load the config file and apply global flag overrides.
pub(crate) fn load_effective_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match (&cli.command, load_config()) {
        (_, Ok(config)) => config,
        // A broken file must not block writing a fresh one.
        (Command::Config { action: ConfigAction::Init }, Err(_)) => AppConfig::default(),
        (_, Err(e)) => return Err(e.into()),
    };
    if let Some(output) = &cli.output {
        config.paths.output_dir = output.to_string_lossy().into_owned();
    }
    Ok(config)
}

/// Initialize tracing based on CLI flags. Events also go to the log file
/// under the output root when it can be opened.
pub(crate) fn init_tracing(cli: &Cli, config: &AppConfig) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pdfaudit=info",
        1 => "pdfaudit=debug",
        _ => "pdfaudit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    let stdout_layer = match cli.log_format {
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let log_path = output_root(config).join(&config.paths.log_file);
    let file_layer = open_log_file(&log_path).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(env_filter)
        .init();
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
}

fn output_root(config: &AppConfig) -> PathBuf {
    HostEnvironment::detect(config).output_dir(config)
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    match cli.command {
        Command::Audit {
            url,
            max_pages,
            depth,
            ai,
            detach,
        } => {
            let request = AuditRequest {
                url,
                max_pages: max_pages.unwrap_or(config.crawler.max_pages),
                depth: depth.unwrap_or(config.crawler.max_depth),
                force_ai: ai,
            };
            if detach {
                cmd_audit_job(&config, request).await
            } else {
                cmd_audit(&config, request).await
            }
        }
        Command::Crawl {
            url,
            out,
            max_pages,
            depth,
        } => {
            cmd_crawl(
                &config,
                &url,
                &out,
                max_pages.unwrap_or(config.crawler.max_pages),
                depth.unwrap_or(config.crawler.max_depth),
            )
            .await
        }
        Command::Check { pdf } => cmd_check(&config, &pdf).await,
        Command::Repair { input, output, ai } => cmd_repair(&config, &input, &output, ai).await,
        Command::Cleanup => cmd_cleanup(&config).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn audit_service(config: &AppConfig, host: &HostEnvironment) -> Result<AuditService> {
    let models = ModelHandles::from_config(&RepairConfig::from(config));
    Ok(AuditService::from_config(config, host, models)?)
}

async fn cmd_audit(config: &AppConfig, request: AuditRequest) -> Result<()> {
    let host = HostEnvironment::detect(config);
    let service = audit_service(config, &host)?;
    let job_id = JobId::new();

    info!(
        url = %request.url,
        max_pages = request.max_pages,
        depth = request.depth,
        ai = request.force_ai,
        "starting audit"
    );

    let reporter = CliProgress::new();
    let result = service.run_full_audit(job_id, &request, &reporter).await;
    reporter.finish();
    let outcome = result?;

    println!();
    println!("  Audit complete!");
    println!("  Job:       {}", outcome.job_id);
    println!("  Documents: {}", outcome.counts.total);
    println!("  PASS:      {}", outcome.counts.pass);
    println!("  FAIL:      {}", outcome.counts.fail);
    println!("  ERROR:     {}", outcome.counts.error);
    println!("  Repaired:  {}", outcome.counts.repaired);
    println!("  Results:   {}", outcome.results_path.display());
    println!("  Report:    {}", outcome.report_path.display());
    if let Some(bundle) = &outcome.bundle_path {
        println!("  Fix pack:  {}", bundle.display());
    }
    println!("  Time:      {:.1}s", outcome.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_audit_job(config: &AppConfig, request: AuditRequest) -> Result<()> {
    let host = HostEnvironment::detect(config);
    let service = audit_service(config, &host)?;
    let output_root = service.output_root().to_path_buf();
    let runner = JobRunner::start(
        Arc::new(service),
        output_root,
        JobRunnerOptions::from_config(config, &host),
    );

    let id = runner.submit(request)?;
    println!("Job {id} queued");

    let status = runner
        .wait(id)
        .await
        .ok_or_else(|| eyre!("job {id} disappeared"))?;
    runner.shutdown().await;

    match status.state {
        JobState::Completed => {
            let report = status.report.map(|p| p.display().to_string()).unwrap_or_default();
            println!("Job {id} finished: {report}");
            Ok(())
        }
        _ => Err(eyre!(
            "job {id} failed: {}",
            status.error.unwrap_or_else(|| "unknown error".into())
        )),
    }
}

async fn cmd_crawl(
    config: &AppConfig,
    url: &str,
    out: &Path,
    max_pages: usize,
    depth: u32,
) -> Result<()> {
    let start_url = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let scope = CrawlScope::new(start_url.clone(), max_pages, depth)?;

    let mut ledger = DocumentLedger::with_sink(LinkListWriter::create(out, &start_url)?);
    let result = Crawler::new(CrawlConfig::from(config))?
        .crawl(&scope, &mut ledger)
        .await?;

    println!();
    println!("  Documents: {}", result.documents.len());
    println!("  Sitemaps:  {}", result.from_sitemaps);
    println!("  Pages:     {} ({} failed)", result.pages_scanned, result.pages_failed);
    println!("  Links:     {}", out.display());
    println!("  Time:      {:.1}s", result.duration.as_secs_f64());
    println!();
    Ok(())
}

async fn cmd_check(config: &AppConfig, pdf: &Path) -> Result<()> {
    if !pdf.is_file() {
        return Err(eyre!("'{}' is not a file", pdf.display()));
    }
    let validator = Validator::new(ValidatorConfig::from(config));
    let verdict = validator.validate_document(pdf).await;
    let meta = read_metadata(pdf);

    println!();
    println!("  File:          {}", pdf.display());
    println!("  Author:        {}", meta.author);
    println!("  Created:       {}", meta.date);
    println!("  Strict:        {} {}", verdict.strict.status, verdict.strict.details);
    println!(
        "  Screen reader: {} {}",
        verdict.screen_reader.status, verdict.screen_reader.details
    );
    println!();
    Ok(())
}

async fn cmd_repair(config: &AppConfig, input: &Path, output: &Path, ai: bool) -> Result<()> {
    if !input.is_file() {
        return Err(eyre!("'{}' is not a file", input.display()));
    }
    let repair = RepairConfig::from(config);
    let orchestrator = RepairOrchestrator::new(
        &repair,
        HostEnvironment::detect(config),
        ModelHandles::from_config(&repair),
    );

    let mode = orchestrator.mode_for(ai);
    info!(mode = mode.as_str(), "repairing document");
    if !orchestrator.repair(input, output, ai).await {
        return Err(eyre!("repair of '{}' failed, see log for details", input.display()));
    }
    println!("Repaired ({}): {}", mode.as_str(), output.display());
    Ok(())
}

async fn cmd_cleanup(config: &AppConfig) -> Result<()> {
    let root = output_root(config);
    let removed = cleanup_output_root(&root, &config.paths.log_file).await?;
    println!("Removed {removed} entries from {}", root.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    println!("# output root: {}", output_root(config).display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        match ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            Ok(style) => spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            ),
            Err(e) => warn!(error = %e, "invalid spinner template"),
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl AuditProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_started(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Checking [{current}/{total}] {url}"));
    }

    fn document_finished(&self, record: &ValidationRecord, current: usize, total: usize) {
        self.spinner.println(format!(
            "  [{current}/{total}] {:<5} {}",
            record.status.as_str(),
            record.filename
        ));
    }
}
