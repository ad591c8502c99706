//! Background audit jobs.
//!
//! [`JobRunner::submit`] puts a request on a bounded queue and returns its
//! [`JobId`] at once. A fixed pool of worker tasks takes jobs off the queue;
//! each run executes in its own child task so a panic only fails that job.
//!
//! Runs hold the shared [`OutputRootLock`] for their whole duration and the
//! administrative cleanup takes it exclusively, so a cleanup waits for every
//! running audit and new audits wait for a running cleanup. Finished jobs are
//! dropped from the status table after `history`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pdfaudit_shared::{
    AppConfig, AuditError, AuditRequest, HeartbeatConfig, HostEnvironment, JobId, Result,
};

use crate::audit::AuditService;
use crate::heartbeat::Heartbeat;
use crate::housekeeping::{OutputRootLock, cleanup_output_root, sweep_old_files};
use crate::pipeline::SilentProgress;

// ---------------------------------------------------------------------------
// Executor seam
// ---------------------------------------------------------------------------

/// Runs one audit end to end and returns the report artifact.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(&self, id: JobId, request: &AuditRequest) -> Result<PathBuf>;
}

#[async_trait]
impl RunExecutor for AuditService {
    async fn execute(&self, id: JobId, request: &AuditRequest) -> Result<PathBuf> {
        self.run_full_audit(id, request, &SilentProgress)
            .await
            .map(|outcome| outcome.report_path)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub request: AuditRequest,
    pub state: JobState,
    pub report: Option<PathBuf>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JobRunnerOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retention: Duration,
    /// How long finished jobs stay visible to `status` and `list`.
    pub history: Duration,
    /// File name under the output root that housekeeping never deletes.
    pub log_file: String,
    pub heartbeat: HeartbeatConfig,
    /// Health-check URL; `None` disables the heartbeat.
    pub heartbeat_target: Option<String>,
}

impl JobRunnerOptions {
    pub fn from_config(config: &AppConfig, host: &HostEnvironment) -> Self {
        Self {
            workers: config.jobs.workers,
            queue_capacity: config.jobs.queue_capacity,
            retention: Duration::from_secs(config.jobs.retention_days * 24 * 60 * 60),
            history: Duration::from_secs(config.jobs.history_hours * 60 * 60),
            log_file: config.paths.log_file.clone(),
            heartbeat: HeartbeatConfig::from(config),
            heartbeat_target: host.heartbeat_url(&config.host.heartbeat_url),
        }
    }
}

struct QueuedJob {
    id: JobId,
    request: AuditRequest,
}

struct Shared {
    jobs: DashMap<JobId, JobStatus>,
    changed: Notify,
    executor: Arc<dyn RunExecutor>,
    output_root: PathBuf,
    options: JobRunnerOptions,
}

impl Shared {
    fn update(&self, id: JobId, f: impl FnOnce(&mut JobStatus)) {
        if let Some(mut status) = self.jobs.get_mut(&id) {
            f(&mut *status);
        }
        self.changed.notify_waiters();
    }

    /// Forget terminal jobs that finished more than `history` ago.
    fn prune_history(&self) {
        let Ok(history) = chrono::Duration::from_std(self.options.history) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(history) else {
            return;
        };
        let before = self.jobs.len();
        self.jobs.retain(|_, s| {
            !(s.state.is_terminal() && s.finished_at.is_some_and(|t| t < cutoff))
        });
        let pruned = before.saturating_sub(self.jobs.len());
        if pruned > 0 {
            debug!(pruned, "finished jobs dropped from history");
        }
    }
}

pub struct JobRunner {
    shared: Arc<Shared>,
    queue: mpsc::Sender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
}

impl JobRunner {
    /// Start the worker pool. Must be called inside a tokio runtime.
    pub fn start(
        executor: Arc<dyn RunExecutor>,
        output_root: PathBuf,
        options: JobRunnerOptions,
    ) -> Self {
        let (queue, rx) = mpsc::channel(options.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let worker_count = options.workers.max(1);

        let shared = Arc::new(Shared {
            jobs: DashMap::new(),
            changed: Notify::new(),
            executor,
            output_root,
            options,
        });

        let workers = (0..worker_count)
            .map(|n| tokio::spawn(worker_loop(n, Arc::clone(&shared), Arc::clone(&rx))))
            .collect();
        info!(workers = worker_count, "job runner started");

        Self {
            shared,
            queue,
            workers,
        }
    }

    /// Queue `request` and return its id without waiting for the run.
    pub fn submit(&self, request: AuditRequest) -> Result<JobId> {
        self.shared.prune_history();
        let id = JobId::new();
        self.shared.jobs.insert(
            id,
            JobStatus {
                id,
                request: request.clone(),
                state: JobState::Queued,
                report: None,
                error: None,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
        );

        if let Err(e) = self.queue.try_send(QueuedJob { id, request }) {
            self.shared.jobs.remove(&id);
            return Err(AuditError::Job(format!("job queue unavailable: {e}")));
        }
        info!(%id, "job queued");
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.shared.jobs.get(&id).map(|s| s.clone())
    }

    /// All known jobs, oldest first.
    pub fn list(&self) -> Vec<JobStatus> {
        self.shared.prune_history();
        let mut jobs: Vec<JobStatus> = self.shared.jobs.iter().map(|s| s.clone()).collect();
        jobs.sort_by_key(|s| s.id.0);
        jobs
    }

    /// Wait until job `id` has finished. `None` for unknown ids.
    pub async fn wait(&self, id: JobId) -> Option<JobStatus> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.status(id) {
                None => return None,
                Some(status) if status.state.is_terminal() => return Some(status),
                Some(_) => {}
            }
            notified.await;
        }
    }

    /// Remove everything under the output root except the log file, once no
    /// audit is running. Returns the number of entries removed.
    pub async fn cleanup(&self) -> Result<usize> {
        cleanup_output_root(&self.shared.output_root, &self.shared.options.log_file).await
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn worker_loop(n: usize, shared: Arc<Shared>, rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        run_job(&shared, job).await;
    }
    info!(worker = n, "worker stopped");
}

async fn run_job(shared: &Shared, job: QueuedJob) {
    let id = job.id;
    let _running = match OutputRootLock::shared(&shared.output_root).await {
        Ok(lock) => lock,
        Err(e) => {
            error!(%id, error = %e, "could not lock output root");
            shared.update(id, |s| {
                s.state = JobState::Failed;
                s.error = Some(e.to_string());
                s.finished_at = Some(Utc::now());
            });
            return;
        }
    };
    shared.update(id, |s| {
        s.state = JobState::Running;
        s.started_at = Some(Utc::now());
    });

    let heartbeat = Heartbeat::start(
        shared.options.heartbeat_target.clone(),
        &shared.options.heartbeat,
    );
    sweep_old_files(
        &shared.output_root,
        shared.options.retention,
        &shared.options.log_file,
    );
    info!(%id, url = %job.request.url, force_ai = job.request.force_ai, "job started");

    let executor = Arc::clone(&shared.executor);
    let request = job.request;
    let child = tokio::spawn(async move { executor.execute(id, &request).await });
    let outcome = match child.await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err(format!("run panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Err(e.to_string()),
    };
    heartbeat.stop().await;

    match outcome {
        Ok(report) => {
            publish_report(&shared.output_root, &report);
            info!(%id, report = %report.display(), "job finished");
            shared.update(id, |s| {
                s.state = JobState::Completed;
                s.report = Some(report);
                s.finished_at = Some(Utc::now());
            });
        }
        Err(message) => {
            error!(%id, error = %message, "job failed");
            shared.update(id, |s| {
                s.state = JobState::Failed;
                s.error = Some(message);
                s.finished_at = Some(Utc::now());
            });
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Copy the report into the output root unless a file of that name exists.
fn publish_report(output_root: &Path, report: &Path) {
    let Some(name) = report.file_name() else {
        return;
    };
    let dest = output_root.join(name);
    if dest.exists() {
        return;
    }
    if let Err(e) = std::fs::copy(report, &dest) {
        warn!(report = %report.display(), error = %e, "could not copy report to output root");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Executor whose behaviour depends on the request URL:
    /// `fail` errors, `panic` panics, anything else writes a report.
    struct FakeExecutor {
        root: PathBuf,
        delay: Duration,
        running: AtomicUsize,
        max_running: AtomicUsize,
        finished: AtomicUsize,
    }

    impl FakeExecutor {
        fn new(root: &Path, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                root: root.to_path_buf(),
                delay,
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RunExecutor for FakeExecutor {
        async fn execute(&self, id: JobId, request: &AuditRequest) -> Result<PathBuf> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);

            match request.url.as_str() {
                "fail" => Err(AuditError::data("site unreachable")),
                "panic" => panic!("validator exploded"),
                _ => {
                    let dir = self.root.join("reports").join(id.to_string());
                    std::fs::create_dir_all(&dir).unwrap();
                    let report = dir.join(format!("REPORT_{}.json", id.short()));
                    std::fs::write(&report, "{}").unwrap();
                    Ok(report)
                }
            }
        }
    }

    fn options(workers: usize, target: Option<String>) -> JobRunnerOptions {
        JobRunnerOptions {
            workers,
            queue_capacity: 8,
            retention: Duration::from_secs(14 * 24 * 60 * 60),
            history: Duration::from_secs(60 * 60),
            log_file: "audit.log".into(),
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(40),
                request_timeout: Duration::from_secs(1),
                join_timeout: Duration::from_secs(2),
                user_agent: "test".into(),
            },
            heartbeat_target: target,
        }
    }

    fn request(url: &str) -> AuditRequest {
        AuditRequest {
            url: url.into(),
            max_pages: 10,
            depth: 1,
            force_ai: false,
        }
    }

    #[tokio::test]
    async fn successful_job_publishes_report() {
        let root = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(10));
        let runner = JobRunner::start(executor, root.path().to_path_buf(), options(1, None));

        let id = runner.submit(request("https://example.com")).unwrap();
        let status = runner.wait(id).await.unwrap();

        assert_eq!(status.state, JobState::Completed);
        assert!(status.started_at.is_some() && status.finished_at.is_some());
        let report = status.report.unwrap();
        assert!(root.path().join(report.file_name().unwrap()).exists());
    }

    #[tokio::test]
    async fn errors_and_panics_fail_only_their_job() {
        let root = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(5));
        let runner = JobRunner::start(executor, root.path().to_path_buf(), options(1, None));

        let failing = runner.submit(request("fail")).unwrap();
        let panicking = runner.submit(request("panic")).unwrap();
        let healthy = runner.submit(request("https://example.com")).unwrap();

        let failed = runner.wait(failing).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.error.unwrap().contains("site unreachable"));

        let panicked = runner.wait(panicking).await.unwrap();
        assert_eq!(panicked.state, JobState::Failed);
        assert!(panicked.error.unwrap().contains("validator exploded"));

        assert_eq!(runner.wait(healthy).await.unwrap().state, JobState::Completed);
        assert!(runner.wait(JobId::new()).await.is_none());
    }

    #[tokio::test]
    async fn single_worker_runs_one_job_at_a_time() {
        let root = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(30));
        let runner = JobRunner::start(executor.clone(), root.path().to_path_buf(), options(1, None));

        let ids: Vec<_> = (0..3)
            .map(|i| runner.submit(request(&format!("https://example.com/{i}"))).unwrap())
            .collect();
        for id in ids {
            runner.wait(id).await.unwrap();
        }
        assert_eq!(executor.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(runner.list().len(), 3);
    }

    #[tokio::test]
    async fn cleanup_waits_for_running_jobs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("audit.log"), "log").unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(200));
        let runner = JobRunner::start(executor.clone(), root.path().to_path_buf(), options(2, None));

        let id = runner.submit(request("https://example.com")).unwrap();
        while runner.status(id).unwrap().state != JobState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        runner.cleanup().await.unwrap();
        // The run finished before the cleanup could start.
        assert_eq!(executor.finished.load(Ordering::SeqCst), 1);
        assert_eq!(runner.status(id).unwrap().state, JobState::Completed);
        assert!(root.path().join("audit.log").exists());
        assert!(root.path().join("reports").is_dir());
        assert_eq!(std::fs::read_dir(root.path().join("reports")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn heartbeat_runs_only_during_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(150));
        let runner = JobRunner::start(
            executor,
            root.path().to_path_buf(),
            options(1, Some(server.uri())),
        );

        let id = runner.submit(request("https://example.com")).unwrap();
        runner.wait(id).await.unwrap();
        let during = server.received_requests().await.unwrap().len();
        assert!(during >= 2, "only {during} pings");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.received_requests().await.unwrap().len(), during);
    }

    #[test]
    fn local_host_has_no_heartbeat_target() {
        let config = AppConfig::default();
        assert!(JobRunnerOptions::from_config(&config, &HostEnvironment::local())
            .heartbeat_target
            .is_none());
        assert_eq!(
            JobRunnerOptions::from_config(&config, &HostEnvironment::hosted("audit-app"))
                .heartbeat_target
                .as_deref(),
            Some("https://audit-app.fly.dev/")
        );
    }

    #[tokio::test]
    async fn shutdown_drains_queue() {
        let root = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(5));
        let runner = JobRunner::start(executor.clone(), root.path().to_path_buf(), options(1, None));
        runner.submit(request("https://example.com/a")).unwrap();
        runner.submit(request("https://example.com/b")).unwrap();
        runner.shutdown().await;
        assert_eq!(executor.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finished_jobs_leave_the_table_after_history() {
        let root = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(root.path(), Duration::from_millis(5));
        let mut opts = options(1, None);
        opts.history = Duration::from_millis(50);
        let runner = JobRunner::start(executor, root.path().to_path_buf(), opts);

        let old = runner.submit(request("https://example.com/old")).unwrap();
        runner.wait(old).await.unwrap();
        assert!(runner.status(old).is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let fresh = runner.submit(request("https://example.com/new")).unwrap();
        assert!(runner.status(old).is_none());
        assert!(runner.status(fresh).is_some());
        assert_eq!(runner.list().len(), 1);
    }
}
