//! Per-job pipeline: workspace, sources, build, publication.
//!
//! Phases run strictly in order and each completion reports a fixed
//! progress number, so anyone polling the job sees monotonic progression:
//!
//! | phase                | progress | on failure            |
//! |----------------------|----------|-----------------------|
//! | workspace create     | -        | failed, progress 0    |
//! | claim (→ processing) | 10       | skip (lost the race)  |
//! | download sources     | 30       | failed, progress 20   |
//! | prepare environment  | 40       | non-fatal             |
//! | build                | 70       | failed, progress 50   |
//! | upload results       | 90       | failed, progress 80   |
//! | save logs            | -        | non-fatal             |
//! | completed            | 100      | -                     |

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::build::{BuildFailure, BuildRunner};
use crate::jobs::{Job, JobService, JobStatus};
use crate::notify::CallbackNotifier;
use crate::observability::Metrics;
use crate::storage::StorageService;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Failed,
    TimedOut,
    /// Another worker claimed the job first; nothing was done.
    Skipped,
}

#[derive(Clone)]
pub struct JobProcessor {
    jobs: JobService,
    storage: StorageService,
    runner: BuildRunner,
    notifier: CallbackNotifier,
    metrics: Arc<Metrics>,
    workspace_base: PathBuf,
    cleanup_workspace: bool,
}

impl JobProcessor {
    pub fn new(
        jobs: JobService,
        storage: StorageService,
        runner: BuildRunner,
        metrics: Arc<Metrics>,
        workspace_base: PathBuf,
        cleanup_workspace: bool,
    ) -> Self {
        Self {
            jobs,
            storage,
            runner,
            notifier: CallbackNotifier::new(),
            metrics,
            workspace_base,
            cleanup_workspace,
        }
    }

    /// Drive one job through the pipeline. `deadline` is when the build
    /// subprocess gets killed; the worker enforces the same deadline on
    /// this future as a whole.
    pub async fn process(&self, job: &Job, deadline: Instant) -> ProcessOutcome {
        info!(job_id = %job.id, course_id = %job.course_id, "Processing job");

        let workspace = match Workspace::create(&self.workspace_base, job.id).await {
            Ok(workspace) => workspace,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Workspace creation failed");
                return self
                    .fail(job.id, 0, format!("workspace creation failed: {}", err))
                    .await;
            }
        };

        // Deferred cleanup: runs on every exit path out of this function,
        // including cancellation of the future at the job deadline.
        let _guard = WorkspaceGuard::new(&workspace, self.cleanup_workspace);

        match self.jobs.claim_job(job.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, "Job claimed by another worker, skipping");
                return ProcessOutcome::Skipped;
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Claim failed");
                return ProcessOutcome::Failed;
            }
        }
        self.log(job.id, "Job processing started").await;

        // Download sources into the workspace, preserving structure.
        match self.download_sources(job.id, &workspace).await {
            Ok(count) => {
                self.log(job.id, &format!("Downloaded {} source files", count))
                    .await;
                self.set_progress(job.id, 30).await;
            }
            Err(message) => {
                return self.fail(job.id, 20, message).await;
            }
        }

        // Environment preparation is best-effort; a build can often succeed
        // without it and reports its own errors when it cannot.
        if let Err(err) = self.prepare_environment(job, &workspace).await {
            warn!(job_id = %job.id, error = %err, "Environment preparation failed, continuing");
            self.log(job.id, &format!("Environment preparation failed: {}", err))
                .await;
        }
        self.set_progress(job.id, 40).await;

        self.metrics.build_run();
        let result = match self.runner.run(&workspace, deadline).await {
            Ok(result) => result,
            Err(err) => {
                self.dump_workspace(&workspace).await;
                return self.fail(job.id, 50, err.to_string()).await;
            }
        };

        if let Err(err) = self.jobs.append_job_logs(job.id, &result.logs).await {
            warn!(job_id = %job.id, error = %err, "Failed to persist build logs");
        }

        if !result.success {
            self.save_logs(job.id).await;
            if result.failure == Some(BuildFailure::Timeout) {
                return self.timed_out(job.id).await;
            }
            self.dump_workspace(&workspace).await;
            let message = match result.failure {
                Some(BuildFailure::OutputValidation(reason)) => {
                    format!("build output validation failed: {}", reason)
                }
                _ => format!("build failed with exit code {}", result.exit_code),
            };
            return self.fail(job.id, 50, message).await;
        }
        self.set_progress(job.id, 70).await;

        match self
            .upload_results(job.course_id, &workspace, result.output_dir)
            .await
        {
            Ok(count) => {
                self.log(job.id, &format!("Published {} artifacts", count))
                    .await;
                let result_path = format!("results/{}", job.course_id);
                if let Err(err) = self.jobs.set_result_path(job.id, &result_path).await {
                    warn!(job_id = %job.id, error = %err, "Failed to record result path");
                }
                self.set_progress(job.id, 90).await;
            }
            Err(message) => {
                return self.fail(job.id, 80, message).await;
            }
        }

        self.save_logs(job.id).await;

        if let Err(err) = self
            .jobs
            .update_job_status(job.id, JobStatus::Completed, 100, None)
            .await
        {
            error!(job_id = %job.id, error = %err, "Completion transition failed");
            return ProcessOutcome::Failed;
        }
        info!(job_id = %job.id, "Job completed");
        self.notify(job.id).await;
        ProcessOutcome::Completed
    }

    /// Terminal `timeout` transition, used both by the build deadline path
    /// and by the worker when the pipeline future itself is cut off.
    pub async fn record_timeout(&self, job_id: Uuid) -> ProcessOutcome {
        self.timed_out(job_id).await
    }

    async fn download_sources(
        &self,
        job_id: Uuid,
        workspace: &Workspace,
    ) -> Result<usize, String> {
        let sources = self
            .storage
            .list_job_sources(job_id)
            .await
            .map_err(|err| format!("failed to list sources: {}", err))?;
        if sources.is_empty() {
            return Err("no source files found for job".to_string());
        }

        for relative in &sources {
            let data = self
                .storage
                .download_job_source(job_id, relative)
                .await
                .map_err(|err| format!("failed to download '{}': {}", relative, err))?;
            workspace
                .write_file(relative, &data)
                .await
                .map_err(|err| format!("failed to materialize '{}': {}", relative, err))?;
        }
        Ok(sources.len())
    }

    /// Synthesize the files the toolchain expects when the upload did not
    /// include them.
    async fn prepare_environment(
        &self,
        job: &Job,
        workspace: &Workspace,
    ) -> crate::workspace::Result<()> {
        if !workspace.file_exists("package.json").await {
            let manifest = serde_json::json!({
                "name": format!("deck-{}", job.id),
                "private": true,
                "scripts": { "build": "slidev build" },
            });
            workspace
                .write_file("package.json", manifest.to_string().as_bytes())
                .await?;
            debug!(job_id = %job.id, "Synthesized package.json");
        }

        let mut has_entry = false;
        for entry in crate::build::ENTRY_FILES {
            if workspace.file_exists(entry).await {
                has_entry = true;
                break;
            }
        }
        if !has_entry {
            let deck = format!(
                "---\ntheme: default\n---\n\n# Course {}\n\nGenerated placeholder deck\n",
                job.course_id
            );
            workspace.write_file("slides.md", deck.as_bytes()).await?;
            debug!(job_id = %job.id, "Synthesized default slides.md");
        }
        Ok(())
    }

    async fn upload_results(
        &self,
        course_id: Uuid,
        workspace: &Workspace,
        output_dir: &str,
    ) -> Result<usize, String> {
        let files = workspace
            .list_files(output_dir)
            .await
            .map_err(|err| format!("failed to list build output: {}", err))?;
        if files.is_empty() {
            return Err("build output directory is empty".to_string());
        }

        for name in &files {
            let data = workspace
                .read_file(&format!("{}/{}", output_dir, name))
                .await
                .map_err(|err| format!("failed to read artifact '{}': {}", name, err))?;
            self.storage
                .save_course_result(course_id, name, Bytes::from(data))
                .await
                .map_err(|err| format!("failed to upload artifact '{}': {}", name, err))?;
        }
        Ok(files.len())
    }

    async fn fail(&self, job_id: Uuid, progress: u8, message: String) -> ProcessOutcome {
        warn!(job_id = %job_id, progress, message = %message, "Job failed");
        self.log(job_id, &format!("Job failed: {}", message)).await;
        if let Err(err) = self
            .jobs
            .update_job_status(job_id, JobStatus::Failed, progress, Some(message))
            .await
        {
            error!(job_id = %job_id, error = %err, "Failure transition failed");
        }
        self.save_logs(job_id).await;
        self.notify(job_id).await;
        ProcessOutcome::Failed
    }

    async fn timed_out(&self, job_id: Uuid) -> ProcessOutcome {
        // Progress 0 is a floor; the repository keeps the highest value the
        // pipeline reached.
        if let Err(err) = self
            .jobs
            .update_job_status(
                job_id,
                JobStatus::Timeout,
                0,
                Some("job deadline exceeded".to_string()),
            )
            .await
        {
            error!(job_id = %job_id, error = %err, "Timeout transition failed");
        }
        self.save_logs(job_id).await;
        self.notify(job_id).await;
        ProcessOutcome::TimedOut
    }

    async fn set_progress(&self, job_id: Uuid, progress: u8) {
        if let Err(err) = self
            .jobs
            .update_job_status(job_id, JobStatus::Processing, progress, None)
            .await
        {
            warn!(job_id = %job_id, progress, error = %err, "Progress update failed");
        }
    }

    async fn log(&self, job_id: Uuid, entry: &str) {
        if let Err(err) = self.jobs.add_job_log(job_id, entry).await {
            warn!(job_id = %job_id, error = %err, "Log append failed");
        }
    }

    /// Persist the accumulated log lines to blob storage. Logs are
    /// advisory; failures are logged to the process logger and swallowed.
    async fn save_logs(&self, job_id: Uuid) {
        let logs = match self.jobs.get_job_logs(job_id).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Could not read logs for saving");
                return;
            }
        };
        if logs.is_empty() {
            return;
        }
        if let Err(err) = self.storage.save_job_log(job_id, &logs.join("\n")).await {
            warn!(job_id = %job_id, error = %err, "Log save failed");
        }
    }

    async fn notify(&self, job_id: Uuid) {
        match self.jobs.get_job(job_id).await {
            Ok(job) => self.notifier.notify_job(&job).await,
            Err(err) => warn!(job_id = %job_id, error = %err, "Could not load job for callback"),
        }
    }

    /// Debug aid on build failure: record what the workspace looked like.
    async fn dump_workspace(&self, workspace: &Workspace) {
        match workspace.list_all_files(".").await {
            Ok(files) => {
                debug!(
                    job_id = %workspace.job_id(),
                    count = files.len(),
                    files = ?files,
                    "Workspace contents at failure"
                );
            }
            Err(err) => {
                debug!(job_id = %workspace.job_id(), error = %err, "Workspace dump failed");
            }
        }
    }
}

/// Removes the workspace tree when dropped, unless cleanup is disabled.
/// Keeps the same safety fence as [`Workspace::cleanup`]: never touch a
/// path that does not embed the job id.
struct WorkspaceGuard {
    root: PathBuf,
    job_id: Uuid,
    enabled: bool,
}

impl WorkspaceGuard {
    fn new(workspace: &Workspace, enabled: bool) -> Self {
        Self {
            root: workspace.root().to_path_buf(),
            job_id: workspace.job_id(),
            enabled,
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let path_str = self.root.to_string_lossy();
        if path_str.is_empty()
            || path_str == "/"
            || !path_str.contains(&self.job_id.to_string())
        {
            warn!(path = %path_str, "Refusing unsafe workspace cleanup");
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(job_id = %self.job_id, error = %err, "Workspace cleanup failed");
            }
        }
    }
}
