//! Build pipeline for one workspace.
//!
//! Owns the external static-site toolchain invocation: prerequisite checks,
//! best-effort package sync, process execution with live log capture, and
//! output validation. The runner never touches job state; the processor
//! interprets its results.

pub mod capture;
pub mod packages;
pub mod progress;

pub use packages::{InstallResult, PackageInstaller};

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::workspace::Workspace;
use capture::{CHANNEL_CAPACITY, StreamKind};

/// Relative directory where validated artifacts end up.
pub const OUTPUT_DIR: &str = "dist";

/// At least one of these must exist for a build to be attempted.
pub const ENTRY_FILES: &[&str] = &["slides.md", "index.md", "README.md"];

/// Directories some toolchain versions emit instead of `dist/`.
const ALTERNATE_OUTPUT_DIRS: &[&str] = &["build", "output", "_output", ".slidev/dist"];

/// `dist/index.html` smaller than this is considered a degenerate build.
const MIN_INDEX_HTML_BYTES: u64 = 100;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment forcing non-interactive toolchain behavior. The module
/// cache is pinned inside the workspace so concurrent jobs never share it.
pub(crate) fn command_env(workspace_root: &Path) -> Vec<(String, String)> {
    vec![
        ("NODE_ENV".to_string(), "production".to_string()),
        ("CI".to_string(), "true".to_string()),
        ("NPM_CONFIG_PROGRESS".to_string(), "false".to_string()),
        ("NPM_CONFIG_AUDIT".to_string(), "false".to_string()),
        ("NPM_CONFIG_FUND".to_string(), "false".to_string()),
        (
            "NPM_CONFIG_UPDATE_NOTIFIER".to_string(),
            "false".to_string(),
        ),
        ("NPM_CONFIG_MAXSOCKETS".to_string(), "3".to_string()),
        ("NPM_CONFIG_FETCH_TIMEOUT".to_string(), "300000".to_string()),
        (
            "NPM_CONFIG_CACHE".to_string(),
            workspace_root
                .join(".npm-cache")
                .to_string_lossy()
                .into_owned(),
        ),
    ]
}

/// State machine of a single build. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Init,
    Precheck,
    Packages,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl BuildPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildPhase::Success | BuildPhase::Failed | BuildPhase::Cancelled
        )
    }
}

/// How a build that ran to a terminal state went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildFailure {
    /// Non-zero exit from the toolchain.
    BuildFailed,
    /// The toolchain exited zero but produced no usable site.
    OutputValidation(String),
    /// Killed at the job deadline.
    Timeout,
}

#[derive(Debug, Error)]
pub enum BuildError {
    /// Missing entry file or unusable toolchain; nothing was run.
    #[error("build prerequisite not met: {0}")]
    Prerequisite(String),

    #[error("failed to spawn build command: {0}")]
    Spawn(std::io::Error),

    #[error("workspace error: {0}")]
    Workspace(#[from] crate::workspace::WorkspaceError),
}

pub type Result<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    pub exit_code: i32,
    pub logs: Vec<String>,
    pub duration: Duration,
    /// Relative output path inside the workspace, always [`OUTPUT_DIR`].
    pub output_dir: &'static str,
    pub phase: BuildPhase,
    pub failure: Option<BuildFailure>,
    /// Advisory percentage inferred from toolchain output, if any.
    pub inferred_progress: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct BuildRunner {
    command: String,
    theme: String,
    installer: PackageInstaller,
}

impl BuildRunner {
    pub fn new(command: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            theme: theme.into(),
            installer: PackageInstaller::default(),
        }
    }

    pub fn with_installer(mut self, installer: PackageInstaller) -> Self {
        self.installer = installer;
        self
    }

    fn command_vector(&self) -> Result<(String, Vec<String>)> {
        let mut parts = self.command.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| BuildError::Prerequisite("build command is empty".to_string()))?;
        Ok((program, parts.collect()))
    }

    /// Entry file present and toolchain answering a version probe.
    async fn precheck(&self, workspace: &Workspace) -> Result<()> {
        let mut found = false;
        for entry in ENTRY_FILES {
            if workspace.file_exists(entry).await {
                found = true;
                break;
            }
        }
        if !found {
            return Err(BuildError::Prerequisite(format!(
                "no slide entry file found (expected one of {})",
                ENTRY_FILES.join(", ")
            )));
        }

        let (program, args) = self.command_vector()?;
        let mut probe = Command::new(&program);
        probe
            .args(&args)
            .arg("--version")
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(VERSION_PROBE_TIMEOUT, probe.status()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(BuildError::Prerequisite(format!(
                "build CLI version probe exited with {}",
                status.code().unwrap_or(-1)
            ))),
            Ok(Err(err)) => Err(BuildError::Prerequisite(format!(
                "build CLI not invokable: {}",
                err
            ))),
            Err(_) => Err(BuildError::Prerequisite(
                "build CLI version probe timed out".to_string(),
            )),
        }
    }

    /// Run the full pipeline for one workspace. The subprocess is killed at
    /// `deadline`; the caller decides what terminal job state that maps to.
    pub async fn run(&self, workspace: &Workspace, deadline: Instant) -> Result<BuildResult> {
        let started = Instant::now();
        let mut phase = BuildPhase::Init;
        let mut logs: Vec<String> = Vec::new();

        phase = advance(phase, BuildPhase::Precheck);
        self.precheck(workspace).await?;

        // Package sync is best-effort; a failure is re-caught by the build.
        phase = advance(phase, BuildPhase::Packages);
        match self.installer.sync(workspace).await {
            Ok(results) => {
                for result in results {
                    logs.extend(result.logs);
                    if !result.success {
                        warn!(package = %result.package, "Package install failed, continuing");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "Package sync failed, continuing");
            }
        }

        phase = advance(phase, BuildPhase::Running);
        let (program, args) = self.command_vector()?;
        info!(
            program = %program,
            theme = %self.theme,
            workspace = %workspace.root().display(),
            "Starting build"
        );

        let mut command = Command::new(&program);
        command
            .args(&args)
            .args(["build", "--out", "./dist", "--theme", &self.theme])
            .current_dir(workspace.root())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in command_env(workspace.root()) {
            command.env(key, value);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(BuildError::Spawn)?;

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut readers = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            readers.spawn(capture::scan_lines(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.spawn(capture::scan_lines(stderr, StreamKind::Stderr, tx.clone()));
        }
        // Readers hold the only remaining senders; the channel closes once
        // both have exited.
        drop(tx);

        let stdin_pump = child
            .stdin
            .take()
            .map(|stdin| tokio::spawn(capture::pump_stdin(stdin)));

        // The consumer runs concurrently with the build so the bounded
        // channel keeps draining.
        let collector = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut inferred: Option<u8> = None;
            while let Some(captured) = rx.recv().await {
                if let Some(percent) = progress::infer(&captured.line) {
                    if inferred != Some(percent) {
                        debug!(percent, "Build progress");
                        inferred = Some(percent);
                    }
                }
                lines.push(captured.render());
            }
            (lines, inferred)
        });

        let mut timed_out = false;
        let exit_code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => {
                    warn!(error = %err, "Failed to wait for build process");
                    -1
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!("Build deadline reached, killing process group");
                kill_process_tree(&mut child).await;
                timed_out = true;
                -1
            }
        };

        if let Some(pump) = stdin_pump {
            pump.abort();
        }
        while readers.join_next().await.is_some() {}
        let (captured, inferred_progress) = collector.await.unwrap_or_default();
        logs.extend(captured);

        let duration = started.elapsed();

        if timed_out {
            logs.push(format!(
                "[{}] SYSTEM: build killed after exceeding deadline",
                chrono::Utc::now().format("%H:%M:%S")
            ));
            return Ok(BuildResult {
                success: false,
                exit_code,
                logs,
                duration,
                output_dir: OUTPUT_DIR,
                phase: advance(phase, BuildPhase::Cancelled),
                failure: Some(BuildFailure::Timeout),
                inferred_progress,
            });
        }

        if exit_code != 0 {
            info!(exit_code, ?duration, "Build failed");
            return Ok(BuildResult {
                success: false,
                exit_code,
                logs,
                duration,
                output_dir: OUTPUT_DIR,
                phase: advance(phase, BuildPhase::Failed),
                failure: Some(BuildFailure::BuildFailed),
                inferred_progress,
            });
        }

        match self.validate_output(workspace).await? {
            None => {
                info!(?duration, "Build succeeded");
                Ok(BuildResult {
                    success: true,
                    exit_code,
                    logs,
                    duration,
                    output_dir: OUTPUT_DIR,
                    phase: advance(phase, BuildPhase::Success),
                    failure: None,
                    inferred_progress,
                })
            }
            Some(reason) => {
                warn!(%reason, "Build output validation failed");
                Ok(BuildResult {
                    success: false,
                    exit_code,
                    logs,
                    duration,
                    output_dir: OUTPUT_DIR,
                    phase: advance(phase, BuildPhase::Failed),
                    failure: Some(BuildFailure::OutputValidation(reason)),
                    inferred_progress,
                })
            }
        }
    }

    /// `Ok(None)` means the output is usable; `Ok(Some(reason))` carries
    /// the validation failure.
    async fn validate_output(&self, workspace: &Workspace) -> Result<Option<String>> {
        if !workspace.dir_exists(OUTPUT_DIR).await {
            let mut recovered = false;
            for &alternate in ALTERNATE_OUTPUT_DIRS {
                if !workspace.dir_exists(alternate).await {
                    continue;
                }
                debug!(alternate, "Recovering output from alternate directory");
                for file in workspace.list_all_files(alternate).await? {
                    workspace
                        .copy_file(
                            &format!("{}/{}", alternate, file),
                            &format!("{}/{}", OUTPUT_DIR, file),
                        )
                        .await?;
                }
                recovered = true;
                break;
            }
            if !recovered {
                return Ok(Some("build produced no output directory".to_string()));
            }
        }

        let index = format!("{}/index.html", OUTPUT_DIR);
        if !workspace.file_exists(&index).await {
            return Ok(Some("dist/index.html is missing".to_string()));
        }
        let size = workspace.file_size(&index).await?;
        if size < MIN_INDEX_HTML_BYTES {
            return Ok(Some(format!(
                "dist/index.html is degenerate ({} bytes)",
                size
            )));
        }
        Ok(None)
    }
}

fn advance(from: BuildPhase, to: BuildPhase) -> BuildPhase {
    // Terminal phases are absorbing; reaching one twice is a logic error
    // worth seeing in the logs rather than panicking over.
    if from.is_terminal() {
        warn!(?from, ?to, "Ignoring phase transition out of terminal state");
        return from;
    }
    debug!(?from, ?to, "Build phase");
    to
}

/// Kill the whole process group so toolchain child processes (node, npm)
/// die with their parent.
async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
    if let Err(err) = child.kill().await {
        warn!(error = %err, "Failed to kill build process");
    }
}
