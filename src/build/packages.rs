//! Detection and installation of external slide-deck packages.
//!
//! Slidev resolves themes and addons as npm packages. Before a build we
//! scan the slide sources for declarations, diff against what the manifest
//! and module directory already provide, and install the gap. Installs are
//! best-effort: a failure here is logged and the build decides for itself.

use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::capture::{self, CHANNEL_CAPACITY, StreamKind};
use super::command_env;
use crate::workspace::Workspace;

/// Per-install subprocess deadline.
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// At most this many installs run at once within one job.
pub const MAX_CONCURRENT_INSTALLS: usize = 3;

/// Themes bundled with the Slidev CLI that never need installation.
const BUILTIN_THEMES: &[&str] = &["default", "none", "seriph", "apple-basic"];

/// Slide files scanned for package declarations.
const SLIDE_FILES: &[&str] = &["slides.md", "index.md", "README.md"];

static THEME_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^theme:\s*['"]?([\w@./-]+)['"]?\s*$"#).unwrap()
});

static PACKAGE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"slidev-(?:theme|addon)-[A-Za-z0-9_-]+").unwrap());

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to spawn package manager: {0}")]
    Spawn(std::io::Error),

    #[error("workspace error: {0}")]
    Workspace(#[from] crate::workspace::WorkspaceError),
}

pub type Result<T> = std::result::Result<T, InstallError>;

/// Outcome of one package installation.
#[derive(Debug, Clone)]
pub struct InstallResult {
    pub package: String,
    pub success: bool,
    pub exit_code: i32,
    pub duration: Duration,
    pub logs: Vec<String>,
    /// The package turned out to be present already; nothing was run.
    pub already_installed: bool,
}

#[derive(Debug, Clone)]
pub struct PackageInstaller {
    package_manager: String,
}

impl Default for PackageInstaller {
    fn default() -> Self {
        Self::new("npm")
    }
}

impl PackageInstaller {
    pub fn new(package_manager: impl Into<String>) -> Self {
        Self {
            package_manager: package_manager.into(),
        }
    }

    /// Scan slide files for required package identifiers.
    pub async fn detect_required(&self, workspace: &Workspace) -> Result<Vec<String>> {
        let mut required = Vec::new();

        for file in SLIDE_FILES {
            if !workspace.file_exists(file).await {
                continue;
            }
            let content = workspace.read_to_string(file).await?;

            for captures in THEME_DECL.captures_iter(&content) {
                let name = &captures[1];
                if BUILTIN_THEMES.contains(&name) || name.starts_with('.') {
                    continue;
                }
                let package = if name.starts_with("slidev-theme-") || name.starts_with('@') {
                    name.to_string()
                } else {
                    format!("slidev-theme-{}", name)
                };
                required.push(package);
            }

            for reference in PACKAGE_REF.find_iter(&content) {
                required.push(reference.as_str().to_string());
            }
        }

        required.sort();
        required.dedup();
        debug!(packages = ?required, "Detected required packages");
        Ok(required)
    }

    /// The subset of `required` that neither the manifest nor the module
    /// directory already provides.
    pub async fn missing_packages(
        &self,
        workspace: &Workspace,
        required: &[String],
    ) -> Result<Vec<String>> {
        let declared = self.declared_dependencies(workspace).await;

        let mut missing = Vec::new();
        for package in required {
            if declared.contains(package) {
                continue;
            }
            if workspace
                .dir_exists(&format!("node_modules/{}", package))
                .await
            {
                continue;
            }
            missing.push(package.clone());
        }
        Ok(missing)
    }

    async fn declared_dependencies(&self, workspace: &Workspace) -> Vec<String> {
        let Ok(manifest) = workspace.read_to_string("package.json").await else {
            return Vec::new();
        };
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&manifest) else {
            return Vec::new();
        };

        let mut declared = Vec::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(map) = parsed.get(section).and_then(|v| v.as_object()) {
                declared.extend(map.keys().cloned());
            }
        }
        declared
    }

    /// Install one package with the non-interactive build environment and
    /// the capped-line capture discipline.
    pub async fn install_one(&self, workspace: &Workspace, package: &str) -> Result<InstallResult> {
        if workspace
            .dir_exists(&format!("node_modules/{}", package))
            .await
        {
            return Ok(InstallResult {
                package: package.to_string(),
                success: true,
                exit_code: 0,
                duration: Duration::ZERO,
                logs: Vec::new(),
                already_installed: true,
            });
        }

        info!(package, "Installing package");
        let started = Instant::now();

        let mut command = Command::new(&self.package_manager);
        command
            .arg("install")
            .arg(package)
            .arg("--save")
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in command_env(workspace.root()) {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(InstallError::Spawn)?;

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut readers = JoinSet::new();
        if let Some(stdout) = stdout {
            let tx = tx.clone();
            readers.spawn(capture::scan_lines(stdout, StreamKind::Stdout, tx));
        }
        if let Some(stderr) = stderr {
            readers.spawn(capture::scan_lines(stderr, StreamKind::Stderr, tx));
        } else {
            drop(tx);
        }

        let exit_code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => {
                    warn!(package, error = %err, "Failed to wait for install");
                    -1
                }
            },
            _ = tokio::time::sleep(INSTALL_TIMEOUT) => {
                warn!(package, "Install timed out, killing");
                let _ = child.kill().await;
                -1
            }
        };

        while readers.join_next().await.is_some() {}

        let mut logs = Vec::new();
        while let Some(line) = rx.recv().await {
            logs.push(line.render());
        }

        let result = InstallResult {
            package: package.to_string(),
            success: exit_code == 0,
            exit_code,
            duration: started.elapsed(),
            logs,
            already_installed: false,
        };
        if result.success {
            info!(package, duration = ?result.duration, "Package installed");
        } else {
            warn!(package, exit_code, "Package install failed");
        }
        Ok(result)
    }

    /// Detect, diff, and install everything missing. Partial failures are
    /// reported individually and never abort sibling installs.
    pub async fn sync(&self, workspace: &Workspace) -> Result<Vec<InstallResult>> {
        let required = self.detect_required(workspace).await?;
        if required.is_empty() {
            return Ok(Vec::new());
        }
        let missing = self.missing_packages(workspace, &required).await?;
        if missing.is_empty() {
            debug!("All required packages present");
            return Ok(Vec::new());
        }

        info!(missing = ?missing, "Installing missing packages");
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_INSTALLS));
        let mut installs = JoinSet::new();

        for package in missing {
            let installer = self.clone();
            let workspace = workspace.clone();
            let semaphore = Arc::clone(&semaphore);
            installs.spawn(async move {
                // Closing the semaphore is not part of this flow, so the
                // acquire cannot fail.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                installer.install_one(&workspace, &package).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = installs.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(err)) => warn!(error = %err, "Install task failed"),
                Err(err) => warn!(error = %err, "Install task panicked"),
            }
        }
        results.sort_by(|a, b| a.package.cmp(&b.package));
        Ok(results)
    }
}
