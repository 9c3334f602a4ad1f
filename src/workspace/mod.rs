//! Per-job working directory with path-safe file operations.
//!
//! A workspace is rooted at `<base>/<job_id>` and owned by exactly one
//! worker for the duration of one job. Every relative path is validated
//! before touching the filesystem, and cleanup refuses to run on any path
//! that does not embed the job id.

pub mod manager;

pub use manager::{WorkspaceInfo, WorkspaceManager, WorkspaceStats};

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid workspace path: {0}")]
    InvalidPath(String),

    #[error("workspace base is not writable: {0}")]
    BaseNotWritable(String),

    #[error("refusing unsafe cleanup of '{0}'")]
    UnsafeCleanup(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    job_id: Uuid,
}

impl Workspace {
    /// Create `<base>/<job_id>`, probing the base directory for
    /// writability with a transient test file first.
    pub async fn create(base: &Path, job_id: Uuid) -> Result<Self> {
        tokio::fs::create_dir_all(base).await?;

        let probe = base.join(format!(".probe-{}", job_id));
        if let Err(err) = tokio::fs::write(&probe, b"probe").await {
            return Err(WorkspaceError::BaseNotWritable(format!(
                "{}: {}",
                base.display(),
                err
            )));
        }
        let _ = tokio::fs::remove_file(&probe).await;

        let root = base.join(job_id.to_string());
        tokio::fs::create_dir_all(&root).await?;
        debug!(%job_id, root = %root.display(), "Workspace created");

        Ok(Self { root, job_id })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Root a relative path inside the workspace. Absolute paths and any
    /// parent-directory component are rejected.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if path.is_absolute() {
            return Err(WorkspaceError::InvalidPath(relative.to_string()));
        }
        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(WorkspaceError::InvalidPath(relative.to_string()));
            }
        }
        Ok(self.root.join(path))
    }

    /// Write a file, creating intermediate directories.
    pub async fn write_file(&self, relative: &str, data: &[u8]) -> Result<()> {
        let target = self.resolve(relative)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        Ok(())
    }

    pub async fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.resolve(relative)?).await?)
    }

    pub async fn read_to_string(&self, relative: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.resolve(relative)?).await?)
    }

    pub async fn file_exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn dir_exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn file_size(&self, relative: &str) -> Result<u64> {
        Ok(tokio::fs::metadata(self.resolve(relative)?).await?.len())
    }

    /// File names directly under `dir`, non-recursive, files only.
    pub async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(dir)?;
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every file under `dir`, recursive, as paths relative to `dir`.
    pub async fn list_all_files(&self, dir: &str) -> Result<Vec<String>> {
        let root = self.resolve(dir)?;
        let files = tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    files.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|err| WorkspaceError::Io(std::io::Error::other(err.to_string())))?;
        Ok(files)
    }

    pub async fn create_dir(&self, relative: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.resolve(relative)?).await?;
        Ok(())
    }

    pub async fn copy_file(&self, src: &str, dst: &str) -> Result<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(from, to).await?;
        Ok(())
    }

    /// Recursively remove the workspace tree.
    ///
    /// Refuses when the absolute path is empty, the filesystem root, or
    /// does not contain the job id string. That last check is the fence
    /// against a mangled base directory turning cleanup into `rm -rf /`.
    pub async fn cleanup(&self) -> Result<()> {
        let path_str = self.root.to_string_lossy();
        if path_str.is_empty() || path_str == "/" {
            return Err(WorkspaceError::UnsafeCleanup(path_str.into_owned()));
        }
        if !path_str.contains(&self.job_id.to_string()) {
            return Err(WorkspaceError::UnsafeCleanup(path_str.into_owned()));
        }

        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(job_id = %self.job_id, "Workspace removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(job_id = %self.job_id, error = %err, "Workspace cleanup failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_workspace() -> (Workspace, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let workspace = Workspace::create(temp_dir.path(), Uuid::new_v4())
            .await
            .unwrap();
        (workspace, temp_dir)
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (ws, _temp) = create_test_workspace().await;

        ws.write_file("slides.md", b"# Deck").await.unwrap();
        assert_eq!(ws.read_file("slides.md").await.unwrap(), b"# Deck");
        assert!(ws.file_exists("slides.md").await);
        assert_eq!(ws.file_size("slides.md").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_write_creates_intermediate_dirs() {
        let (ws, _temp) = create_test_workspace().await;

        ws.write_file("assets/img/logo.png", b"png").await.unwrap();
        assert!(ws.dir_exists("assets/img").await);
        assert!(ws.file_exists("assets/img/logo.png").await);
    }

    #[tokio::test]
    async fn test_rejects_traversal_and_absolute() {
        let (ws, _temp) = create_test_workspace().await;

        assert!(matches!(
            ws.write_file("../escape.md", b"x").await,
            Err(WorkspaceError::InvalidPath(_))
        ));
        assert!(matches!(
            ws.read_file("/etc/passwd").await,
            Err(WorkspaceError::InvalidPath(_))
        ));
        assert!(!ws.file_exists("../escape.md").await);
    }

    #[tokio::test]
    async fn test_list_files_non_recursive() {
        let (ws, _temp) = create_test_workspace().await;

        ws.write_file("dist/index.html", b"<html>").await.unwrap();
        ws.write_file("dist/app.js", b"js").await.unwrap();
        ws.write_file("dist/assets/x.css", b"css").await.unwrap();

        let files = ws.list_files("dist").await.unwrap();
        assert_eq!(files, vec!["app.js", "index.html"]);
    }

    #[tokio::test]
    async fn test_list_all_files_recursive() {
        let (ws, _temp) = create_test_workspace().await;

        ws.write_file("dist/index.html", b"<html>").await.unwrap();
        ws.write_file("dist/assets/x.css", b"css").await.unwrap();

        let files = ws.list_all_files("dist").await.unwrap();
        assert_eq!(files, vec!["assets/x.css", "index.html"]);
    }

    #[tokio::test]
    async fn test_copy_file() {
        let (ws, _temp) = create_test_workspace().await;

        ws.write_file("a.md", b"content").await.unwrap();
        ws.copy_file("a.md", "backup/a.md").await.unwrap();
        assert_eq!(ws.read_file("backup/a.md").await.unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_cleanup_removes_tree() {
        let (ws, temp) = create_test_workspace().await;

        ws.write_file("slides.md", b"x").await.unwrap();
        ws.cleanup().await.unwrap();
        assert!(!temp.path().join(ws.job_id().to_string()).exists());

        // Second cleanup of a gone tree succeeds.
        ws.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_refuses_foreign_path() {
        let temp_dir = TempDir::new().unwrap();
        // Forge a workspace whose root does not contain its job id.
        let ws = Workspace {
            root: temp_dir.path().to_path_buf(),
            job_id: Uuid::new_v4(),
        };

        assert!(matches!(
            ws.cleanup().await,
            Err(WorkspaceError::UnsafeCleanup(_))
        ));
        assert!(temp_dir.path().exists());
    }
}
