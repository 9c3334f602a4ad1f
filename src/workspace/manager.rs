//! Enumeration and retention sweep of on-disk workspaces.
//!
//! Only direct children of the base directory whose names parse as UUIDs
//! are considered workspaces; anything else in the tree is ignored.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::Result;

#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    pub job_id: Uuid,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size_bytes: u64,
    pub file_count: usize,
    pub has_dist: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub total_file_count: usize,
    pub with_dist: usize,
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base: PathBuf,
}

impl WorkspaceManager {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// All workspaces currently on disk.
    pub async fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        let base = self.base.clone();
        let infos = tokio::task::spawn_blocking(move || scan_workspaces(&base))
            .await
            .map_err(|err| super::WorkspaceError::Io(std::io::Error::other(err.to_string())))??;
        Ok(infos)
    }

    /// Aggregate view over [`list`](Self::list).
    pub async fn stats(&self) -> Result<WorkspaceStats> {
        let infos = self.list().await?;
        Ok(WorkspaceStats {
            count: infos.len(),
            total_size_bytes: infos.iter().map(|i| i.size_bytes).sum(),
            total_file_count: infos.iter().map(|i| i.file_count).sum(),
            with_dist: infos.iter().filter(|i| i.has_dist).count(),
        })
    }

    /// Remove workspaces whose modification time precedes the cutoff.
    /// Returns how many were removed.
    pub async fn cleanup_older_than(&self, cutoff: SystemTime) -> Result<usize> {
        let mut removed = 0;
        for info in self.list().await? {
            if info.modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_dir_all(&info.path).await {
                Ok(()) => {
                    info!(job_id = %info.job_id, "Removed stale workspace");
                    removed += 1;
                }
                Err(err) => {
                    warn!(job_id = %info.job_id, error = %err, "Failed to remove stale workspace");
                }
            }
        }
        Ok(removed)
    }
}

fn scan_workspaces(base: &Path) -> Result<Vec<WorkspaceInfo>> {
    let mut infos = Vec::new();
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(infos),
        Err(err) => return Err(err.into()),
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Ok(job_id) = Uuid::parse_str(&name.to_string_lossy()) else {
            continue;
        };

        let path = entry.path();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut size_bytes = 0;
        let mut file_count = 0;
        for file in WalkDir::new(&path).into_iter().filter_map(|e| e.ok()) {
            if file.file_type().is_file() {
                file_count += 1;
                size_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }

        infos.push(WorkspaceInfo {
            job_id,
            has_dist: path.join("dist").is_dir(),
            path,
            modified,
            size_bytes,
            file_count,
        });
    }

    infos.sort_by_key(|info| info.job_id);
    Ok(infos)
}
