//! Filesystem blob backend.
//!
//! Maps `key` to `<base>/<key>`. Writes go through a temporary file and a
//! rename so a concurrent `get` never observes a partial object.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{BlobStore, Result, StorageError};

const TMP_DIR: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base: PathBuf,
}

impl FsBlobStore {
    /// Create the backend rooted at `base`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(&base)?;
        std::fs::create_dir_all(base.join(TMP_DIR))?;
        debug!(base = %base.display(), "Filesystem blob store ready");
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Map a key to its on-disk location, confined under `base`. Callers
    /// validate client paths before they become keys; this is the backend's
    /// own fence against a key that would resolve outside the tree.
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        for segment in key.split('/') {
            if segment == ".." || segment.contains('\\') {
                return Err(StorageError::InvalidKey(key.to_string()));
            }
        }
        Ok(self.base.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            create_dir_all_mode(parent).await?;
        }

        // Write-then-rename keeps readers from ever seeing a partial file.
        let tmp = self.base.join(TMP_DIR).join(Uuid::new_v4().to_string());
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }

        debug!(key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        match tokio::fs::read(self.object_path(key)?).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match tokio::fs::metadata(self.object_path(key)?).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.object_path(key)?).await {
            Ok(()) => Ok(()),
            // Idempotent: a missing file is a successful delete.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.base.clone();
        let prefix = prefix.to_string();

        // walkdir is synchronous; the tree can be large, so keep it off the
        // runtime threads.
        let keys = tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&base) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if key.starts_with(TMP_DIR) {
                    continue;
                }
                if key.starts_with(&prefix) {
                    keys.push(key);
                }
            }
            keys.sort();
            keys
        })
        .await
        .map_err(|err| {
            warn!(error = %err, "List walk task failed");
            StorageError::Backend(err.to_string())
        })?;

        Ok(keys)
    }

    async fn presigned_url(&self, key: &str) -> Result<String> {
        // No URL scheme to sign on a local tree; callers get the logical key.
        Ok(key.to_string())
    }
}

#[cfg(unix)]
async fn create_dir_all_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&path)
    })
    .await
    .map_err(|err| std::io::Error::other(err.to_string()))?
}

#[cfg(not(unix))]
async fn create_dir_all_mode(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
