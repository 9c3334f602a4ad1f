//! Task-oriented storage facade over the blob contract.
//!
//! Encodes the key schema (`sources/...`, `results/...`, `logs/...`) so the rest
//! of the service never assembles blob keys by hand.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::paths;
use super::{BlobStore, Result};

/// Log reads are capped so a runaway build cannot balloon API responses.
const MAX_LOG_READ_BYTES: usize = 1024 * 1024;

/// One uploaded file with its workspace-relative path.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn BlobStore>,
}

impl StorageService {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Upload a bundle of source files for a job, preserving relative paths.
    /// Every path is validated before any byte is written.
    pub async fn upload_job_sources(&self, job_id: Uuid, files: &[SourceFile]) -> Result<usize> {
        for file in files {
            paths::validate_source_path(&file.path)?;
        }

        for file in files {
            self.store
                .put(&paths::source_key(job_id, &file.path), file.data.clone())
                .await?;
        }

        debug!(%job_id, count = files.len(), "Uploaded job sources");
        Ok(files.len())
    }

    pub async fn download_job_source(&self, job_id: Uuid, relative: &str) -> Result<Bytes> {
        self.store.get(&paths::source_key(job_id, relative)).await
    }

    /// Relative paths of every uploaded source file for the job.
    pub async fn list_job_sources(&self, job_id: Uuid) -> Result<Vec<String>> {
        let prefix = paths::source_prefix(job_id);
        let keys = self.store.list(&prefix).await?;
        Ok(strip_prefix(keys, &prefix))
    }

    pub async fn save_course_result(
        &self,
        course_id: Uuid,
        relative: &str,
        data: Bytes,
    ) -> Result<()> {
        self.store
            .put(&paths::result_key(course_id, relative), data)
            .await
    }

    pub async fn read_course_result(&self, course_id: Uuid, relative: &str) -> Result<Bytes> {
        self.store.get(&paths::result_key(course_id, relative)).await
    }

    /// Relative paths of the build artifacts accumulated under a course.
    pub async fn list_course_results(&self, course_id: Uuid) -> Result<Vec<String>> {
        let prefix = paths::result_prefix(course_id);
        let keys = self.store.list(&prefix).await?;
        Ok(strip_prefix(keys, &prefix))
    }

    /// URL an external client can fetch one artifact from.
    pub async fn course_result_url(&self, course_id: Uuid, relative: &str) -> Result<String> {
        self.store
            .presigned_url(&paths::result_key(course_id, relative))
            .await
    }

    pub async fn save_job_log(&self, job_id: Uuid, text: &str) -> Result<()> {
        self.store
            .put(&paths::log_key(job_id), Bytes::from(text.to_string()))
            .await
    }

    pub async fn read_job_log(&self, job_id: Uuid) -> Result<String> {
        let data = self.store.get(&paths::log_key(job_id)).await?;
        let slice = &data[..data.len().min(MAX_LOG_READ_BYTES)];
        Ok(String::from_utf8_lossy(slice).into_owned())
    }

    /// Delete every source object and the log for a job. Best-effort: this
    /// runs after the job already reached a terminal state, so failures are
    /// logged and swallowed.
    pub async fn cleanup_job(&self, job_id: Uuid) {
        let prefix = paths::source_prefix(job_id);
        match self.store.list(&prefix).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(err) = self.store.delete(&key).await {
                        warn!(%job_id, key, error = %err, "Failed to delete source object");
                    }
                }
            }
            Err(err) => {
                warn!(%job_id, error = %err, "Failed to list job sources for cleanup");
            }
        }

        if let Err(err) = self.store.delete(&paths::log_key(job_id)).await {
            warn!(%job_id, error = %err, "Failed to delete job log");
        }
    }
}

fn strip_prefix(keys: Vec<String>, prefix: &str) -> Vec<String> {
    keys.into_iter()
        .filter_map(|key| key.strip_prefix(prefix).map(String::from))
        .collect()
}
