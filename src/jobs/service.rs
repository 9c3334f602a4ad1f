//! Business operations on jobs, layered over the repository.
//!
//! All mutation goes through here so state-machine rules are enforced in
//! one place and every operation leaves a trace line.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{self, Job, JobStatus, MetadataError};
use super::repository::{JobFilter, JobRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job already exists: {0}")]
    Duplicate(Uuid),

    #[error("invalid job request: {0}")]
    Validation(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for JobServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => JobServiceError::NotFound(id),
            RepositoryError::Duplicate(id) => JobServiceError::Duplicate(id),
            other => JobServiceError::Repository(other),
        }
    }
}

impl From<MetadataError> for JobServiceError {
    fn from(err: MetadataError) -> Self {
        JobServiceError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, JobServiceError>;

/// Parameters for job creation, assembled by the API layer from a
/// validated generation request.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: Uuid,
    pub course_id: Uuid,
    pub source_path: String,
    pub callback_url: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Clone)]
pub struct JobService {
    repository: Arc<dyn JobRepository>,
}

impl JobService {
    pub fn new(repository: Arc<dyn JobRepository>) -> Self {
        Self { repository }
    }

    /// Create a job in `pending` with progress 0. Idempotency on `job_id`
    /// is the caller's concern; a duplicate id fails on the primary key.
    pub async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        if new_job.source_path.is_empty() {
            return Err(JobServiceError::Validation(
                "source_path must not be empty".to_string(),
            ));
        }
        if let Some(metadata) = &new_job.metadata {
            model::validate_metadata(metadata)?;
        }

        let job = Job::new(new_job.job_id, new_job.course_id, new_job.source_path)
            .with_callback_url(new_job.callback_url)
            .with_metadata(new_job.metadata.unwrap_or_default());

        self.repository.create(&job).await?;
        info!(job_id = %job.id, course_id = %job.course_id, "Job created");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job> {
        self.repository
            .get(id)
            .await?
            .ok_or(JobServiceError::NotFound(id))
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        course_id: Option<Uuid>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Job>> {
        let filter = JobFilter {
            status,
            course_id,
            limit: limit.unwrap_or(100),
            offset: offset.unwrap_or(0),
        };
        Ok(self.repository.list(&filter).await?)
    }

    /// Single entry point for status transitions.
    pub async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        error: Option<String>,
    ) -> Result<()> {
        if status == JobStatus::Completed && progress != 100 {
            return Err(JobServiceError::InvalidTransition(format!(
                "completion requires progress 100, got {}",
                progress
            )));
        }
        if progress > 100 {
            return Err(JobServiceError::InvalidTransition(format!(
                "progress {} out of range",
                progress
            )));
        }

        self.repository
            .update_status(id, status, progress, error.clone())
            .await?;
        debug!(job_id = %id, %status, progress, error = ?error, "Job status updated");
        Ok(())
    }

    /// Conditional `pending` → `processing` transition. `false` means
    /// another worker got there first and the caller should move on.
    pub async fn claim_job(&self, id: Uuid) -> Result<bool> {
        let claimed = self.repository.try_claim(id).await?;
        if claimed {
            info!(job_id = %id, "Job claimed");
        } else {
            debug!(job_id = %id, "Job already claimed elsewhere");
        }
        Ok(claimed)
    }

    /// Append a timestamped line to the job's log.
    ///
    /// Read-modify-write without coordination: the single writer is the
    /// worker that owns the job.
    pub async fn add_job_log(&self, id: Uuid, entry: &str) -> Result<()> {
        let mut job = self.get_job(id).await?;
        job.logs
            .push(format!("[{}] {}", Utc::now().format("%H:%M:%S"), entry));
        self.repository.update(&job).await?;
        Ok(())
    }

    /// Append already-formatted lines (build capture output carries its own
    /// timestamps) in one round trip.
    pub async fn append_job_logs(&self, id: Uuid, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut job = self.get_job(id).await?;
        job.logs.extend_from_slice(lines);
        self.repository.update(&job).await?;
        Ok(())
    }

    pub async fn get_job_logs(&self, id: Uuid) -> Result<Vec<String>> {
        Ok(self.get_job(id).await?.logs)
    }

    /// Record where the published artifacts live, set on success before the
    /// completion transition.
    pub async fn set_result_path(&self, id: Uuid, result_path: &str) -> Result<()> {
        let mut job = self.get_job(id).await?;
        job.result_path = Some(result_path.to_string());
        self.repository.update(&job).await?;
        Ok(())
    }

    /// Sweep terminal jobs older than `max_age`.
    pub async fn cleanup_old_jobs(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|err| JobServiceError::Validation(err.to_string()))?;

        let removed = self.repository.delete_old_jobs(cutoff).await?;
        if removed > 0 {
            info!(removed, "Swept old terminal jobs");
        } else {
            debug!("No terminal jobs past retention");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService").finish_non_exhaustive()
    }
}
