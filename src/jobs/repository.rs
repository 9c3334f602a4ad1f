//! Durable job store contract.
//!
//! Two implementations: [`crate::jobs::SqlJobRepository`] over SQLite for
//! the running service, and [`InMemoryJobRepository`] for tests. Both keep
//! the same observable semantics so the rest of the system depends only on
//! the trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use super::model::{Job, JobStatus};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("job already exists: {0}")]
    Duplicate(Uuid),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Filter for [`JobRepository::list`]. Results are always ordered by
/// `created_at` descending.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub course_id: Option<Uuid>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            course_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl JobFilter {
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new row; fails with [`RepositoryError::Duplicate`] when the
    /// primary key is taken.
    async fn create(&self, job: &Job) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Full-row update, bumping `updated_at`.
    async fn update(&self, job: &Job) -> Result<()>;

    /// The concentrated state-transition primitive. Bumps `updated_at`,
    /// keeps `progress` monotonic, sets `started_at` on entry to
    /// `processing` and `completed_at` on entry to any terminal state.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        error: Option<String>,
    ) -> Result<()>;

    /// Conditional `pending` → `processing` transition. Returns `false`
    /// without touching the row when another worker already owns the job.
    /// Sets `progress` to 10 and stamps `started_at` on success.
    async fn try_claim(&self, id: Uuid) -> Result<bool>;

    /// Remove terminal rows older than the cutoff. Active jobs survive
    /// regardless of age. Returns the number of rows removed.
    async fn delete_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Test double holding jobs in a `RwLock<HashMap>`.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_transition(job: &mut Job, status: JobStatus, progress: u8, error: Option<String>) {
        let now = Utc::now();
        job.status = status;
        job.progress = job.progress.max(progress.min(100));
        if let Some(error) = error {
            job.error = Some(error);
        }
        job.updated_at = now;
        if status == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(now);
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().unwrap();
        let mut rows: Vec<Job> = jobs
            .values()
            .filter(|job| filter.status.is_none_or(|s| job.status == s))
            .filter(|job| filter.course_id.is_none_or(|c| job.course_id == c))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let existing = jobs
            .get_mut(&job.id)
            .ok_or(RepositoryError::NotFound(job.id))?;
        *existing = job.clone();
        existing.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        error: Option<String>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        Self::apply_transition(job, status, progress, error);
        Ok(())
    }

    async fn try_claim(&self, id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        Self::apply_transition(job, JobStatus::Processing, 10, None);
        Ok(true)
    }

    async fn delete_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.created_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_job() -> Job {
        Job::new(Uuid::new_v4(), Uuid::new_v4(), "sources/test".to_string())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = InMemoryJobRepository::new();
        let job = sample_job();

        repo.create(&job).await.unwrap();
        let fetched = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let repo = InMemoryJobRepository::new();
        let job = sample_job();

        repo.create(&job).await.unwrap();
        assert!(matches!(
            repo.create(&job).await,
            Err(RepositoryError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let repo = InMemoryJobRepository::new();
        let job = sample_job();
        repo.create(&job).await.unwrap();

        assert!(repo.try_claim(job.id).await.unwrap());
        // Second claim loses.
        assert!(!repo.try_claim(job.id).await.unwrap());

        let claimed = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.progress, 10);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_status_transition_stamps_timestamps() {
        let repo = InMemoryJobRepository::new();
        let job = sample_job();
        repo.create(&job).await.unwrap();

        repo.try_claim(job.id).await.unwrap();
        repo.update_status(job.id, JobStatus::Completed, 100, None)
            .await
            .unwrap();

        let done = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        let completed_at = done.completed_at.unwrap();
        let started_at = done.started_at.unwrap();
        assert!(completed_at >= started_at);
        assert!(started_at >= done.created_at);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let repo = InMemoryJobRepository::new();
        let job = sample_job();
        repo.create(&job).await.unwrap();

        repo.update_status(job.id, JobStatus::Processing, 70, None)
            .await
            .unwrap();
        // A lower progress report must not move the value backwards.
        repo.update_status(job.id, JobStatus::Processing, 30, None)
            .await
            .unwrap();

        let current = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(current.progress, 70);
    }

    #[tokio::test]
    async fn test_list_filters_and_ordering() {
        let repo = InMemoryJobRepository::new();
        let course = Uuid::new_v4();

        let mut first = sample_job();
        first.course_id = course;
        first.created_at = Utc::now() - Duration::seconds(10);
        repo.create(&first).await.unwrap();

        let mut second = sample_job();
        second.course_id = course;
        repo.create(&second).await.unwrap();

        let other = sample_job();
        repo.create(&other).await.unwrap();

        let rows = repo
            .list(&JobFilter {
                course_id: Some(course),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        // Newest first.
        assert_eq!(rows[0].id, second.id);

        let pending = repo
            .list(&JobFilter::with_status(JobStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_list_limit_zero_is_empty() {
        let repo = InMemoryJobRepository::new();
        repo.create(&sample_job()).await.unwrap();

        let rows = repo
            .list(&JobFilter {
                limit: 0,
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_delete_old_jobs_spares_active() {
        let repo = InMemoryJobRepository::new();

        let mut old_done = sample_job();
        old_done.created_at = Utc::now() - Duration::hours(48);
        repo.create(&old_done).await.unwrap();
        repo.update_status(old_done.id, JobStatus::Completed, 100, None)
            .await
            .unwrap();

        let mut old_pending = sample_job();
        old_pending.created_at = Utc::now() - Duration::hours(48);
        repo.create(&old_pending).await.unwrap();

        let cutoff = Utc::now() - Duration::hours(24);
        let removed = repo.delete_old_jobs(cutoff).await.unwrap();

        assert_eq!(removed, 1);
        assert!(repo.get(old_done.id).await.unwrap().is_none());
        // Pending jobs are never swept, regardless of age.
        assert!(repo.get(old_pending.id).await.unwrap().is_some());
    }
}
