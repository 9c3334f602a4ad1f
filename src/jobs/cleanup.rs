//! Periodic sweep of old terminal jobs.
//!
//! Runs on its own cadence, independent of the worker pool. Blob objects
//! belonging to purged jobs are left alone.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::service::JobService;

pub struct CleanupService {
    jobs: JobService,
    interval: Duration,
    max_age: Duration,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupService {
    pub fn new(jobs: JobService, interval: Duration, max_age: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            jobs,
            interval,
            max_age,
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sweep loop. Idempotent.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            debug!("Cleanup service already running");
            return;
        }

        let jobs = self.jobs.clone();
        let interval = self.interval;
        let max_age = self.max_age;
        let mut stop_rx = self.stop_tx.subscribe();

        info!(interval = ?interval, max_age = ?max_age, "Cleanup service started");
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so startup isn't a sweep.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match jobs.cleanup_old_jobs(max_age).await {
                            Ok(removed) => {
                                debug!(removed, "Cleanup tick finished");
                            }
                            Err(err) => {
                                // Next tick retries; one failed sweep is not fatal.
                                error!(error = %err, "Cleanup tick failed");
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        info!("Cleanup service stopping");
                        break;
                    }
                }
            }
        }));
    }

    /// Signal the loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = self.stop_tx.send(true);
            if let Err(err) = handle.await {
                error!(error = %err, "Cleanup loop panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobStatus;
    use crate::jobs::repository::InMemoryJobRepository;
    use crate::jobs::service::NewJob;
    use std::sync::Arc;
    use uuid::Uuid;

    fn test_jobs() -> JobService {
        JobService::new(Arc::new(InMemoryJobRepository::new()))
    }

    fn new_job_request() -> NewJob {
        NewJob {
            job_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            source_path: "sources/x".to_string(),
            callback_url: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_sweeps_terminal_jobs_on_tick() {
        let jobs = test_jobs();
        let job = jobs.create_job(new_job_request()).await.unwrap();
        jobs.update_job_status(job.id, JobStatus::Failed, 20, Some("no sources".to_string()))
            .await
            .unwrap();

        let cleanup = CleanupService::new(
            jobs.clone(),
            Duration::from_millis(20),
            Duration::ZERO,
        );
        cleanup.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        cleanup.stop().await;

        assert!(jobs.get_job(job.id).await.is_err());
    }

    #[tokio::test]
    async fn test_never_sweeps_active_jobs() {
        let jobs = test_jobs();
        let pending = jobs.create_job(new_job_request()).await.unwrap();
        let processing = jobs.create_job(new_job_request()).await.unwrap();
        jobs.claim_job(processing.id).await.unwrap();

        let cleanup = CleanupService::new(
            jobs.clone(),
            Duration::from_millis(20),
            Duration::ZERO,
        );
        cleanup.start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        cleanup.stop().await;

        assert!(jobs.get_job(pending.id).await.is_ok());
        assert!(jobs.get_job(processing.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let cleanup = CleanupService::new(
            test_jobs(),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        cleanup.start();
        cleanup.start();
        cleanup.stop().await;
        cleanup.stop().await;
    }
}
