//! One slot in the worker pool.
//!
//! A worker blocks on the shared job channel, drives each received job
//! through the processor under the configured deadline, and keeps its own
//! counters. Status and current job are updated together under one lock so
//! an observer never sees `busy` without a job id (or the reverse).

use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::processor::{JobProcessor, ProcessOutcome};
use crate::jobs::Job;
use crate::observability::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Stopped,
}

#[derive(Debug)]
struct WorkerState {
    status: WorkerStatus,
    current_job: Option<Uuid>,
}

/// Point-in-time view of one worker, exposed through pool stats.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct Worker {
    id: usize,
    state: Mutex<WorkerState>,
    total: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: Mutex::new(WorkerState {
                status: WorkerStatus::Idle,
                current_job: None,
            }),
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let state = self.state.lock().unwrap();
        WorkerSnapshot {
            id: self.id,
            status: state.status,
            current_job_id: state.current_job,
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, status: WorkerStatus, current_job: Option<Uuid>) {
        let mut state = self.state.lock().unwrap();
        state.status = status;
        state.current_job = current_job;
    }

    /// Main loop: pull jobs until the channel closes or shutdown fires.
    pub async fn run(
        self: Arc<Self>,
        receiver: async_channel::Receiver<Job>,
        processor: Arc<JobProcessor>,
        job_timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
        metrics: Arc<Metrics>,
    ) {
        debug!(worker = self.id, "Worker loop started");
        loop {
            let job = tokio::select! {
                // Shutdown wins when both are ready: no job may enter
                // `processing` after stop is signalled.
                biased;
                _ = shutdown.changed() => break,
                received = receiver.recv() => match received {
                    Ok(job) => job,
                    Err(_) => break, // channel closed and drained
                },
            };

            self.set_state(WorkerStatus::Busy, Some(job.id));
            self.total.fetch_add(1, Ordering::Relaxed);

            let deadline = Instant::now() + job_timeout;
            let outcome = match tokio::time::timeout_at(deadline, processor.process(&job, deadline))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The pipeline itself overran the deadline (the build
                    // subprocess is killed via its own deadline watch and
                    // kill-on-drop). Record the terminal state here.
                    warn!(worker = self.id, job_id = %job.id, "Job deadline exceeded");
                    processor.record_timeout(job.id).await
                }
            };

            match outcome {
                ProcessOutcome::Completed => {
                    self.success.fetch_add(1, Ordering::Relaxed);
                    metrics.job_completed();
                }
                ProcessOutcome::Skipped => {
                    // Nothing was processed; counts as a (vacuous) success.
                    self.success.fetch_add(1, Ordering::Relaxed);
                }
                ProcessOutcome::Failed => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    metrics.job_failed();
                }
                ProcessOutcome::TimedOut => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    metrics.job_timed_out();
                }
            }

            self.set_state(WorkerStatus::Idle, None);
        }

        self.set_state(WorkerStatus::Stopped, None);
        info!(worker = self.id, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_consistency() {
        let worker = Worker::new(3);
        let snapshot = worker.snapshot();
        assert_eq!(snapshot.id, 3);
        assert_eq!(snapshot.status, WorkerStatus::Idle);
        assert!(snapshot.current_job_id.is_none());
        assert_eq!(snapshot.total, 0);

        let job_id = Uuid::new_v4();
        worker.set_state(WorkerStatus::Busy, Some(job_id));
        let snapshot = worker.snapshot();
        assert_eq!(snapshot.status, WorkerStatus::Busy);
        assert_eq!(snapshot.current_job_id, Some(job_id));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&WorkerStatus::Busy).unwrap(),
            "\"busy\""
        );
    }
}
