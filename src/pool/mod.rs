//! Worker pool and polling dispatcher.
//!
//! The pool owns its workers, the bounded job channel (capacity 2×N), and
//! the dispatcher loop. The dispatcher polls the repository for `pending`
//! jobs on a ticker and hands them to workers with a non-blocking send; a
//! full channel is natural back-pressure, the job is re-fetched next tick.
//! Handoff is at-least-once; the conditional claim in the processor keeps
//! execution effectively at-most-once-active per job.

pub mod processor;
pub mod worker;

pub use processor::{JobProcessor, ProcessOutcome};
pub use worker::{Worker, WorkerSnapshot, WorkerStatus};

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::jobs::{Job, JobService, JobStatus};
use crate::observability::Metrics;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
}

/// Snapshot of the pool, exposed through the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub worker_count: usize,
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub workers: Vec<WorkerSnapshot>,
}

struct PoolState {
    running: bool,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerPool {
    config: PoolConfig,
    jobs: JobService,
    processor: Arc<JobProcessor>,
    metrics: Arc<Metrics>,
    workers: Vec<Arc<Worker>>,
    sender: async_channel::Sender<Job>,
    receiver: async_channel::Receiver<Job>,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        jobs: JobService,
        processor: JobProcessor,
        metrics: Arc<Metrics>,
    ) -> Self {
        let capacity = config.worker_count.max(1) * 2;
        let (sender, receiver) = async_channel::bounded(capacity);
        let workers = (0..config.worker_count.max(1))
            .map(|id| Arc::new(Worker::new(id)))
            .collect();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            jobs,
            processor: Arc::new(processor),
            metrics,
            workers,
            sender,
            receiver,
            shutdown_tx,
            state: Mutex::new(PoolState {
                running: false,
                handles: Vec::new(),
            }),
        }
    }

    /// Spawn worker loops and the dispatcher. Idempotent.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        if state.running {
            debug!("Worker pool already running");
            return;
        }
        state.running = true;

        info!(
            workers = self.workers.len(),
            poll_interval = ?self.config.poll_interval,
            job_timeout = ?self.config.job_timeout,
            "Worker pool starting"
        );

        for worker in &self.workers {
            state.handles.push(tokio::spawn(Arc::clone(worker).run(
                self.receiver.clone(),
                Arc::clone(&self.processor),
                self.config.job_timeout,
                self.shutdown_tx.subscribe(),
                Arc::clone(&self.metrics),
            )));
        }

        state.handles.push(tokio::spawn(dispatcher_loop(
            self.jobs.clone(),
            self.sender.clone(),
            self.config.poll_interval,
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Signal shutdown, close the channel, and wait for every loop to
    /// exit. In-flight jobs finish under their own deadline. Idempotent.
    pub async fn stop(&self) {
        let handles = {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                return;
            }
            state.running = false;
            std::mem::take(&mut state.handles)
        };

        info!("Worker pool stopping");
        let _ = self.shutdown_tx.send(true);
        self.sender.close();

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Pool task panicked");
            }
        }
        info!("Worker pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            running: self.state.lock().unwrap().running,
            worker_count: self.workers.len(),
            queue_len: self.sender.len(),
            queue_capacity: self.sender.capacity().unwrap_or(0),
            workers: self.workers.iter().map(|w| w.snapshot()).collect(),
        }
    }
}

/// Poll for pending jobs on a ticker and feed the channel. Tick errors are
/// logged and skipped; the next tick retries.
async fn dispatcher_loop(
    jobs: JobService,
    sender: async_channel::Sender<Job>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    debug!("Dispatcher started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let pending = match jobs
                    .list_jobs(Some(JobStatus::Pending), None, None, None)
                    .await
                {
                    Ok(pending) => pending,
                    Err(err) => {
                        error!(error = %err, "Failed to list pending jobs, skipping tick");
                        continue;
                    }
                };

                for job in pending {
                    match sender.try_send(job) {
                        Ok(()) => {}
                        Err(async_channel::TrySendError::Full(job)) => {
                            // Back-pressure: drop, re-fetched next tick.
                            debug!(job_id = %job.id, "Job channel full, deferring");
                            break;
                        }
                        Err(async_channel::TrySendError::Closed(_)) => {
                            debug!("Job channel closed, dispatcher exiting");
                            return;
                        }
                    }
                }
            }
        }
    }
    debug!("Dispatcher stopped");
}
