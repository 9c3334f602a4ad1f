use std::sync::Arc;

use crate::config::Config;
use crate::jobs::JobService;
use crate::observability::Metrics;
use crate::pool::WorkerPool;
use crate::storage::StorageService;
use crate::workspace::WorkspaceManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: JobService,
    pub storage: StorageService,
    pub pool: Arc<WorkerPool>,
    pub workspaces: WorkspaceManager,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        jobs: JobService,
        storage: StorageService,
        pool: Arc<WorkerPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let workspaces = WorkspaceManager::new(&config.worker.workspace_base);
        Self {
            config: Arc::new(config),
            jobs,
            storage,
            pool,
            workspaces,
            metrics,
        }
    }
}
