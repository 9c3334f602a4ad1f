//! Service bootstrap and HTTP router.

use axum::extract::DefaultBodyLimit;
use axum::{Router, routing::get, routing::post};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{info, warn};

use super::services;
use super::state::AppState;
use crate::build::BuildRunner;
use crate::config::{Config, StorageKind};
use crate::jobs::{CleanupService, JobService, SqlJobRepository};
use crate::observability::Metrics;
use crate::pool::{JobProcessor, PoolConfig, WorkerPool};
use crate::storage::s3::S3Settings;
use crate::storage::{BlobStore, FsBlobStore, S3BlobStore, StorageService};
use crate::workspace::WorkspaceManager;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    let max_upload = state.config.server.max_upload_bytes.as_u64() as usize;

    Router::new()
        .route("/api/v1/generate", post(services::create_generation_job))
        .route("/api/v1/jobs", get(services::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(services::get_job))
        .route("/api/v1/jobs/{job_id}/logs", get(services::get_job_logs))
        .route(
            "/api/v1/storage/jobs/{job_id}/sources",
            post(services::upload_job_sources)
                .get(services::list_job_sources)
                .delete(services::delete_job_sources),
        )
        .route(
            "/api/v1/storage/courses/{course_id}/results",
            get(services::list_course_results),
        )
        .route(
            "/api/v1/storage/courses/{course_id}/results/{*path}",
            get(services::get_course_result),
        )
        .route("/api/v1/workers/stats", get(services::worker_stats))
        .route("/health", get(services::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload))
        // Decompress gzip request bodies transparently.
        .layer(RequestDecompressionLayer::new())
}

/// Assemble every subsystem from configuration and serve until shutdown.
pub async fn run(config: Config) -> Result<(), AnyError> {
    let address = config.server.bind_addr()?;

    // SQLite can create the file but not its directory.
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let repository = SqlJobRepository::connect(&config.database.url).await?;
    let jobs = JobService::new(Arc::new(repository));

    let blob_store: Arc<dyn BlobStore> = match config.storage.kind {
        StorageKind::Filesystem => {
            info!(path = %config.storage.path.display(), "Using filesystem blob store");
            Arc::new(FsBlobStore::new(&config.storage.path)?)
        }
        StorageKind::Garage => {
            let settings = S3Settings {
                endpoint: config.storage.endpoint.clone().unwrap_or_default(),
                access_key: config.storage.access_key.clone().unwrap_or_default(),
                secret_key: config.storage.secret_key.clone().unwrap_or_default(),
                bucket: config.storage.bucket.clone().unwrap_or_default(),
                region: config.storage.region.clone(),
            };
            Arc::new(S3BlobStore::connect(settings).await?)
        }
    };
    let storage = StorageService::new(blob_store);

    let metrics = Arc::new(Metrics::new());
    let runner = BuildRunner::new(
        config.worker.build_command.clone(),
        config.worker.default_theme.clone(),
    );
    let processor = JobProcessor::new(
        jobs.clone(),
        storage.clone(),
        runner,
        Arc::clone(&metrics),
        config.worker.workspace_base.clone(),
        config.worker.cleanup_workspace,
    );

    let pool = Arc::new(WorkerPool::new(
        PoolConfig {
            worker_count: config.worker.count,
            poll_interval: config.worker.poll_interval.into(),
            job_timeout: config.worker.job_timeout.into(),
        },
        jobs.clone(),
        processor,
        Arc::clone(&metrics),
    ));
    pool.start();

    let cleanup = CleanupService::new(
        jobs.clone(),
        config.cleanup.interval.into(),
        config.cleanup.max_job_age.into(),
    );
    cleanup.start();

    let workspace_sweep = spawn_workspace_sweep(&config);

    let state = AppState::new(config, jobs, storage, Arc::clone(&pool), metrics);
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "slideforge API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    workspace_sweep.abort();
    cleanup.stop().await;
    pool.stop().await;

    Ok(())
}

/// Orphaned workspaces (crashes, cleanup disabled) age out on the cleanup
/// cadence.
fn spawn_workspace_sweep(config: &Config) -> tokio::task::JoinHandle<()> {
    let manager = WorkspaceManager::new(&config.worker.workspace_base);
    let interval = config.cleanup.interval.as_duration();
    let max_age = config.worker.max_workspace_age.as_duration();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let cutoff = SystemTime::now() - max_age;
            match manager.cleanup_older_than(cutoff).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Swept stale workspaces"),
                Err(err) => warn!(error = %err, "Workspace sweep failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
