//! HTTP handlers: thin glue between axum and the domain services.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use bytes::Bytes;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::models::{
    FileListResponse, GenerationRequest, HealthResponse, JobListResponse, JobLogsResponse,
    JobResponse, ListJobsQuery, StatsResponse, UploadResponse,
};
use super::state::AppState;
use super::validation;
use crate::jobs::{JobStatus, NewJob};
use crate::storage::content_type_for;
use crate::storage::paths;
use crate::storage::service::SourceFile;
use crate::config::StorageKind;

/// Job submission endpoint (POST /api/v1/generate)
///
/// Creates the job record in `pending`; the dispatcher picks it up on its
/// next tick. Sources may be uploaded before or after submission, but the
/// job fails if none exist when a worker claims it.
pub async fn create_generation_job(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(url) = request.callback_url.as_deref() {
        validation::validate_callback_url(url)
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;
    }

    let job = state
        .jobs
        .create_job(NewJob {
            job_id: request.job_id,
            course_id: request.course_id,
            source_path: request.source_path,
            callback_url: request.callback_url,
            metadata: request.metadata,
        })
        .await?;

    state.metrics.job_created();
    info!(job_id = %job.id, course_id = %job.course_id, "Generation job accepted");

    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// Job snapshot endpoint (GET /api/v1/jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.get_job(job_id).await?;
    Ok(Json(JobResponse::from(job)))
}

/// Filtered job listing (GET /api/v1/jobs)
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(ApiError::InvalidRequest)?;

    let jobs = state
        .jobs
        .list_jobs(status, query.course_id, query.limit, query.offset)
        .await?;

    let jobs: Vec<JobResponse> = jobs.into_iter().map(JobResponse::from).collect();
    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
    }))
}

/// Accumulated log lines (GET /api/v1/jobs/{job_id}/logs)
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let logs = state.jobs.get_job_logs(job_id).await?;
    Ok(Json(JobLogsResponse { job_id, logs }))
}

/// Source bundle upload (POST /api/v1/storage/jobs/{job_id}/sources)
///
/// Multipart form; each part's file name is its workspace-relative path,
/// so directory structure survives the round trip. Every path is validated
/// before any byte reaches the blob store.
pub async fn upload_job_sources(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let max_bytes = state.config.server.max_upload_bytes.as_u64() as usize;
    let mut files: Vec<SourceFile> = Vec::new();
    let mut total_bytes = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::InvalidRequest(err.to_string()))?
    {
        let raw_name = field
            .file_name()
            .or(field.name())
            .unwrap_or_default()
            .to_string();
        let path = validation::normalize_upload_path(&raw_name)
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;

        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;

        total_bytes += data.len();
        if total_bytes > max_bytes {
            return Err(ApiError::PayloadTooLarge(total_bytes));
        }

        files.push(SourceFile { path, data });
    }

    if files.is_empty() {
        return Err(ApiError::InvalidRequest(
            "upload contains no files".to_string(),
        ));
    }

    let uploaded = state.storage.upload_job_sources(job_id, &files).await?;
    state.metrics.sources_uploaded(uploaded as u64);

    let mut names: Vec<String> = files.into_iter().map(|f| f.path).collect();
    names.sort();
    info!(%job_id, count = uploaded, "Sources uploaded");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            job_id,
            uploaded,
            files: names,
        }),
    ))
}

/// Source and log removal (DELETE /api/v1/storage/jobs/{job_id}/sources)
///
/// Best-effort by contract; always answers 204.
pub async fn delete_job_sources(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> StatusCode {
    state.storage.cleanup_job(job_id).await;
    StatusCode::NO_CONTENT
}

/// Uploaded source listing (GET /api/v1/storage/jobs/{job_id}/sources)
pub async fn list_job_sources(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state.storage.list_job_sources(job_id).await?;
    Ok(Json(FileListResponse {
        count: files.len(),
        files,
    }))
}

/// Build artifact listing (GET /api/v1/storage/courses/{course_id}/results)
pub async fn list_course_results(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state.storage.list_course_results(course_id).await?;
    Ok(Json(FileListResponse {
        count: files.len(),
        files,
    }))
}

/// Single artifact fetch (GET /api/v1/storage/courses/{course_id}/results/{*path})
///
/// The catch-all segment is client input and is validated before it
/// becomes part of a blob key. On the S3 backend clients are redirected
/// to a presigned URL; the filesystem backend serves the bytes directly.
pub async fn get_course_result(
    State(state): State<AppState>,
    Path((course_id, path)): Path<(Uuid, String)>,
) -> Result<axum::response::Response, ApiError> {
    paths::validate_result_path(&path)
        .map_err(|err| ApiError::InvalidRequest(err.to_string()))?;

    if state.config.storage.kind == StorageKind::Garage {
        let url = state.storage.course_result_url(course_id, &path).await?;
        return Ok(Redirect::temporary(&url).into_response());
    }

    let data: Bytes = state.storage.read_course_result(course_id, &path).await?;
    let headers = [(axum::http::header::CONTENT_TYPE, content_type_for(&path))];
    Ok((headers, data).into_response())
}

/// Worker pool snapshot (GET /api/v1/workers/stats)
pub async fn worker_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        pool: state.pool.stats(),
        metrics: state.metrics.snapshot(),
    })
}

/// Health check (GET /health)
///
/// Probes the database and the blob store; 503 when either is down.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();

    let database = match state.jobs.list_jobs(None, None, Some(1), None).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    components.insert("database".to_string(), database.to_string());

    let storage = match state.storage.store().exists("health/.probe").await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    components.insert("storage".to_string(), storage.to_string());

    // Informational only: the pool is down during startup and shutdown
    // without the service itself being unhealthy.
    let pool = if state.pool.stats().running {
        "running"
    } else {
        "stopped"
    };

    let all_healthy = components.values().all(|status| status == "healthy");
    components.insert("worker_pool".to_string(), pool.to_string());
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
            components,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
