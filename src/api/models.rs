//! Request and response shapes for the HTTP surface.
//!
//! The generation contract: clients pick the `job_id` (so they can upload
//! sources under it before or after submission), tie the job to a course,
//! and optionally register a callback for the terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};
use crate::observability::MetricsSnapshot;
use crate::pool::PoolStats;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub job_id: Uuid,
    pub course_id: Uuid,
    /// Opaque client-side identifier of the uploaded bundle.
    pub source_path: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub course_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub source_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            course_id: job.course_id,
            status: job.status,
            progress: job.progress,
            source_path: job.source_path,
            result_path: job.result_path,
            error: job.error,
            metadata: job.metadata,
            created_at: job.created_at,
            updated_at: job.updated_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobLogsResponse {
    pub job_id: Uuid,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub uploaded: usize,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListResponse {
    pub files: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub course_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub pool: PoolStats,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
