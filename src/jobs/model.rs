//! Generation job entity and status machine.
//!
//! A job is one unit of work: build the slide deck uploaded under
//! `sources/<job_id>/` and publish the static site under the owning course.
//! The database row is the single source of truth for a job; only the worker
//! that claimed it mutates it while it is `processing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Bounds enforced on client-supplied job metadata.
pub const MAX_METADATA_KEYS: usize = 50;
pub const MAX_METADATA_KEY_LEN: usize = 100;
pub const MAX_METADATA_VALUE_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "timeout" => Ok(JobStatus::Timeout),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// One row of the `generation_jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub course_id: Uuid,
    pub status: JobStatus,
    /// Pipeline progress in percent, monotonically non-decreasing.
    pub progress: u8,
    pub source_path: String,
    pub result_path: Option<String>,
    pub callback_url: Option<String>,
    pub error: Option<String>,
    /// Timestamped log lines, append-only, stored as a JSON array.
    pub logs: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Fresh job in `pending` with valid-empty logs and metadata.
    pub fn new(id: Uuid, course_id: Uuid, source_path: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            course_id,
            status: JobStatus::Pending,
            progress: 0,
            source_path,
            result_path: None,
            callback_url: None,
            error: None,
            logs: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata has {0} keys, limit is {MAX_METADATA_KEYS}")]
    TooManyKeys(usize),
    #[error("metadata key '{0}' exceeds {MAX_METADATA_KEY_LEN} characters")]
    KeyTooLong(String),
    #[error("metadata value for key '{0}' exceeds {MAX_METADATA_VALUE_LEN} characters")]
    ValueTooLong(String),
}

/// Enforce the metadata bounds on a client-supplied map.
pub fn validate_metadata(metadata: &Map<String, Value>) -> Result<(), MetadataError> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(MetadataError::TooManyKeys(metadata.len()));
    }
    for (key, value) in metadata {
        if key.len() > MAX_METADATA_KEY_LEN {
            return Err(MetadataError::KeyTooLong(key.clone()));
        }
        if value.to_string().len() > MAX_METADATA_VALUE_LEN {
            return Err(MetadataError::ValueTooLong(key.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Timeout,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new(Uuid::new_v4(), Uuid::new_v4(), "sources/x".to_string());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.logs.is_empty());
        assert!(job.metadata.is_empty());
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.created_at <= job.updated_at);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn test_metadata_limits() {
        let mut ok = Map::new();
        ok.insert("course".to_string(), json!("rust-101"));
        assert!(validate_metadata(&ok).is_ok());

        let mut too_many = Map::new();
        for i in 0..=MAX_METADATA_KEYS {
            too_many.insert(format!("k{}", i), json!(i));
        }
        assert!(matches!(
            validate_metadata(&too_many),
            Err(MetadataError::TooManyKeys(_))
        ));

        let mut long_key = Map::new();
        long_key.insert("k".repeat(MAX_METADATA_KEY_LEN + 1), json!(1));
        assert!(matches!(
            validate_metadata(&long_key),
            Err(MetadataError::KeyTooLong(_))
        ));

        let mut long_value = Map::new();
        long_value.insert(
            "k".to_string(),
            json!("v".repeat(MAX_METADATA_VALUE_LEN + 1)),
        );
        assert!(matches!(
            validate_metadata(&long_value),
            Err(MetadataError::ValueTooLong(_))
        ));
    }
}
