//! SQLite-backed job repository.
//!
//! The schema is embedded and applied at connection time. Timestamps are
//! stored as fixed-width UTC strings (`%Y-%m-%dT%H:%M:%S%.6fZ`) so that
//! lexicographic comparison in SQL matches chronological order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::model::{Job, JobStatus};
use super::repository::{JobFilter, JobRepository, RepositoryError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS generation_jobs (
    id           TEXT PRIMARY KEY,
    course_id    TEXT NOT NULL,
    status       TEXT NOT NULL,
    progress     INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    source_path  TEXT NOT NULL,
    result_path  TEXT,
    callback_url TEXT,
    error        TEXT,
    logs         TEXT NOT NULL DEFAULT '[]',
    metadata     TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    started_at   TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_generation_jobs_course_id    ON generation_jobs (course_id);
CREATE INDEX IF NOT EXISTS idx_generation_jobs_status       ON generation_jobs (status);
CREATE INDEX IF NOT EXISTS idx_generation_jobs_created_at   ON generation_jobs (created_at);
CREATE INDEX IF NOT EXISTS idx_generation_jobs_started_at   ON generation_jobs (started_at);
CREATE INDEX IF NOT EXISTS idx_generation_jobs_completed_at ON generation_jobs (completed_at);
"#;

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'timeout')";

#[derive(Clone)]
pub struct SqlJobRepository {
    pool: SqlitePool,
}

impl SqlJobRepository {
    /// Open (or create) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(RepositoryError::Database)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        info!(url, "Job repository ready");
        Ok(repo)
    }

    /// Private in-memory database, used by tests. A single connection keeps
    /// the `:memory:` database alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

fn decode_uuid(raw: &str) -> std::result::Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

fn row_to_job(row: &SqliteRow) -> std::result::Result<Job, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status)
        .map_err(|err| sqlx::Error::Decode(err.into()))?;

    let logs: String = row.try_get("logs")?;
    let logs: Vec<String> =
        serde_json::from_str(&logs).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

    let metadata: String = row.try_get("metadata")?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;

    let id: String = row.try_get("id")?;
    let course_id: String = row.try_get("course_id")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Job {
        id: decode_uuid(&id)?,
        course_id: decode_uuid(&course_id)?,
        status,
        progress: row.try_get::<i64, _>("progress")? as u8,
        source_path: row.try_get("source_path")?,
        result_path: row.try_get("result_path")?,
        callback_url: row.try_get("callback_url")?,
        error: row.try_get("error")?,
        logs,
        metadata,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
        started_at: started_at.as_deref().map(decode_ts).transpose()?,
        completed_at: completed_at.as_deref().map(decode_ts).transpose()?,
    })
}

#[async_trait]
impl JobRepository for SqlJobRepository {
    async fn create(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, course_id, status, progress, source_path, result_path,
                 callback_url, error, logs, metadata, created_at, updated_at,
                 started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.course_id.to_string())
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&job.source_path)
        .bind(&job.result_path)
        .bind(&job.callback_url)
        .bind(&job.error)
        .bind(serde_json::to_string(&job.logs).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&job.metadata).unwrap_or_else(|_| "{}".to_string()))
        .bind(encode_ts(job.created_at))
        .bind(encode_ts(job.updated_at))
        .bind(job.started_at.map(encode_ts))
        .bind(job.completed_at.map(encode_ts))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RepositoryError::Duplicate(job.id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM generation_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose().map_err(Into::into)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT * FROM generation_jobs WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(course_id) = filter.course_id {
            builder
                .push(" AND course_id = ")
                .push_bind(course_id.to_string());
        }
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row_to_job(row).map_err(Into::into))
            .collect()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs SET
                status = ?, progress = ?, source_path = ?, result_path = ?,
                callback_url = ?, error = ?, logs = ?, metadata = ?,
                updated_at = ?, started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&job.source_path)
        .bind(&job.result_path)
        .bind(&job.callback_url)
        .bind(&job.error)
        .bind(serde_json::to_string(&job.logs).unwrap_or_else(|_| "[]".to_string()))
        .bind(serde_json::to_string(&job.metadata).unwrap_or_else(|_| "{}".to_string()))
        .bind(encode_ts(Utc::now()))
        .bind(job.started_at.map(encode_ts))
        .bind(job.completed_at.map(encode_ts))
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(job.id));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        progress: u8,
        error: Option<String>,
    ) -> Result<()> {
        let now = encode_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs SET
                status = ?1,
                progress = MAX(progress, MIN(?2, 100)),
                error = COALESCE(?3, error),
                updated_at = ?4,
                started_at = CASE
                    WHEN ?1 = 'processing' AND started_at IS NULL THEN ?4
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN ?1 IN ('completed', 'failed', 'timeout') AND completed_at IS NULL THEN ?4
                    ELSE completed_at
                END
            WHERE id = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(progress as i64)
        .bind(error)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn try_claim(&self, id: Uuid) -> Result<bool> {
        let now = encode_ts(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE generation_jobs SET
                status = 'processing',
                progress = MAX(progress, 10),
                updated_at = ?1,
                started_at = COALESCE(started_at, ?1)
            WHERE id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish "already claimed" from "no such job".
        match self.get(id).await? {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(id)),
        }
    }

    async fn delete_old_jobs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM generation_jobs WHERE created_at < ? AND status IN {}",
            TERMINAL_STATUSES
        ))
        .bind(encode_ts(cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
