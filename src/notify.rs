//! Callback delivery for terminal job states.
//!
//! When a job carries a `callback_url`, the service POSTs a status payload
//! there after the terminal transition. Delivery is best-effort with
//! bounded retries; a dead callback endpoint never affects the job.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::jobs::{Job, JobStatus};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub job_id: Uuid,
    pub course_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
}

impl From<&Job> for CallbackPayload {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            course_id: job.course_id,
            status: job.status,
            progress: job.progress,
            error: job.error.clone(),
            result_path: job.result_path.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CallbackNotifier {
    client: reqwest::Client,
}

impl Default for CallbackNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("slideforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// POST the job's terminal state to its callback URL, if it has one.
    pub async fn notify_job(&self, job: &Job) {
        let Some(url) = job.callback_url.as_deref() else {
            return;
        };
        let payload = CallbackPayload::from(job);

        let mut attempts = 0;
        loop {
            attempts += 1;

            match self.post_once(url, &payload).await {
                Ok(()) => {
                    debug!(job_id = %job.id, url, attempts, "Callback delivered");
                    return;
                }
                Err(err) => {
                    if attempts >= MAX_ATTEMPTS {
                        warn!(job_id = %job.id, url, attempts, error = %err, "Callback delivery gave up");
                        return;
                    }
                    warn!(job_id = %job.id, url, attempts, error = %err, "Callback delivery failed, retrying");

                    // Exponential backoff: 1s, 2s
                    let backoff = Duration::from_secs(2u64.pow(attempts - 1));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn post_once(&self, url: &str, payload: &CallbackPayload) -> Result<(), String> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn terminal_job(callback_url: Option<String>) -> Job {
        let mut job = Job::new(Uuid::new_v4(), Uuid::new_v4(), "sources/x".to_string());
        job.callback_url = callback_url;
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.result_path = Some("results/c".to_string());
        job
    }

    #[test]
    fn test_payload_shape() {
        let job = terminal_job(None);
        let payload = CallbackPayload::from(&job);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress"], 100);
        assert_eq!(json["result_path"], "results/c");
        // Absent error is omitted entirely.
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_notify_without_url_is_a_no_op() {
        let notifier = CallbackNotifier::new();
        notifier.notify_job(&terminal_job(None)).await;
    }

    #[tokio::test]
    async fn test_delivers_to_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = Arc::clone(&hits);

        let app = Router::new().route(
            "/hook",
            post(move |Json(payload): Json<serde_json::Value>| {
                let hits = Arc::clone(&hits_handler);
                async move {
                    assert_eq!(payload["status"], "completed");
                    hits.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let job = terminal_job(Some(format!("http://{}/hook", address)));
        CallbackNotifier::new().notify_job(&job).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
