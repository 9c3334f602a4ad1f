//! HTTP surface tests: router wired to in-memory dependencies, driven with
//! `tower::ServiceExt::oneshot`.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt as _;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use slideforge::api::{AppState, router};
use slideforge::build::BuildRunner;
use slideforge::config::Config;
use slideforge::jobs::{InMemoryJobRepository, JobService};
use slideforge::observability::Metrics;
use slideforge::pool::{JobProcessor, PoolConfig, WorkerPool};
use slideforge::storage::{FsBlobStore, StorageService};

const BOUNDARY: &str = "X-SLIDEFORGE-TEST-BOUNDARY";

struct TestApp {
    app: Router,
    storage: StorageService,
    _temp: TempDir,
}

/// Router over isolated dependencies; the pool exists but is not started,
/// uploads and job CRUD don't need workers.
fn build_test_app() -> TestApp {
    let temp = TempDir::new().expect("temp dir");

    let mut config = Config::default();
    config.worker.workspace_base = temp.path().join("workspaces");

    let jobs = JobService::new(Arc::new(InMemoryJobRepository::new()));
    let storage = StorageService::new(Arc::new(
        FsBlobStore::new(temp.path().join("blobs")).expect("blob store"),
    ));
    let metrics = Arc::new(Metrics::new());
    let processor = JobProcessor::new(
        jobs.clone(),
        storage.clone(),
        BuildRunner::new("true", "default"),
        Arc::clone(&metrics),
        config.worker.workspace_base.clone(),
        true,
    );
    let pool = Arc::new(WorkerPool::new(
        PoolConfig {
            worker_count: 1,
            poll_interval: std::time::Duration::from_secs(3600),
            job_timeout: std::time::Duration::from_secs(60),
        },
        jobs.clone(),
        processor,
        Arc::clone(&metrics),
    ));

    let state = AppState::new(config, jobs, storage.clone(), pool, metrics);
    TestApp {
        app: router(state),
        storage,
        _temp: temp,
    }
}

fn generation_request(job_id: Uuid, course_id: Uuid) -> Value {
    json!({
        "job_id": job_id,
        "course_id": course_id,
        "source_path": format!("sources/{}", job_id),
    })
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn multipart_body(files: &[(&str, &str)]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, content) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n\r\n",
                BOUNDARY, name
            )
            .as_bytes(),
        );
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    (
        format!("multipart/form-data; boundary={}", BOUNDARY),
        body,
    )
}

async fn upload(app: &Router, job_id: Uuid, files: &[(&str, &str)]) -> (StatusCode, Value) {
    let (content_type, body) = multipart_body(files);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/storage/jobs/{}/sources", job_id))
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn create_job_returns_created_snapshot() {
    let test = build_test_app();
    let job_id = Uuid::new_v4();
    let course_id = Uuid::new_v4();

    let (status, body) = post_json(
        &test.app,
        "/api/v1/generate",
        generation_request(job_id, course_id),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["job_id"], json!(job_id));
    assert_eq!(body["course_id"], json!(course_id));
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], 0);
}

#[tokio::test]
async fn duplicate_job_id_conflicts() {
    let test = build_test_app();
    let request = generation_request(Uuid::new_v4(), Uuid::new_v4());

    let (first, _) = post_json(&test.app, "/api/v1/generate", request.clone()).await;
    assert_eq!(first, StatusCode::CREATED);

    let (second, body) = post_json(&test.app, "/api/v1/generate", request).await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn invalid_callback_url_is_rejected() {
    let test = build_test_app();
    let mut request = generation_request(Uuid::new_v4(), Uuid::new_v4());
    request["callback_url"] = json!("ftp://example.com/hook");

    let (status, body) = post_json(&test.app, "/api/v1/generate", request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn get_unknown_job_is_not_found() {
    let test = build_test_app();
    let (status, body) = get(&test.app, &format!("/api/v1/jobs/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn list_jobs_filters_by_status_and_course() {
    let test = build_test_app();
    let course = Uuid::new_v4();

    for _ in 0..2 {
        let (status, _) = post_json(
            &test.app,
            "/api/v1/generate",
            generation_request(Uuid::new_v4(), course),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    post_json(
        &test.app,
        "/api/v1/generate",
        generation_request(Uuid::new_v4(), Uuid::new_v4()),
    )
    .await;

    let (status, body) = get(&test.app, &format!("/api/v1/jobs?course_id={}", course)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = get(&test.app, "/api/v1/jobs?status=pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);

    // limit=0 is a valid request for an empty page.
    let (status, body) = get(&test.app, "/api/v1/jobs?limit=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, _) = get(&test.app, "/api/v1/jobs?status=sideways").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_and_list_sources() {
    let test = build_test_app();
    let job_id = Uuid::new_v4();

    let (status, body) = upload(
        &test.app,
        job_id,
        &[("slides.md", "# Hi"), ("assets/logo.svg", "<svg/>")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["uploaded"], 2);

    let (status, body) = get(
        &test.app,
        &format!("/api/v1/storage/jobs/{}/sources", job_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], json!(["assets/logo.svg", "slides.md"]));
}

#[tokio::test]
async fn delete_sources_is_best_effort() {
    let test = build_test_app();
    let job_id = Uuid::new_v4();

    upload(&test.app, job_id, &[("slides.md", "# Hi")]).await;

    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/storage/jobs/{}/sources", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(test.storage.list_job_sources(job_id).await.unwrap().is_empty());

    // Deleting a job with nothing stored also succeeds.
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/storage/jobs/{}/sources", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn path_traversal_upload_is_rejected_before_storage() {
    let test = build_test_app();
    let job_id = Uuid::new_v4();

    let (status, body) = upload(
        &test.app,
        job_id,
        &[("../../etc/passwd", "root:x:0:0"), ("ok.md", "# fine")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    // Nothing was written, not even the valid sibling.
    let sources = test.storage.list_job_sources(job_id).await.unwrap();
    assert!(sources.is_empty());
}

#[tokio::test]
async fn disallowed_extension_is_rejected() {
    let test = build_test_app();
    let (status, _) = upload(&test.app, Uuid::new_v4(), &[("payload.exe", "MZ")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn job_logs_endpoint() {
    let test = build_test_app();
    let job_id = Uuid::new_v4();
    post_json(
        &test.app,
        "/api/v1/generate",
        generation_request(job_id, Uuid::new_v4()),
    )
    .await;

    let (status, body) = get(&test.app, &format!("/api/v1/jobs/{}/logs", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], json!(job_id));
    assert_eq!(body["logs"], json!([]));
}

#[tokio::test]
async fn course_results_round_trip() {
    let test = build_test_app();
    let course_id = Uuid::new_v4();

    test.storage
        .save_course_result(
            course_id,
            "index.html",
            bytes::Bytes::from_static(b"<html>deck</html>"),
        )
        .await
        .unwrap();

    let (status, body) = get(
        &test.app,
        &format!("/api/v1/storage/courses/{}/results", course_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"], json!(["index.html"]));

    // Filesystem backend serves bytes directly with the mapped MIME type.
    let response = test
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/v1/storage/courses/{}/results/index.html",
                    course_id
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"<html>deck</html>");
}

#[tokio::test]
async fn result_fetch_rejects_traversal_paths() {
    let test = build_test_app();
    let course_id = Uuid::new_v4();

    test.storage
        .save_course_result(
            course_id,
            "index.html",
            bytes::Bytes::from_static(b"<html>deck</html>"),
        )
        .await
        .unwrap();

    for bad in [
        "../../../../../../etc/passwd",
        "a/../../secret.txt",
        "..%5C..%5Csecret",
    ] {
        let (status, body) = get(
            &test.app,
            &format!("/api/v1/storage/courses/{}/results/{}", course_id, bad),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "path {:?}", bad);
        assert_eq!(body["code"], "INVALID_REQUEST", "path {:?}", bad);
    }

    // The legitimate artifact still serves.
    let (status, _) = get(
        &test.app,
        &format!("/api/v1/storage/courses/{}/results/index.html", course_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn worker_stats_shape() {
    let test = build_test_app();
    let (status, body) = get(&test.app, "/api/v1/workers/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pool"]["worker_count"], 1);
    assert_eq!(body["pool"]["queue_capacity"], 2);
    assert_eq!(body["pool"]["running"], false);
    assert!(body["pool"]["workers"].is_array());
    assert_eq!(body["metrics"]["jobs_completed"], 0);
}

#[tokio::test]
async fn health_reports_components() {
    let test = build_test_app();
    let (status, body) = get(&test.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["database"], "healthy");
    assert_eq!(body["components"]["storage"], "healthy");
}
