//! API integration tests.
//!
//! The router is driven with `oneshot` against a scheduler whose tool is
//! `/bin/sh` running a small script in place of ffmpeg.

use std::path::Path;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use mediaq_api::{create_router, AppState, ServiceConfig};

/// Writes `data` to the output path (the last argument).
const WRITE_OUTPUT: &str = r#"for a; do :; done; printf 'data' > "$a""#;

struct TestApp {
    router: Router,
    _dir: TempDir,
}

async fn test_app(script: &str, configure: impl FnOnce(&mut ServiceConfig)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = ServiceConfig {
        max_concurrent_jobs: 1,
        job_timeout: Duration::from_secs(10),
        tool_path: "/bin/sh".into(),
        tool_args: vec!["-c".to_string(), script.to_string(), "ffmpeg".to_string()],
        artifact_dir: dir.path().join("artifacts"),
        work_dir: dir.path().join("artifacts/.work"),
        kill_grace: Duration::from_millis(500),
        ..Default::default()
    };
    configure(&mut config);
    config.prepare_dirs().await.unwrap();

    TestApp {
        router: create_router(AppState::new(config), None),
        _dir: dir,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn submit(app: &TestApp, body: Value) -> String {
    let (status, json) = send_json(app, post_json("/jobs", &body.to_string())).await;
    assert_eq!(status, StatusCode::CREATED, "{}", json);
    json["job_id"].as_str().unwrap().to_string()
}

async fn wait_for_state(app: &TestApp, job_id: &str, done: &[&str]) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let (status, json) = send_json(app, get(&format!("/jobs/{}", job_id))).await;
        assert_eq!(status, StatusCode::OK);
        if done.contains(&json["state"].as_str().unwrap_or_default()) {
            return json;
        }
        assert!(tokio::time::Instant::now() < deadline, "stuck: {}", json);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

const TERMINAL: &[&str] = &["succeeded", "failed", "cancelled"];

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app("exit 0", |_| {}).await;
    let (status, json) = send_json(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = test_app("exit 0", |_| {}).await;
    let (status, json) = send_json(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["checks"]["tool"]["status"], "ok");
    assert_eq!(json["jobs"]["max_concurrent"], 1);
}

#[tokio::test]
async fn test_ready_reports_missing_tool() {
    let app = test_app("exit 0", |c| c.tool_path = "/nonexistent/ffmpeg".into()).await;
    let (status, json) = send_json(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["checks"]["tool"]["status"], "error");
}

#[tokio::test]
async fn test_metrics_route_absent_when_disabled() {
    let app = test_app("exit 0", |_| {}).await;
    let (status, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let app = test_app("exit 0", |_| {}).await;

    for request in [
        get("/jobs/does-not-exist"),
        get("/jobs/does-not-exist/result"),
        delete("/jobs/does-not-exist"),
        delete("/jobs/does-not-exist/result"),
    ] {
        let (status, json) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "not_found");
        assert!(json["detail"].is_string());
    }
}

#[tokio::test]
async fn test_malformed_requests_return_400() {
    let app = test_app("exit 0", |c| c.allowed_input_extensions = vec!["mp4".into()]).await;

    let bodies = [
        "{not json",
        r#"{"params": {}}"#,
        r#"{"input": ""}"#,
        r#"{"input": "/in/a.mp4", "params": {"crf": 99}}"#,
        r#"{"input": "/in/a.mp4", "params": {"unknown": 1}}"#,
        r#"{"input": "/in/a.avi"}"#,
        r#"{"input": "-f"}"#,
        r#"{"input": "concat:/etc/passwd|/in/a.mp4"}"#,
        r#"{"input": "relative/a.mp4"}"#,
    ];

    for body in bodies {
        let (status, json) = send_json(&app, post_json("/jobs", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}: {}", body, json);
        assert_eq!(json["code"], "validation_error");
    }
}

#[tokio::test]
async fn test_submit_run_and_download() {
    let app = test_app(WRITE_OUTPUT, |_| {}).await;

    let (status, json) = send_json(
        &app,
        post_json(
            "/jobs",
            &json!({"input": "/in/clip.mov", "params": {"output_format": "webm"}}).to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(["queued", "running"].contains(&json["state"].as_str().unwrap()));
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let job = wait_for_state(&app, &job_id, TERMINAL).await;
    assert_eq!(job["state"], "succeeded", "{}", job);
    assert_eq!(job["input"], "/in/clip.mov");
    assert!(job["output_ref"].as_str().unwrap().ends_with(".webm"));
    assert!(job["completed_at"].is_string());

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/jobs/{}/result", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/webm");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "4");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(&format!("{}.webm", job_id)));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"data");

    let (status, listing) = send_json(&app, get("/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["jobs"][0]["job_id"], job_id.as_str());
}

#[tokio::test]
async fn test_result_of_unfinished_job_is_conflict() {
    let app = test_app("sleep 30", |_| {}).await;
    let job_id = submit(&app, json!({"input": "/in/a.mp4"})).await;

    let (status, json) = send_json(&app, get(&format!("/jobs/{}/result", job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "conflict");

    let (status, _) = send_json(&app, delete(&format!("/jobs/{}/result", job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    send_json(&app, delete(&format!("/jobs/{}", job_id))).await;
    wait_for_state(&app, &job_id, TERMINAL).await;
}

#[tokio::test]
async fn test_result_of_failed_job_is_conflict() {
    let app = test_app("exit 2", |_| {}).await;
    let job_id = submit(&app, json!({"input": "/in/a.mp4"})).await;

    let job = wait_for_state(&app, &job_id, TERMINAL).await;
    assert_eq!(job["state"], "failed");
    assert_eq!(job["error"]["kind"], "non_zero_exit_error");
    assert_eq!(job["exit_code"], 2);

    let (status, _) = send_json(&app, get(&format!("/jobs/{}/result", job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_queued_and_running_jobs() {
    let app = test_app("sleep 30", |_| {}).await;
    let running = submit(&app, json!({"input": "/in/a.mp4"})).await;
    let queued = submit(&app, json!({"input": "/in/b.mp4"})).await;

    let (status, json) = send_json(&app, delete(&format!("/jobs/{}", queued))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cancelled"], true);
    assert_eq!(json["state"], "cancelled");

    wait_for_state(&app, &running, &["running"]).await;
    let (status, json) = send_json(&app, delete(&format!("/jobs/{}", running))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cancelled"], true);

    let job = wait_for_state(&app, &running, TERMINAL).await;
    assert_eq!(job["state"], "cancelled");
    assert_eq!(job["error"]["kind"], "cancelled");

    // Terminal jobs are left alone
    let (status, json) = send_json(&app, delete(&format!("/jobs/{}", running))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cancelled"], false);
    assert_eq!(json["state"], "cancelled");
}

#[tokio::test]
async fn test_queue_ceiling_returns_503() {
    let app = test_app("sleep 30", |c| c.max_queued_jobs = 1).await;
    let running = submit(&app, json!({"input": "/in/a.mp4"})).await;
    let queued = submit(&app, json!({"input": "/in/b.mp4"})).await;

    let (status, json) = send_json(&app, post_json("/jobs", r#"{"input": "/in/c.mp4"}"#)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "service_unavailable");

    for id in [&queued, &running] {
        send_json(&app, delete(&format!("/jobs/{}", id))).await;
    }
    wait_for_state(&app, &running, TERMINAL).await;
}

#[tokio::test]
async fn test_delete_result_removes_artifact() {
    let app = test_app(WRITE_OUTPUT, |_| {}).await;
    let job_id = submit(&app, json!({"input": "/in/a.mp4"})).await;

    let job = wait_for_state(&app, &job_id, TERMINAL).await;
    let artifact = job["output_ref"].as_str().unwrap().to_string();
    assert!(Path::new(&artifact).exists());

    let (status, _) = send(&app, delete(&format!("/jobs/{}/result", job_id))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!Path::new(&artifact).exists());

    let (status, _) = send(&app, get(&format!("/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_tool_fails_job_not_service() {
    let app = test_app("exit 0", |c| c.tool_path = "/nonexistent/ffmpeg".into()).await;
    let job_id = submit(&app, json!({"input": "/in/a.mp4"})).await;

    let job = wait_for_state(&app, &job_id, TERMINAL).await;
    assert_eq!(job["state"], "failed");
    assert_eq!(job["error"]["kind"], "execution_error");

    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_and_security_headers() {
    let app = test_app("exit 0", |_| {}).await;

    let request = Request::builder()
        .uri("/health")
        .header("X-Request-ID", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert!(!response.headers()["x-request-id"].is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = test_app("exit 0", |c| c.max_body_size = 64).await;
    let body = json!({"input": format!("/in/{}.mp4", "a".repeat(200))}).to_string();

    let (status, _) = send(&app, post_json("/jobs", &body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
