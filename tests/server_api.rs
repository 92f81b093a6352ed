#![cfg(feature = "server")]

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use meetprep::config::PipelineConfig;
use meetprep::server::{router, AppState};
use meetprep::{AppConfig, MeetingCrew, StubModel, ToolRegistry};
use serde_json::{json, Value};
use tower::ServiceExt;

fn respond(content: &str) -> String {
    json!({"action": "respond", "content": content}).to_string()
}

fn config_for(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.reports.dir = dir.to_path_buf();
    config
}

fn app_with(config: AppConfig, responses: Vec<String>) -> Router {
    let model = StubModel::new(responses);
    let crew = MeetingCrew::new(model, ToolRegistry::new(), &PipelineConfig::default());
    router(AppState::new(config, crew))
}

fn app(dir: &std::path::Path, responses: Vec<String>) -> Router {
    app_with(config_for(dir), responses)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn meeting(company: &str) -> Value {
    json!({
        "company_name": company,
        "meeting_objective": "Review the quarterly partnership results",
        "attendees": "Jane Doe - CEO",
        "meeting_duration": 30,
        "focus_areas": "renewal terms"
    })
}

#[tokio::test]
async fn health_and_agents() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Vec::new());

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, agents) = send(&app, get("/api/agents")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(agents.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn invalid_meeting_is_rejected_with_details() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Vec::new());
    let mut body = meeting("A");
    body["meeting_duration"] = json!(5);

    let (status, body) = send(&app, post_json("/api/meetings", body)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn accepted_meeting_completes_and_serves_report() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(
        dir.path(),
        ["one", "two", "three", "final brief"]
            .iter()
            .map(|s| respond(s))
            .collect(),
    );

    let (status, body) = send(&app, post_json("/api/meetings", meeting("Umbrella"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let mut job = Value::Null;
    for _ in 0..100 {
        let (_, body) = send(&app, get(&format!("/api/meetings/{job_id}"))).await;
        job = body;
        if job["state"] == "completed" || job["state"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(job["state"], "completed", "job ended as {job}");
    assert_eq!(job["company"], "Umbrella");

    let report = job["report"].as_str().unwrap();
    let (status, body) = send(&app, get(&format!("/api/reports/{report}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["content"].as_str().unwrap().ends_with("final brief"));

    let (_, listed) = send(&app, get("/api/reports")).await;
    assert_eq!(listed[0]["company"], "Umbrella");

    let (_, dashboard) = send(&app, get("/api/dashboard")).await;
    assert_eq!(dashboard["total_reports"], 1);
}

#[tokio::test]
async fn submissions_over_the_limit_get_429() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    config.security.rate_limit_requests = 2;
    let app = app_with(config, Vec::new());
    let invalid = meeting("A");

    for _ in 0..2 {
        let (status, _) = send(&app, post_json("/api/meetings", invalid.clone())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
    let (status, body) = send(&app, post_json("/api/meetings", meeting("Umbrella"))).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].as_str().unwrap().contains("local"));
}

#[tokio::test]
async fn events_stream_pipeline_progress() {
    use futures::StreamExt;

    let dir = tempfile::tempdir().unwrap();
    let app = app(
        dir.path(),
        ["one", "two", "three", "four"].iter().map(|s| respond(s)).collect(),
    );

    let response = app.clone().oneshot(get("/events")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let mut frames = response.into_body().into_data_stream();

    let (status, _) = send(&app, post_json("/api/meetings", meeting("Umbrella"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .expect("no event within 5s")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    let data = text
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .unwrap();
    let event: Value = serde_json::from_str(data.trim()).unwrap();
    assert_eq!(event["type"], "stage_started");
    assert_eq!(event["stage"], "context_analysis");
}

#[tokio::test]
async fn system_status_reports_health_and_model() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Vec::new());

    let (status, body) = send(&app, get("/api/system")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"]["reports_dir_ok"], true);
    assert!(body["info"]["version"].is_string());
    assert_eq!(body["model"]["model"], "gpt-4o-mini");
    assert_eq!(body["model"]["has_api_key"], false);
}

#[tokio::test]
async fn unknown_reports_and_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Vec::new());

    let (status, _) = send(&app, get("/api/reports/meeting_prep_None_01012024_000000.md")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/reports/..%2Fsecret.md")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        get("/api/meetings/00000000-0000-0000-0000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[cfg(feature = "mail")]
#[tokio::test]
async fn email_without_smtp_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), Vec::new());

    let (status, _) = send(
        &app,
        post_json(
            "/api/reports/meeting_prep_X_01012024_000000.md/email",
            json!({"to": "a@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[cfg(feature = "mail")]
#[tokio::test]
async fn email_route_sends_rendered_report() {
    use std::sync::{Arc, Mutex};

    use meetprep::{Mailer, Result};

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, String, String)>>);

    #[async_trait::async_trait]
    impl Mailer for Outbox {
        async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), html.to_string()));
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let name = "meeting_prep_Acme_01012024_090000.md";
    std::fs::write(dir.path().join(name), "# Brief\n<b>pricing</b>").unwrap();

    let config = config_for(dir.path());
    let crew = MeetingCrew::new(StubModel::new(Vec::new()), ToolRegistry::new(), &PipelineConfig::default());
    let outbox = Arc::new(Outbox::default());
    let app = router(AppState::new(config, crew).with_mailer(outbox.clone()));

    let (status, body) = send(
        &app,
        post_json(
            &format!("/api/reports/{name}/email"),
            json!({"to": "team@example.com", "subject": "Acme prep"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], true);
    let sent = outbox.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "team@example.com");
    assert_eq!(sent[0].1, "Acme prep");
    assert!(sent[0].2.contains("&lt;b&gt;pricing&lt;/b&gt;"));
}
