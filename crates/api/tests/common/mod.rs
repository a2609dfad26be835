#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use valuo_api::config::ServerConfig;
use valuo_api::router::build_app_router;
use valuo_api::state::AppState;
use valuo_core::types::RunId;
use valuo_pipeline::PipelineRunner;
use valuo_storage::RunStore;
use valuo_worker::{Orchestrator, Run};

/// A company name the seed resolver cannot match.
pub const UNRESOLVABLE: &str = "Zzzzzzzzzzzzzzzzzzzzzzzzz";

/// Build a test `ServerConfig` storing runs under `root`.
///
/// Fast retries (one retry, 10 ms base) and no auth or rate limit.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        artifacts_root: root.to_path_buf(),
        worker_count: 2,
        queue_capacity: 16,
        queue_submit_timeout_secs: 1,
        max_retries: 1,
        retry_backoff_base_secs: 0.01,
        api_key: None,
        rate_limit_n: 0,
        rate_limit_window_secs: 60.0,
        event_stream_secs: 10,
        code_sha: "test".to_string(),
    }
}

/// A running app plus the state behind it.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    /// Keeps the storage root alive for the test.
    pub root: TempDir,
}

/// Build the production router over a fresh temporary storage root.
pub fn build_test_app() -> TestApp {
    build_test_app_with(|_| {})
}

/// Like [`build_test_app`], letting the caller adjust the config first.
pub fn build_test_app_with(tweak: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    tweak(&mut config);
    let (app, state) = app_over(config);
    TestApp { app, state, root }
}

/// Start an orchestrator for `config` and wrap it in the production router.
pub fn app_over(config: ServerConfig) -> (Router, AppState) {
    let store = RunStore::new(config.artifacts_root.clone());
    let runner = PipelineRunner::new().with_code_sha(config.code_sha.clone());
    let orchestrator = Orchestrator::start(config.orchestrator_config(), runner, store);
    let state = AppState::new(config.clone(), orchestrator);
    (build_app_router(state.clone(), &config), state)
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub fn post_json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, post_json_request(uri, body)).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Create a run through the API and return its id.
pub async fn create_run(app: &Router, company: &str) -> String {
    let response = post_json(
        app,
        "/api/v1/runs",
        serde_json::json!({ "company_name": company }),
    )
    .await;
    assert_eq!(response.status(), 201);
    body_json(response).await["data"]["run_id"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Poll the registry until the run is terminal.
pub async fn wait_terminal(state: &AppState, id: &str) -> Run {
    let id = RunId::from(id);
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(run) = state.orchestrator.get(&id).await {
                if run.status.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run should reach a terminal status")
}

/// Poll until the persisted snapshot of a run reports a terminal status.
pub async fn wait_persisted(state: &AppState, id: &str) {
    let id = RunId::from(id);
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(record) = state.orchestrator.store().load(&id).await {
                if record.status.is_terminal() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("terminal snapshot should be persisted")
}
