use axum::body::Body;
use axum::http::{Request, Response};
use openchat::config::Config;
use openchat::server::{router, AppState};
use openchat::storage::SqliteStorage;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("openchat.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// Configuration pointing the proxy at a mock Venice API
#[allow(dead_code)]
pub fn config_for(upstream: &MockServer) -> Config {
    let mut config = Config::default();
    config.upstream.base_url = format!("{}/api/v1", upstream.uri());
    config.upstream.api_key = Some("test-key".to_string());
    config
}

/// Build an `AppState` for the given configuration
#[allow(dead_code)]
pub fn state_for(config: Config) -> AppState {
    AppState::new(config).expect("failed to build app state")
}

/// Send one request through a fresh router over `state`
#[allow(dead_code)]
pub async fn send(state: &AppState, request: Request<Body>) -> Response<Body> {
    router(state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible")
}

/// A POST with a JSON body and the Terms of Service header
#[allow(dead_code)]
pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .header("x-tos-accepted", "true")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

/// Read a response body as JSON
#[allow(dead_code)]
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Server-sent-events body from raw `data:` payloads
#[allow(dead_code)]
pub fn sse(events: &[&str]) -> String {
    events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect()
}
