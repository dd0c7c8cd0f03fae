use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use ringside::config::Config;
use ringside::engine::{Collaborators, Engine};
use ringside::notify::NotifyHub;
use ringside::routes::create_router;
use ringside::AppState;

pub const ADMIN_TOKEN: &str = "test_admin_token";

/// Fresh WAL file per test under the OS temp dir.
pub fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("ringside_test_http");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Create a test app with an empty engine and no external collaborators.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app(name: &str) -> (axum::Router, Arc<AppState>) {
    let config = Config::default();
    let engine = Engine::new(
        test_wal_path(name),
        Arc::new(NotifyHub::new()),
        Collaborators::default(),
        config.engine_settings(),
    )
    .expect("engine should open");

    let state = Arc::new(AppState {
        config,
        engine: Arc::new(engine),
    });
    (create_router(state.clone()), state)
}

#[allow(dead_code)]
pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[allow(dead_code)]
pub fn admin_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
