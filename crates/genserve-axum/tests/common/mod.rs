//! Shared helpers for genserve-axum integration tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use genserve_axum::{ApiContext, AppState, create_router};
use genserve_core::testing::ScriptedBackend;

/// Router with `backend` installed, plus the state and shutdown token behind it.
pub fn app_with(backend: &Arc<ScriptedBackend>) -> (Router, AppState, CancellationToken) {
    let shutdown = CancellationToken::new();
    let state = Arc::new(ApiContext::with_backend(backend.clone(), shutdown.clone()));
    (create_router(state.clone(), None), state, shutdown)
}

/// Router with an empty backend slot.
pub fn app_without_backend() -> (Router, AppState) {
    let state = Arc::new(ApiContext::new(CancellationToken::new()));
    (create_router(state.clone(), None), state)
}

pub fn post_generate(body: &Value) -> Request<Body> {
    post_generate_raw(body.to_string())
}

pub fn post_generate_raw(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn content_type(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Parse an NDJSON body into one value per line.
pub async fn body_lines(response: Response<Body>) -> Vec<Value> {
    let bytes = body_bytes(response).await;
    let text = std::str::from_utf8(&bytes).unwrap();
    assert!(text.is_empty() || text.ends_with('\n'), "body not newline-terminated: {text:?}");
    text.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
}
