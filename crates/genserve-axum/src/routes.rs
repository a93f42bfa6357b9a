//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the API routes without state applied.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/generate", post(handlers::generate::generate))
}

/// Create the main router.
///
/// With a `root_path` (e.g. `/v1/engine`), the routes are served both at the
/// top level and under that prefix.
pub fn create_router(state: AppState, root_path: Option<&str>) -> Router {
    let mut router = api_routes();
    if let Some(prefix) = root_path.and_then(normalize_root_path) {
        router = router.nest(&prefix, api_routes());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// `"api/"` -> `Some("/api")`; empty and `"/"` mean no prefix.
fn normalize_root_path(root_path: &str) -> Option<String> {
    let trimmed = root_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}
