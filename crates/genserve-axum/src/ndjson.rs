//! NDJSON response bodies.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use genserve_core::{GenerationSession, ndjson_lines};
use tokio_util::sync::CancellationToken;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Stream the session as NDJSON lines.
///
/// The body owns the session, so a client that goes away mid-stream drops
/// it and the request is aborted. A generation failure after the headers
/// went out surfaces as a body I/O error.
pub fn stream_response(session: GenerationSession, cancel: CancellationToken) -> Response {
    let lines = ndjson_lines(session, cancel).map_err(std::io::Error::other);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .body(Body::from_stream(lines))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
