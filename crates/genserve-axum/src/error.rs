//! Axum-specific error types and mappings.
//!
//! Maps decoder, session and backend errors onto HTTP status codes and a JSON
//! error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use genserve_core::{BackendError, DecodeError, GenerationError, SessionError};
use serde::Serialize;
use thiserror::Error;

/// Non-standard status for a request the client abandoned (nginx convention).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Status for a cancelled generation; the response carries no body.
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
}

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Bad request (invalid input), with a stable discriminant.
    #[error("Bad request: {message}")]
    BadRequest { message: String, kind: &'static str },

    /// The backend could not be reached.
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// No backend installed yet.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    /// Stable error type discriminant for client-side handling
    #[serde(rename = "type")]
    error_type: &'static str,
}

impl HttpError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest { kind, .. } => *kind,
            Self::BadGateway(_) => "upstream_error",
            Self::ServiceUnavailable(_) => "backend_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn backend_not_ready() -> Self {
        Self::ServiceUnavailable("Generation backend is not ready".to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = self.kind();
        let message = match self {
            Self::BadRequest { message, .. } => message,
            Self::BadGateway(msg) | Self::ServiceUnavailable(msg) | Self::Internal(msg) => msg,
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
            error_type,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<DecodeError> for HttpError {
    fn from(err: DecodeError) -> Self {
        Self::BadRequest {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<BackendError> for HttpError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => Self::ServiceUnavailable(msg),
            BackendError::Rejected(msg) => Self::BadRequest {
                message: msg,
                kind: "backend_rejected",
            },
            BackendError::Upstream(msg) => Self::BadGateway(msg),
            BackendError::Protocol(msg) => Self::Internal(format!("Protocol: {msg}")),
            BackendError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<SessionError> for HttpError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Backend(e) => e.into(),
            // Ids are server-generated, so a clash is our fault.
            SessionError::DuplicateRequestId(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<GenerationError> for HttpError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Backend(e) => e.into(),
            GenerationError::NoOutput | GenerationError::Encode(_) => Self::Internal(err.to_string()),
        }
    }
}
