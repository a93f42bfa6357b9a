//! Generation backend port.
//!
//! This port defines the narrow contract the request lifecycle needs from a
//! generation engine: submit a request and receive a lazy stream of
//! cumulative snapshots, and abort a request by id.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use thiserror::Error;

use crate::domain::{Prompt, RequestId, RequestOutput};
use crate::sampling::SamplingParams;

/// Lazy, finite sequence of snapshots for one request, in generation order.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<RequestOutput, BackendError>> + Send>>;

/// Errors reported by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend is not initialized or not reachable yet.
    /// Callers should return 503 Service Unavailable.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request (unsupported option, prompt too long).
    #[error("Request rejected by backend: {0}")]
    Rejected(String),

    /// Transport failure talking to a remote backend.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// The backend sent data this adapter could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error during generation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Returns a suggested HTTP status code for this error.
    #[must_use]
    pub const fn suggested_status_code(&self) -> u16 {
        match self {
            Self::Unavailable(_) => 503,
            Self::Rejected(_) => 400,
            Self::Upstream(_) => 502,
            Self::Protocol(_) | Self::Internal(_) => 500,
        }
    }
}

/// Port for a shared, concurrently used generation engine.
///
/// Implementations own all scheduling state keyed by [`RequestId`]. The
/// request lifecycle only ever touches that state through these two methods.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync + fmt::Debug {
    /// Submit a request and return its output stream.
    ///
    /// Each item is the full cumulative state of every candidate. The stream
    /// ends after the snapshot marked `finished`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the request cannot be submitted.
    async fn generate(
        &self,
        request_id: RequestId,
        prompt: Prompt,
        params: SamplingParams,
    ) -> Result<OutputStream, BackendError>;

    /// Signal that `request_id` should stop and its resources be reclaimed.
    ///
    /// Must not block, must be idempotent, and must be safe to call for
    /// requests that already completed or were never submitted.
    fn abort(&self, request_id: RequestId);
}
