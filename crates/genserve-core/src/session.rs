//! Generation sessions.
//!
//! A [`GenerationSession`] drives one request through the backend and exposes
//! its output as a [`Stream`] of cumulative snapshots. It is a typed
//! pass-through: items arrive in backend emission order and are never
//! buffered or rewritten.
//!
//! The session owns the abort obligation for its request id. Whatever path
//! ends it early (consumer drops it, the backend yields an error, the open
//! itself is abandoned), the backend receives exactly one `abort`. A session
//! that ran to exhaustion issues none.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Prompt, RequestId, RequestOutput};
use crate::ports::{BackendError, GenerationBackend, OutputStream};
use crate::registry::{InFlightLease, InFlightRequests};
use crate::sampling::SamplingParams;

/// Errors raised while opening a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Another live session already owns this request id.
    #[error("Request id {0} is already in flight")]
    DuplicateRequestId(RequestId),

    /// The backend refused or failed to start the request.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Issues `abort` for a request when dropped while armed.
struct AbortOnDrop {
    backend: Arc<dyn GenerationBackend>,
    request_id: RequestId,
    armed: bool,
}

impl AbortOnDrop {
    fn new(backend: Arc<dyn GenerationBackend>, request_id: RequestId) -> Self {
        Self {
            backend,
            request_id,
            armed: true,
        }
    }

    /// Abort now, at most once.
    fn fire(&mut self) {
        if std::mem::take(&mut self.armed) {
            debug!(request_id = %self.request_id, "Aborting request");
            self.backend.abort(self.request_id);
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            // Only a consumer going away drops an armed guard.
            info!(request_id = %self.request_id, outcome = "cancelled", "Request cancelled before completion");
            self.fire();
        }
    }
}

/// One request's lazy sequence of [`RequestOutput`] snapshots.
///
/// Field order matters: the abort guard drops before the output stream and
/// before the in-flight lease releases the id.
pub struct GenerationSession {
    abort: AbortOnDrop,
    outputs: OutputStream,
    emitted: usize,
    _lease: InFlightLease,
}

impl std::fmt::Debug for GenerationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSession")
            .field("request_id", &self.abort.request_id)
            .field("active", &self.abort.armed)
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

impl GenerationSession {
    /// Register `request_id` and submit the request to the backend.
    ///
    /// If this future is dropped while `generate` is pending, or `generate`
    /// fails, the backend is told to abort the id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::DuplicateRequestId` without calling the backend
    /// if the id is already in flight, or `SessionError::Backend` if the
    /// backend fails to start the request.
    pub async fn open(
        backend: Arc<dyn GenerationBackend>,
        registry: &InFlightRequests,
        request_id: RequestId,
        prompt: Prompt,
        params: SamplingParams,
    ) -> Result<Self, SessionError> {
        let lease = registry
            .register(request_id)
            .ok_or(SessionError::DuplicateRequestId(request_id))?;

        debug!(
            request_id = %request_id,
            prompt_kind = prompt.kind(),
            prompt_len = prompt.len(),
            "Submitting request to backend"
        );

        let mut abort = AbortOnDrop::new(Arc::clone(&backend), request_id);
        let outputs = match backend.generate(request_id, prompt, params).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Backend failed to start request");
                abort.fire();
                return Err(e.into());
            }
        };

        Ok(Self {
            abort,
            outputs,
            emitted: 0,
            _lease: lease,
        })
    }

    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.abort.request_id
    }

    /// False once the sequence is exhausted, failed, or aborted.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.abort.armed
    }

    /// Number of snapshots handed to the consumer so far.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }

    /// Abort the request now. Idempotent; a no-op after exhaustion.
    ///
    /// The session yields no further items afterwards.
    pub fn abort(&mut self) {
        self.abort.fire();
    }
}

impl Stream for GenerationSession {
    type Item = Result<RequestOutput, BackendError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.abort.armed {
            return Poll::Ready(None);
        }

        match this.outputs.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(output))) => {
                this.emitted += 1;
                Poll::Ready(Some(Ok(output)))
            }
            Poll::Ready(Some(Err(e))) => {
                // Resources may still be held for this id.
                warn!(request_id = %this.abort.request_id, error = %e, "Backend failed mid-generation");
                this.abort.fire();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                debug!(
                    request_id = %this.abort.request_id,
                    emitted = this.emitted,
                    "Backend output exhausted"
                );
                this.abort.disarm();
                Poll::Ready(None)
            }
        }
    }
}
