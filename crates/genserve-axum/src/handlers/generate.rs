//! `POST /generate`.
//!
//! Decodes the body, opens a generation session and answers in the mode the
//! client asked for. Each request gets a child of the server shutdown token
//! as its cancellation signal.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use genserve_core::{
    GenerationBackend, GenerationRequest, GenerationSession, Outcome, RequestId, ResponseMode,
    aggregate, decode_request, with_cancellation,
};

use crate::error::{HttpError, client_closed_request};
use crate::ndjson::stream_response;
use crate::state::AppState;

pub async fn generate(State(state): State<AppState>, body: Bytes) -> Result<Response, HttpError> {
    let request = decode_request(&body).map_err(|e| {
        info!(error = %e, kind = e.kind(), outcome = "failed", "Rejected malformed generation request");
        HttpError::from(e)
    })?;

    let Some(backend) = state.backend.get() else {
        warn!(request_id = %request.request_id, outcome = "failed", "Generation requested before backend is ready");
        return Err(HttpError::backend_not_ready());
    };

    info!(
        request_id = %request.request_id,
        stream = request.stream,
        prompt_kind = request.prompt.kind(),
        prompt_len = request.prompt.len(),
        "Generation request received"
    );

    let cancel = state.shutdown.child_token();
    match ResponseMode::from_stream_flag(request.stream) {
        ResponseMode::Streaming => generate_streaming(&state, backend, request, cancel).await,
        ResponseMode::Aggregate => generate_aggregate(&state, backend, request, cancel).await,
    }
}

async fn generate_streaming(
    state: &AppState,
    backend: Arc<dyn GenerationBackend>,
    request: GenerationRequest,
    cancel: CancellationToken,
) -> Result<Response, HttpError> {
    let GenerationRequest {
        prompt,
        sampling_params,
        request_id,
        ..
    } = request;

    let mut submitted = false;
    let opened = with_cancellation(&cancel, async {
        submitted = true;
        GenerationSession::open(backend, &state.in_flight, request_id, prompt, sampling_params)
            .await
    })
    .await;

    match opened {
        Outcome::Completed(Ok(session)) => Ok(stream_response(session, cancel)),
        Outcome::Completed(Err(e)) => {
            warn!(request_id = %request_id, error = %e, outcome = "failed", "Failed to start generation");
            Err(e.into())
        }
        Outcome::Cancelled => {
            log_cancelled(request_id, submitted);
            Ok(client_closed_request().into_response())
        }
    }
}

/// A request abandoned after submission is logged by its session; only one
/// cancelled before it reached the backend is logged here.
fn log_cancelled(request_id: RequestId, submitted: bool) {
    if submitted {
        debug!(request_id = %request_id, "Generation cancelled");
    } else {
        info!(request_id = %request_id, outcome = "cancelled", "Generation cancelled before submission");
    }
}

/// Run the aggregate consumption in its own task.
///
/// The handler holds a drop guard on the request's token: if the connection
/// goes away and the handler future is dropped, the token fires and the task
/// aborts the request.
async fn generate_aggregate(
    state: &AppState,
    backend: Arc<dyn GenerationBackend>,
    request: GenerationRequest,
    cancel: CancellationToken,
) -> Result<Response, HttpError> {
    let GenerationRequest {
        prompt,
        sampling_params,
        request_id,
        ..
    } = request;

    let guard = cancel.clone().drop_guard();
    let in_flight = state.in_flight.clone();
    let task = tokio::spawn(async move {
        let mut submitted = false;
        let outcome = with_cancellation(&cancel, async {
            submitted = true;
            let session =
                GenerationSession::open(backend, &in_flight, request_id, prompt, sampling_params)
                    .await?;
            aggregate(session).await.map_err(HttpError::from)
        })
        .await;

        // Logged here so a client that went away still gets its terminal state.
        match &outcome {
            Outcome::Completed(Ok(_)) => {}
            Outcome::Completed(Err(e)) => {
                warn!(request_id = %request_id, error = %e, outcome = "failed", "Aggregate generation failed");
            }
            Outcome::Cancelled => log_cancelled(request_id, submitted),
        }
        outcome
    });

    let outcome = task
        .await
        .map_err(|e| HttpError::Internal(format!("Generation task failed: {e}")))?;
    guard.disarm();

    match outcome {
        Outcome::Completed(Ok(response)) => Ok(Json(response).into_response()),
        Outcome::Completed(Err(e)) => Err(e),
        Outcome::Cancelled => Ok(client_closed_request().into_response()),
    }
}
