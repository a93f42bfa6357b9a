//! `GenerationBackend` implementation backed by an external llama-server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use genserve_core::{
    BackendError, GenerationBackend, OutputStream, Prompt, RequestId, RequestOutput, SamplingParams,
};

use crate::config::LlamaServerConfig;
use crate::health::wait_for_ready;
use crate::sse::data_events;
use crate::wire::{Accumulator, CompletionChunk, CompletionRequest, error_message};

/// Request id -> (registration serial, cancellation token).
type ActiveRequests = Arc<Mutex<HashMap<RequestId, (u64, CancellationToken)>>>;

/// Drives generation through llama-server's streaming `/completion` endpoint.
///
/// Each in-flight request holds a cancellation token; `abort` cancels it,
/// which ends the output stream and drops the upstream connection.
#[derive(Debug, Clone)]
pub struct LlamaServerBackend {
    client: Client,
    config: LlamaServerConfig,
    active: ActiveRequests,
    serial: Arc<AtomicU64>,
}

impl LlamaServerBackend {
    /// Build a backend without probing the upstream.
    #[must_use]
    pub fn new(client: Client, config: LlamaServerConfig) -> Self {
        Self {
            client,
            config,
            active: Arc::default(),
            serial: Arc::default(),
        }
    }

    /// Build a backend and wait until the upstream reports ready.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Unavailable` if the upstream never becomes
    /// ready, or `BackendError::Internal` if the HTTP client cannot be built.
    pub async fn connect(config: LlamaServerConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Internal(format!("Failed to build HTTP client: {e}")))?;
        wait_for_ready(&client, &config).await?;
        info!(upstream = %config.base_url, "Connected to llama-server");
        Ok(Self::new(client, config))
    }

    pub fn config(&self) -> &LlamaServerConfig {
        &self.config
    }

    /// Number of requests with a live upstream stream.
    pub fn active_requests(&self) -> usize {
        lock(&self.active).len()
    }

    fn track(&self, request_id: RequestId) -> ActiveRequest {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        lock(&self.active).insert(request_id, (serial, token.clone()));
        ActiveRequest {
            request_id,
            serial,
            token,
            active: Arc::clone(&self.active),
        }
    }
}

/// Registration of one request in the active map. Removed on drop.
struct ActiveRequest {
    request_id: RequestId,
    serial: u64,
    token: CancellationToken,
    active: ActiveRequests,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        // A later request may have reused the id after an abort removed ours.
        if active
            .get(&self.request_id)
            .is_some_and(|(serial, _)| *serial == self.serial)
        {
            active.remove(&self.request_id);
        }
    }
}

#[async_trait]
impl GenerationBackend for LlamaServerBackend {
    async fn generate(
        &self,
        request_id: RequestId,
        prompt: Prompt,
        params: SamplingParams,
    ) -> Result<OutputStream, BackendError> {
        let body = CompletionRequest::build(&prompt, &params)?;
        let tracked = self.track(request_id);

        debug!(request_id = %request_id, url = %self.config.completion_url(), "Posting completion");
        let response = self
            .client
            .post(self.config.completion_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Upstream(format!("Failed to reach llama-server: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(request_id = %request_id, %status, "llama-server refused completion");
            let message = format!("llama-server returned {status}: {detail}");
            return Err(if status.is_client_error() {
                BackendError::Rejected(message)
            } else {
                BackendError::Upstream(message)
            });
        }

        let events = Box::pin(data_events(response.bytes_stream()));
        Ok(snapshots(events, Accumulator::new(request_id, params.logprobs), tracked).boxed())
    }

    fn abort(&self, request_id: RequestId) {
        if let Some((_, token)) = lock(&self.active).remove(&request_id) {
            debug!(request_id = %request_id, "Cancelling upstream completion");
            token.cancel();
        }
    }
}

struct SnapshotState<S> {
    events: S,
    acc: Accumulator,
    tracked: ActiveRequest,
    done: bool,
}

/// Fold upstream deltas into cumulative snapshots until the final chunk,
/// an error, or cancellation of the request's token.
fn snapshots<S>(
    events: S,
    acc: Accumulator,
    tracked: ActiveRequest,
) -> impl Stream<Item = Result<RequestOutput, BackendError>> + Send + 'static
where
    S: Stream<Item = Result<String, BackendError>> + Send + Unpin + 'static,
{
    let state = SnapshotState {
        events,
        acc,
        tracked,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        let event = tokio::select! {
            biased;
            () = st.tracked.token.cancelled() => return None,
            event = st.events.next() => event,
        };

        let item = match event {
            Some(Ok(data)) => match serde_json::from_str::<CompletionChunk>(&data) {
                Ok(mut chunk) => match chunk.error.take() {
                    Some(error) => Err(BackendError::Upstream(error_message(&error))),
                    None => Ok(st.acc.apply(chunk)),
                },
                Err(e) => Err(BackendError::Protocol(format!("Malformed completion chunk: {e}"))),
            },
            Some(Err(e)) => Err(e),
            None => Err(BackendError::Protocol(
                "llama-server closed the stream before the final chunk".into(),
            )),
        };

        st.done = match &item {
            Ok(output) => output.finished,
            Err(_) => true,
        };
        Some((item, st))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
