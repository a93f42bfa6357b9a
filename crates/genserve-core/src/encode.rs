//! Response encoding.
//!
//! Both response modes share one record schema, [`GenerateResponse`]:
//!
//! - streaming: one NDJSON line per snapshot, emitted as soon as it arrives
//! - aggregate: the full sequence is consumed and only the last snapshot is
//!   rendered
//!
//! Because snapshots are cumulative, the aggregate record is field-equal to
//! the last streaming line for the same request.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{RequestOutput, TokenLogprobs};
use crate::ports::BackendError;
use crate::session::GenerationSession;

/// How the result of a request is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Newline-delimited incremental records.
    Streaming,
    /// One record after the sequence is exhausted.
    Aggregate,
}

impl ResponseMode {
    #[must_use]
    pub const fn from_stream_flag(stream: bool) -> Self {
        if stream {
            Self::Streaming
        } else {
            Self::Aggregate
        }
    }
}

/// The wire record, one entry per candidate in every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: Vec<String>,
    pub output_token_ids: Vec<Vec<u32>>,
    pub logprobs: Vec<Option<Vec<TokenLogprobs>>>,
}

impl From<&RequestOutput> for GenerateResponse {
    fn from(output: &RequestOutput) -> Self {
        let candidates = &output.outputs;
        Self {
            text: candidates.iter().map(|c| c.text.clone()).collect(),
            output_token_ids: candidates.iter().map(|c| c.token_ids.clone()).collect(),
            logprobs: candidates.iter().map(|c| c.logprobs.clone()).collect(),
        }
    }
}

/// Errors that end a request after generation started.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend ended the sequence without emitting a snapshot.
    #[error("Backend produced no output")]
    NoOutput,

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Render one snapshot as an NDJSON line, trailing newline included.
pub fn encode_line(output: &RequestOutput) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(&GenerateResponse::from(output))?;
    line.push(b'\n');
    Ok(line)
}

/// Consume the session to exhaustion and render the last snapshot.
///
/// Dropping this future before it resolves drops the session, which aborts
/// the request.
pub async fn aggregate(mut session: GenerationSession) -> Result<GenerateResponse, GenerationError> {
    let request_id = session.request_id();
    let mut last = None;
    while let Some(output) = session.next().await {
        last = Some(output?);
    }

    let last = last.ok_or(GenerationError::NoOutput)?;
    info!(
        request_id = %request_id,
        snapshots = session.emitted(),
        tokens = last.generated_tokens(),
        outcome = "completed",
        "Aggregate request finished"
    );
    Ok(GenerateResponse::from(&last))
}

enum Step {
    Cancelled,
    Next(Option<Result<RequestOutput, BackendError>>),
}

struct LineState {
    session: GenerationSession,
    cancel: CancellationToken,
    lines: usize,
    done: bool,
}

/// Turn the session into a stream of NDJSON lines.
///
/// Each wait for the next snapshot races against `cancel`; on cancellation
/// the request is aborted and the stream ends without a trailing record.
/// Dropping the returned stream drops the session, which also aborts.
pub fn ndjson_lines(
    session: GenerationSession,
    cancel: CancellationToken,
) -> impl futures_core::Stream<Item = Result<Vec<u8>, GenerationError>> + Send + 'static {
    let state = LineState {
        session,
        cancel,
        lines: 0,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        let step = tokio::select! {
            biased;
            () = st.cancel.cancelled() => Step::Cancelled,
            next = st.session.next() => Step::Next(next),
        };

        let request_id = st.session.request_id();
        match step {
            Step::Cancelled => {
                st.session.abort();
                info!(request_id = %request_id, lines = st.lines, outcome = "cancelled", "Streaming request cancelled");
                None
            }
            Step::Next(Some(Ok(output))) => match encode_line(&output) {
                Ok(line) => {
                    st.lines += 1;
                    Some((Ok(line), st))
                }
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, outcome = "failed", "Failed to encode snapshot");
                    st.session.abort();
                    st.done = true;
                    Some((Err(e.into()), st))
                }
            },
            Step::Next(Some(Err(e))) => {
                warn!(request_id = %request_id, lines = st.lines, error = %e, outcome = "failed", "Streaming request failed");
                st.done = true;
                Some((Err(e.into()), st))
            }
            Step::Next(None) => {
                info!(request_id = %request_id, lines = st.lines, outcome = "completed", "Streaming request finished");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::domain::{CompletionOutput, Logprob, Prompt, RequestId};
    use crate::registry::InFlightRequests;
    use crate::sampling::SamplingParams;
    use crate::testing::ScriptedBackend;

    async fn open(backend: &Arc<ScriptedBackend>) -> GenerationSession {
        let backend: Arc<dyn crate::ports::GenerationBackend> = backend.clone();
        GenerationSession::open(
            backend,
            &InFlightRequests::new(),
            RequestId::random(),
            Prompt::Text("Hello".into()),
            SamplingParams::default(),
        )
        .await
        .unwrap()
    }

    async fn collect_lines(backend: &Arc<ScriptedBackend>) -> Vec<GenerateResponse> {
        let session = open(backend).await;
        ndjson_lines(session, CancellationToken::new())
            .map(|line| {
                let line = line.unwrap();
                assert_eq!(line.last(), Some(&b'\n'));
                serde_json::from_slice(&line).unwrap()
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn aggregate_keeps_only_the_last_snapshot() {
        let backend = Arc::new(ScriptedBackend::from_texts(&["Hi", "Hi there"]));
        let response = aggregate(open(&backend).await).await.unwrap();

        assert_eq!(response.text, vec!["Hi there"]);
        assert_eq!(response.output_token_ids, vec![vec![100, 101]]);
        assert_eq!(response.logprobs, vec![None]);
        assert!(backend.aborted().is_empty());
    }

    #[tokio::test]
    async fn streaming_emits_one_line_per_snapshot_in_order() {
        let backend = Arc::new(ScriptedBackend::from_texts(&["Hi", "Hi there", "Hi there!"]));
        let lines = collect_lines(&backend).await;

        let texts: Vec<_> = lines.iter().map(|l| l.text[0].as_str()).collect();
        assert_eq!(texts, vec!["Hi", "Hi there", "Hi there!"]);

        let lengths: Vec<_> = lines.iter().map(|l| l.output_token_ids[0].len()).collect();
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]), "lengths: {lengths:?}");
        assert!(backend.aborted().is_empty());
    }

    #[tokio::test]
    async fn aggregate_equals_last_streamed_line() {
        let script = vec![
            vec![
                CompletionOutput::new(0, "a", vec![1]),
                CompletionOutput::new(1, "b", vec![2]),
            ],
            vec![
                CompletionOutput::new(0, "a c", vec![1, 3]).with_logprobs(vec![
                    BTreeMap::from([(1, Logprob::new(-0.5).with_rank(1))]),
                    BTreeMap::from([(3, Logprob::new(-1.25).with_rank(2).with_decoded_token(" c"))]),
                ]),
                CompletionOutput::new(1, "b d", vec![2, 4]),
            ],
        ];
        let streaming = Arc::new(ScriptedBackend::with_snapshots(script.clone()));
        let aggregated = Arc::new(ScriptedBackend::with_snapshots(script));

        let lines = collect_lines(&streaming).await;
        let response = aggregate(open(&aggregated).await).await.unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines.last(), Some(&response));
    }

    #[tokio::test]
    async fn wire_record_uses_string_token_keys() {
        let output = RequestOutput::new(
            RequestId::random(),
            vec![CompletionOutput::new(0, "Hi", vec![7]).with_logprobs(vec![BTreeMap::from([(
                7,
                Logprob::new(-0.25).with_rank(1).with_decoded_token("Hi"),
            )])])],
            true,
        );
        let line = encode_line(&output).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "text": ["Hi"],
                "output_token_ids": [[7]],
                "logprobs": [[{"7": {"logprob": -0.25, "rank": 1, "decoded_token": "Hi"}}]]
            })
        );
    }

    #[tokio::test]
    async fn empty_sequence_is_an_error() {
        let backend = Arc::new(ScriptedBackend::with_snapshots(Vec::new()));
        let err = aggregate(open(&backend).await).await.unwrap_err();
        assert!(matches!(err, GenerationError::NoOutput));
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced_and_aborted_once() {
        let backend = Arc::new(
            ScriptedBackend::from_texts(&["Hi", "Hi there"])
                .fail_after(1, BackendError::Internal("engine died".into())),
        );
        let session = open(&backend).await;
        let request_id = session.request_id();

        let err = aggregate(session).await.unwrap_err();
        assert!(matches!(err, GenerationError::Backend(BackendError::Internal(_))));
        assert_eq!(backend.abort_count(request_id), 1);
    }

    #[tokio::test]
    async fn cancellation_ends_the_line_stream_and_aborts() {
        let backend = Arc::new(ScriptedBackend::from_texts(&["Hi"]).hold_open());
        let session = open(&backend).await;
        let request_id = session.request_id();
        let cancel = CancellationToken::new();

        let mut lines = Box::pin(ndjson_lines(session, cancel.clone()));
        assert!(lines.next().await.unwrap().is_ok());

        cancel.cancel();
        assert!(lines.next().await.is_none());
        drop(lines);

        assert_eq!(backend.abort_count(request_id), 1);
    }

    #[tokio::test]
    async fn dropping_the_line_stream_aborts() {
        let backend = Arc::new(ScriptedBackend::from_texts(&["Hi"]).hold_open());
        let session = open(&backend).await;
        let request_id = session.request_id();

        let mut lines = Box::pin(ndjson_lines(session, CancellationToken::new()));
        assert!(lines.next().await.unwrap().is_ok());
        drop(lines);

        assert_eq!(backend.aborted(), vec![request_id]);
    }

    #[test]
    fn mode_follows_stream_flag() {
        assert_eq!(ResponseMode::from_stream_flag(true), ResponseMode::Streaming);
        assert_eq!(ResponseMode::from_stream_flag(false), ResponseMode::Aggregate);
    }
}
