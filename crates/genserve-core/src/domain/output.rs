//! Output snapshots produced by a generation backend.
//!
//! Every snapshot is cumulative: `text` and `token_ids` hold everything
//! generated so far for a candidate, not just the newest increment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::RequestId;

/// Log-probability information for one candidate token at one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logprob {
    pub logprob: f64,
    /// 1-based rank of this token among the vocabulary at this position.
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub decoded_token: Option<String>,
}

impl Logprob {
    #[must_use]
    pub const fn new(logprob: f64) -> Self {
        Self {
            logprob,
            rank: None,
            decoded_token: None,
        }
    }

    #[must_use]
    pub const fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    #[must_use]
    pub fn with_decoded_token(mut self, token: impl Into<String>) -> Self {
        self.decoded_token = Some(token.into());
        self
    }
}

/// Candidate token id -> log-probability, for one generated position.
pub type TokenLogprobs = BTreeMap<u32, Logprob>;

/// Why a candidate stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Hit an end-of-sequence token or a stop string.
    Stop,
    /// Hit `max_tokens`.
    Length,
    /// Aborted by request.
    Abort,
}

/// Cumulative state of one candidate (beam) of a request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionOutput {
    /// Position of this candidate within the request.
    pub index: usize,
    pub text: String,
    pub token_ids: Vec<u32>,
    #[serde(default)]
    pub cumulative_logprob: Option<f64>,
    /// Aligned index-for-index with `token_ids` when logprobs were requested.
    #[serde(default)]
    pub logprobs: Option<Vec<TokenLogprobs>>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl CompletionOutput {
    /// Create a candidate snapshot with text and token ids only.
    #[must_use]
    pub fn new(index: usize, text: impl Into<String>, token_ids: Vec<u32>) -> Self {
        Self {
            index,
            text: text.into(),
            token_ids,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_logprobs(mut self, logprobs: Vec<TokenLogprobs>) -> Self {
        self.logprobs = Some(logprobs);
        self
    }

    #[must_use]
    pub const fn with_finish_reason(mut self, reason: FinishReason) -> Self {
        self.finish_reason = Some(reason);
        self
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// The state of every candidate of a request at one point in generation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutput {
    pub request_id: RequestId,
    pub outputs: Vec<CompletionOutput>,
    /// True on the last snapshot the backend will emit for this request.
    pub finished: bool,
}

impl RequestOutput {
    #[must_use]
    pub const fn new(request_id: RequestId, outputs: Vec<CompletionOutput>, finished: bool) -> Self {
        Self {
            request_id,
            outputs,
            finished,
        }
    }

    /// Total number of generated tokens across all candidates.
    #[must_use]
    pub fn generated_tokens(&self) -> usize {
        self.outputs.iter().map(|o| o.token_ids.len()).sum()
    }
}
