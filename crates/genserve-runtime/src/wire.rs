//! llama-server `/completion` wire types.
//!
//! Request body fields follow llama-server's native names; response chunks
//! are the streamed `data:` payloads, each carrying only the new delta.

use serde::{Deserialize, Serialize};

use genserve_core::{
    BackendError, CompletionOutput, FinishReason, Logprob, Prompt, RequestId, RequestOutput,
    SamplingParams, TokenLogprobs,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a Prompt,
    pub stream: bool,
    pub return_tokens: bool,
    pub n_predict: i64,
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "no_stop_strings")]
    pub stop: &'a [String],
    pub ignore_eos: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub n_probs: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(value: &u32) -> bool {
    *value == 0
}

const fn no_stop_strings(stop: &&[String]) -> bool {
    stop.is_empty()
}

impl<'a> CompletionRequest<'a> {
    /// Map a validated request onto llama-server's body.
    ///
    /// llama-server produces a single sequence, so anything asking for more
    /// than one candidate is refused, along with options it has no
    /// equivalent for.
    pub fn build(prompt: &'a Prompt, params: &'a SamplingParams) -> Result<Self, BackendError> {
        if params.n > 1 || params.best_of.is_some_and(|best_of| best_of > 1) {
            return Err(BackendError::Rejected(
                "llama-server generates a single candidate; `n` and `best_of` must be 1".into(),
            ));
        }
        if !params.stop_token_ids.is_empty() {
            return Err(BackendError::Rejected(
                "`stop_token_ids` is not supported by the llama-server backend".into(),
            ));
        }
        if params.prompt_logprobs.is_some() {
            return Err(BackendError::Rejected(
                "`prompt_logprobs` is not supported by the llama-server backend".into(),
            ));
        }
        if let Some(field) = unsupported_option(params) {
            return Err(BackendError::Rejected(format!(
                "`{field}` is not supported by the llama-server backend"
            )));
        }

        Ok(Self {
            prompt,
            stream: true,
            return_tokens: true,
            n_predict: params.max_tokens.map_or(-1, i64::from),
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            min_p: params.min_p,
            repeat_penalty: params.repetition_penalty,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            seed: params.seed,
            stop: &params.stop,
            ignore_eos: params.ignore_eos,
            // `logprobs: 0` still wants the sampled token's logprob.
            n_probs: params.logprobs.map_or(0, |n| n.max(1)),
        })
    }
}

/// First option set to a value llama-server cannot honour.
const fn unsupported_option(params: &SamplingParams) -> Option<&'static str> {
    if params.min_tokens > 0 {
        Some("min_tokens")
    } else if params.include_stop_str_in_output {
        Some("include_stop_str_in_output")
    } else if !params.skip_special_tokens {
        Some("skip_special_tokens")
    } else if !params.spaces_between_special_tokens {
        Some("spaces_between_special_tokens")
    } else {
        None
    }
}

/// One streamed `data:` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompletionChunk {
    pub content: String,
    pub tokens: Vec<u32>,
    pub stop: bool,
    pub stop_type: Option<String>,
    pub completion_probabilities: Vec<TokenProbability>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TokenProbability {
    pub id: u32,
    pub token: Option<String>,
    pub logprob: f64,
    pub top_logprobs: Vec<TopLogprob>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopLogprob {
    pub id: u32,
    pub token: Option<String>,
    pub logprob: f64,
}

impl TokenProbability {
    /// The sampled token plus at most `top_n` alternatives, keyed by token id.
    ///
    /// Ranks are 1-based positions among the alternatives llama-server
    /// returned; the sampled token has no rank if it is not among them.
    fn to_logprobs(&self, top_n: usize) -> TokenLogprobs {
        let mut entries: TokenLogprobs = self
            .top_logprobs
            .iter()
            .take(top_n)
            .zip(1_u32..)
            .map(|(alt, rank)| {
                let mut logprob = Logprob::new(alt.logprob).with_rank(rank);
                logprob.decoded_token.clone_from(&alt.token);
                (alt.id, logprob)
            })
            .collect();

        let sampled_rank = self
            .top_logprobs
            .iter()
            .zip(1_u32..)
            .find_map(|(alt, rank)| (alt.id == self.id).then_some(rank));
        entries.entry(self.id).or_insert_with(|| Logprob {
            logprob: self.logprob,
            rank: sampled_rank,
            decoded_token: self.token.clone(),
        });
        entries
    }
}

/// Cumulative state for one request, fed with upstream deltas.
#[derive(Debug)]
pub struct Accumulator {
    request_id: RequestId,
    text: String,
    token_ids: Vec<u32>,
    /// Alternatives kept per token; `None` when logprobs were not requested.
    top_n: Option<usize>,
    logprobs: Vec<TokenLogprobs>,
}

impl Accumulator {
    pub fn new(request_id: RequestId, logprobs: Option<u32>) -> Self {
        Self {
            request_id,
            text: String::new(),
            token_ids: Vec::new(),
            top_n: logprobs.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
            logprobs: Vec::new(),
        }
    }

    /// Append one chunk and return the new snapshot.
    ///
    /// Logprob entries stay one-to-one with token ids: a token without a
    /// matching probability record gets an empty entry.
    pub fn apply(&mut self, chunk: CompletionChunk) -> RequestOutput {
        self.text.push_str(&chunk.content);
        self.token_ids.extend_from_slice(&chunk.tokens);
        if let Some(top_n) = self.top_n {
            let probabilities = &chunk.completion_probabilities;
            self.logprobs.extend(chunk.tokens.iter().enumerate().map(|(i, id)| {
                probabilities
                    .get(i)
                    .filter(|p| p.id == *id)
                    .map_or_else(TokenLogprobs::new, |p| p.to_logprobs(top_n))
            }));
        }

        let mut output = CompletionOutput::new(0, self.text.clone(), self.token_ids.clone());
        if self.top_n.is_some() {
            output.cumulative_logprob = Some(
                self.logprobs
                    .iter()
                    .zip(&self.token_ids)
                    .filter_map(|(entry, id)| entry.get(id).map(|l| l.logprob))
                    .sum(),
            );
            output = output.with_logprobs(self.logprobs.clone());
        }
        if chunk.stop {
            let reason = match chunk.stop_type.as_deref() {
                Some("limit") => FinishReason::Length,
                _ => FinishReason::Stop,
            };
            output = output.with_finish_reason(reason);
        }

        RequestOutput::new(self.request_id, vec![output], chunk.stop)
    }
}

/// Extract a readable message from an upstream error payload.
pub fn error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| error.to_string(), str::to_string)
}
