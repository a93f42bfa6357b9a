//! Sampling parameters and their validation.
//!
//! The decoder forwards every request field other than `prompt` and `stream`
//! here. Construction rejects unknown fields, ill-typed values and values
//! outside their valid domain, so a backend only ever sees validated params.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Temperatures below this are treated as greedy sampling.
const GREEDY_EPSILON: f32 = 1e-5;

const DEFAULT_MAX_TOKENS: u32 = 16;

/// Every field name `SamplingParams` accepts.
pub const KNOWN_FIELDS: &[&str] = &[
    "n",
    "best_of",
    "presence_penalty",
    "frequency_penalty",
    "repetition_penalty",
    "temperature",
    "top_p",
    "top_k",
    "min_p",
    "seed",
    "stop",
    "stop_token_ids",
    "ignore_eos",
    "max_tokens",
    "min_tokens",
    "logprobs",
    "prompt_logprobs",
    "skip_special_tokens",
    "spaces_between_special_tokens",
    "include_stop_str_in_output",
];

/// Errors raised while building [`SamplingParams`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplingParamsError {
    /// The field is not a sampling parameter.
    #[error("unknown sampling parameter `{0}`")]
    UnknownField(String),

    /// A field has the wrong JSON type.
    #[error("malformed sampling parameters: {0}")]
    Malformed(String),

    /// A field is outside its valid domain.
    #[error("invalid sampling parameter `{field}`: {reason}")]
    OutOfRange { field: &'static str, reason: String },
}

impl SamplingParamsError {
    fn out_of_range(field: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            field,
            reason: reason.into(),
        }
    }
}

/// Options controlling how the backend samples output tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    /// Number of candidates returned for the request.
    pub n: u32,
    /// Number of candidates generated before picking the best `n`.
    pub best_of: Option<u32>,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub repetition_penalty: f32,
    pub temperature: f32,
    pub top_p: f32,
    /// `-1` disables top-k filtering.
    pub top_k: i32,
    pub min_p: f32,
    pub seed: Option<u64>,
    #[serde(deserialize_with = "one_or_many")]
    pub stop: Vec<String>,
    pub stop_token_ids: Vec<u32>,
    pub ignore_eos: bool,
    /// `None` leaves the length bounded only by the model context.
    pub max_tokens: Option<u32>,
    pub min_tokens: u32,
    /// Number of top logprobs to return per generated token.
    pub logprobs: Option<u32>,
    pub prompt_logprobs: Option<u32>,
    pub skip_special_tokens: bool,
    pub spaces_between_special_tokens: bool,
    pub include_stop_str_in_output: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            n: 1,
            best_of: None,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            repetition_penalty: 1.0,
            temperature: 1.0,
            top_p: 1.0,
            top_k: -1,
            min_p: 0.0,
            seed: None,
            stop: Vec::new(),
            stop_token_ids: Vec::new(),
            ignore_eos: false,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            min_tokens: 0,
            logprobs: None,
            prompt_logprobs: None,
            skip_special_tokens: true,
            spaces_between_special_tokens: true,
            include_stop_str_in_output: false,
        }
    }
}

/// `stop` accepts a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(stop)) => vec![stop],
        Some(OneOrMany::Many(stops)) => stops,
    })
}

impl SamplingParams {
    /// Build validated params from the request fields left after `prompt`
    /// and `stream` were taken out.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, SamplingParamsError> {
        if let Some(unknown) = fields
            .keys()
            .find(|key| !KNOWN_FIELDS.contains(&key.as_str()))
        {
            return Err(SamplingParamsError::UnknownField(unknown.clone()));
        }

        // Explicit nulls on non-nullable fields fall back to their defaults;
        // `max_tokens: null` keeps its meaning of "unbounded".
        let fields: Map<String, Value> = fields
            .into_iter()
            .filter(|(key, value)| !value.is_null() || key == "max_tokens")
            .collect();

        let params: Self = serde_json::from_value(Value::Object(fields))
            .map_err(|e| SamplingParamsError::Malformed(e.to_string()))?;

        params.validate()?;
        Ok(params)
    }

    /// Check every field against its valid domain.
    pub fn validate(&self) -> Result<(), SamplingParamsError> {
        if self.n < 1 {
            return Err(SamplingParamsError::out_of_range("n", "must be at least 1"));
        }
        if let Some(best_of) = self.best_of
            && best_of < self.n
        {
            return Err(SamplingParamsError::out_of_range(
                "best_of",
                format!("must be greater than or equal to n ({}), got {best_of}", self.n),
            ));
        }

        for (field, value) in [
            ("presence_penalty", self.presence_penalty),
            ("frequency_penalty", self.frequency_penalty),
            ("repetition_penalty", self.repetition_penalty),
            ("temperature", self.temperature),
            ("top_p", self.top_p),
            ("min_p", self.min_p),
        ] {
            if !value.is_finite() {
                return Err(SamplingParamsError::out_of_range(field, "must be finite"));
            }
        }

        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(SamplingParamsError::out_of_range(
                "presence_penalty",
                format!("must be in [-2, 2], got {}", self.presence_penalty),
            ));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(SamplingParamsError::out_of_range(
                "frequency_penalty",
                format!("must be in [-2, 2], got {}", self.frequency_penalty),
            ));
        }
        if self.repetition_penalty <= 0.0 {
            return Err(SamplingParamsError::out_of_range(
                "repetition_penalty",
                format!("must be greater than zero, got {}", self.repetition_penalty),
            ));
        }
        if self.temperature < 0.0 {
            return Err(SamplingParamsError::out_of_range(
                "temperature",
                format!("must be non-negative, got {}", self.temperature),
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(SamplingParamsError::out_of_range(
                "top_p",
                format!("must be in (0, 1], got {}", self.top_p),
            ));
        }
        if self.top_k < -1 || self.top_k == 0 {
            return Err(SamplingParamsError::out_of_range(
                "top_k",
                format!("must be -1 (disable) or at least 1, got {}", self.top_k),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_p) {
            return Err(SamplingParamsError::out_of_range(
                "min_p",
                format!("must be in [0, 1], got {}", self.min_p),
            ));
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens < 1 {
                return Err(SamplingParamsError::out_of_range(
                    "max_tokens",
                    "must be at least 1",
                ));
            }
            if self.min_tokens > max_tokens {
                return Err(SamplingParamsError::out_of_range(
                    "min_tokens",
                    format!(
                        "must be less than or equal to max_tokens ({max_tokens}), got {}",
                        self.min_tokens
                    ),
                ));
            }
        }
        if self.stop.iter().any(String::is_empty) {
            return Err(SamplingParamsError::out_of_range(
                "stop",
                "stop strings must not be empty",
            ));
        }

        if self.is_greedy() {
            if self.n > 1 {
                return Err(SamplingParamsError::out_of_range(
                    "n",
                    "must be 1 when using greedy sampling",
                ));
            }
            if self.best_of.is_some_and(|best_of| best_of > 1) {
                return Err(SamplingParamsError::out_of_range(
                    "best_of",
                    "must be 1 when using greedy sampling",
                ));
            }
        }

        Ok(())
    }

    /// Whether the temperature selects greedy decoding.
    #[must_use]
    pub fn is_greedy(&self) -> bool {
        self.temperature < GREEDY_EPSILON
    }
}
