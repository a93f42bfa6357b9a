//! Request decoding.
//!
//! Turns a raw `/generate` body into a [`GenerationRequest`]. Everything here
//! runs before the backend is touched, so every failure is a client error.

use serde_json::Value;
use thiserror::Error;

use crate::domain::{GenerationRequest, Prompt, RequestId};
use crate::sampling::{SamplingParams, SamplingParamsError};

/// Errors produced while decoding a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The body is not valid JSON.
    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(String),

    /// The body is JSON but not an object.
    #[error("Request body must be a JSON object")]
    NotAnObject,

    /// A required field is absent.
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    /// A lifecycle field (`prompt`, `stream`) has an unusable value.
    #[error("Invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Sampling-parameter construction failed.
    #[error(transparent)]
    InvalidSamplingParameter(#[from] SamplingParamsError),
}

impl DecodeError {
    /// Stable discriminant for error bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) | Self::NotAnObject => "malformed_request",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::InvalidSamplingParameter(_) => "invalid_sampling_parameter",
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Decode a raw request body.
pub fn decode_request(body: &[u8]) -> Result<GenerationRequest, DecodeError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    decode_value(value)
}

/// Decode an already-parsed request body.
///
/// `prompt` and `stream` are taken out; all remaining fields become
/// sampling parameters. A fresh [`RequestId`] is assigned.
pub fn decode_value(value: Value) -> Result<GenerationRequest, DecodeError> {
    let Value::Object(mut fields) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let prompt = match fields.remove("prompt") {
        None | Some(Value::Null) => return Err(DecodeError::MissingField("prompt")),
        Some(prompt) => parse_prompt(prompt)?,
    };
    let stream = parse_stream(fields.remove("stream"))?;
    let sampling_params = SamplingParams::from_fields(fields)?;

    Ok(GenerationRequest {
        prompt,
        stream,
        sampling_params,
        request_id: RequestId::random(),
    })
}

/// Disambiguate text and token-id prompts by the type of the first element.
fn parse_prompt(value: Value) -> Result<Prompt, DecodeError> {
    match value {
        Value::String(text) => Ok(Prompt::Text(text)),
        Value::Array(items) => match items.first() {
            // An empty prompt remains a text prompt.
            None => Ok(Prompt::Text(String::new())),
            Some(first) if is_integer(first) => parse_token_ids(&items).map(Prompt::Tokens),
            Some(_) => Err(DecodeError::invalid(
                "prompt",
                "expected a string or a list of token ids",
            )),
        },
        _ => Err(DecodeError::invalid(
            "prompt",
            "expected a string or a list of token ids",
        )),
    }
}

fn is_integer(value: &Value) -> bool {
    value.as_i64().is_some() || value.as_u64().is_some()
}

fn parse_token_ids(items: &[Value]) -> Result<Vec<u32>, DecodeError> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| {
            item.as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| {
                    DecodeError::invalid(
                        "prompt",
                        format!("token id at position {position} is not a non-negative 32-bit integer: {item}"),
                    )
                })
        })
        .collect()
}

fn parse_stream(value: Option<Value>) -> Result<bool, DecodeError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(stream)) => Ok(stream),
        Some(other) => Err(DecodeError::invalid(
            "stream",
            format!("expected a boolean, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<GenerationRequest, DecodeError> {
        decode_request(value.to_string().as_bytes())
    }

    #[test]
    fn text_prompt_with_sampling_fields() {
        let request = decode(json!({"prompt": "Hello", "stream": false, "max_tokens": 2})).unwrap();
        assert_eq!(request.prompt, Prompt::Text("Hello".into()));
        assert!(!request.stream);
        assert_eq!(request.sampling_params.max_tokens, Some(2));
    }

    #[test]
    fn stream_defaults_to_false() {
        let request = decode(json!({"prompt": "Hello"})).unwrap();
        assert!(!request.stream);

        let request = decode(json!({"prompt": "Hello", "stream": null})).unwrap();
        assert!(!request.stream);
    }

    #[test]
    fn token_id_prompt_is_not_reinterpreted_as_text() {
        let request = decode(json!({"prompt": [1, 2, 3]})).unwrap();
        assert_eq!(request.prompt, Prompt::Tokens(vec![1, 2, 3]));
    }

    #[test]
    fn empty_prompts_remain_text() {
        let request = decode(json!({"prompt": []})).unwrap();
        assert_eq!(request.prompt, Prompt::Text(String::new()));

        let request = decode(json!({"prompt": ""})).unwrap();
        assert_eq!(request.prompt, Prompt::Text(String::new()));
    }

    #[test]
    fn missing_prompt_fails() {
        assert_eq!(
            decode(json!({"stream": true})).unwrap_err(),
            DecodeError::MissingField("prompt")
        );
        assert_eq!(
            decode(json!({"prompt": null})).unwrap_err(),
            DecodeError::MissingField("prompt")
        );
    }

    #[test]
    fn negative_or_mixed_token_ids_fail() {
        for prompt in [json!([-1, 2]), json!([1, "two"]), json!([1, 2.5]), json!([5_000_000_000_u64])] {
            let err = decode(json!({ "prompt": prompt.clone() })).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidField { field: "prompt", .. }),
                "prompt {prompt} gave {err:?}"
            );
        }
    }

    #[test]
    fn non_integer_first_element_is_malformed() {
        let err = decode(json!({"prompt": ["a", "b"]})).unwrap_err();
        assert_eq!(err.kind(), "invalid_field");

        let err = decode(json!({"prompt": 42})).unwrap_err();
        assert_eq!(err.kind(), "invalid_field");
    }

    #[test]
    fn non_boolean_stream_fails() {
        let err = decode(json!({"prompt": "x", "stream": "yes"})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "stream", .. }));
    }

    #[test]
    fn unknown_fields_are_invalid_sampling_parameters() {
        let err = decode(json!({"prompt": "x", "bogus": 1})).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidSamplingParameter(SamplingParamsError::UnknownField(
                "bogus".into()
            ))
        );
        assert_eq!(err.kind(), "invalid_sampling_parameter");
    }

    #[test]
    fn body_must_be_a_json_object() {
        assert!(matches!(
            decode_request(b"not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert_eq!(decode(json!([1, 2])).unwrap_err(), DecodeError::NotAnObject);
    }

    #[test]
    fn every_request_gets_a_fresh_id() {
        let a = decode(json!({"prompt": "x"})).unwrap();
        let b = decode(json!({"prompt": "x"})).unwrap();
        assert_ne!(a.request_id, b.request_id);
    }
}
