//! Generation request types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sampling::SamplingParams;

/// Opaque identifier for one generation request.
///
/// Backed by a random (v4) UUID, so two fresh ids collide with negligible
/// probability. Uniqueness among in-flight requests is additionally enforced
/// by [`crate::registry::InFlightRequests`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// The prompt of a generation request.
///
/// Text and token-id prompts are mutually exclusive representations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    /// Raw prompt text, tokenized by the backend.
    Text(String),
    /// Pre-tokenized prompt.
    Tokens(Vec<u32>),
}

impl Prompt {
    /// Short label for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Tokens(_) => "tokens",
        }
    }

    #[must_use]
    pub const fn is_tokens(&self) -> bool {
        matches!(self, Self::Tokens(_))
    }

    /// Length in characters (text) or tokens (token ids).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::Tokens(ids) => ids.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded, validated generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: Prompt,
    /// Stream incremental NDJSON records instead of one aggregated record.
    pub stream: bool,
    pub sampling_params: SamplingParams,
    pub request_id: RequestId,
}
