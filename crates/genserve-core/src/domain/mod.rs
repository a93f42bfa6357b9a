//! Domain types for generation requests and their output snapshots.
//!
//! These types are pure data: no I/O, no HTTP, no backend specifics.

mod output;
mod request;

pub use output::{CompletionOutput, FinishReason, Logprob, RequestOutput, TokenLogprobs};
pub use request::{GenerationRequest, Prompt, RequestId};
