#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod cancellation;
pub mod decode;
pub mod domain;
pub mod encode;
pub mod ports;
pub mod registry;
pub mod sampling;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use cancellation::{Outcome, with_cancellation};
pub use decode::{DecodeError, decode_request, decode_value};
pub use domain::{
    CompletionOutput, FinishReason, GenerationRequest, Logprob, Prompt, RequestId, RequestOutput,
    TokenLogprobs,
};
pub use encode::{
    GenerateResponse, GenerationError, ResponseMode, aggregate, encode_line, ndjson_lines,
};
pub use ports::{BackendError, GenerationBackend, OutputStream};
pub use registry::{InFlightLease, InFlightRequests};
pub use sampling::{SamplingParams, SamplingParamsError};
pub use session::{GenerationSession, SessionError};
