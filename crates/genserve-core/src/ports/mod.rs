//! Port definitions (trait abstractions) for external systems.
//!
//! The generation backend is the only external collaborator of the request
//! lifecycle. Adapters implement [`GenerationBackend`]; the core never sees
//! their transport or scheduling details.

pub mod backend;

pub use backend::{BackendError, GenerationBackend, OutputStream};

#[cfg(test)]
pub use backend::MockGenerationBackend;
