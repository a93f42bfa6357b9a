#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

// Silence unused dev-dependency warnings for integration-only test deps
#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use serde_json as _;
#[cfg(test)]
use tower as _;

pub mod bootstrap;
pub mod error;
pub mod handlers;
mod ndjson;
pub mod routes;
pub mod state;

// Re-export primary types
pub use bootstrap::{ServerConfig, bind, serve};
pub use error::HttpError;
pub use routes::create_router;
pub use state::{ApiContext, AppState, BackendSlot};
