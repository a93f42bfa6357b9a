#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

mod backend;
mod config;
mod health;
mod sse;
mod wire;

pub use backend::LlamaServerBackend;
pub use config::LlamaServerConfig;
pub use health::{check_health, wait_for_ready};

// Silence unused dev-dependency warning for the integration-only fake server
#[cfg(test)]
use axum as _;
