#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

// Used by main.rs binary
use dotenvy as _;

pub mod bootstrap;
pub mod parser;

pub use bootstrap::{init_tracing, run};
pub use parser::{Cli, LogLevel};
