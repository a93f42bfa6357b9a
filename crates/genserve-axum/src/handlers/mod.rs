//! HTTP request handlers for the generation API.

pub mod generate;
pub mod health;
