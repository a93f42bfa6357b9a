//! Command-line configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use genserve_axum::ServerConfig;
use genserve_runtime::LlamaServerConfig;

/// Log verbosity, named the way uvicorn-style servers name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The equivalent `tracing` filter directive.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Serve text generation over HTTP in front of a llama-server backend.
#[derive(Debug, Parser)]
#[command(name = "genserve")]
#[command(version, about)]
pub struct Cli {
    /// Interface to bind
    #[arg(long, env = "GENSERVE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "GENSERVE_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Additional prefix the routes are served under (e.g. behind a reverse proxy)
    #[arg(long, env = "GENSERVE_ROOT_PATH")]
    pub root_path: Option<String>,

    /// Log level; `RUST_LOG` takes precedence when set
    #[arg(long, env = "GENSERVE_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Base URL of the llama-server instance doing the generation
    #[arg(long, env = "GENSERVE_UPSTREAM_URL", default_value = "http://127.0.0.1:8080")]
    pub upstream_url: String,

    /// Seconds to wait for the backend to become ready
    #[arg(long, env = "GENSERVE_READY_TIMEOUT", default_value_t = 120)]
    pub ready_timeout: u64,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            root_path: self.root_path.clone(),
        }
    }

    pub fn backend_config(&self) -> LlamaServerConfig {
        LlamaServerConfig::new(self.upstream_url.clone())
            .with_ready_timeout(Duration::from_secs(self.ready_timeout))
    }
}
