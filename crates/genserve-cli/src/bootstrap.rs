//! Composition root.
//!
//! This is the only place where the HTTP adapter and the backend are wired
//! together. The server starts answering `/health` before the backend is
//! ready; `/generate` answers 503 until it is installed.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use genserve_axum::{ApiContext, bind, serve};
use genserve_core::{GenerationBackend, Outcome, with_cancellation};
use genserve_runtime::LlamaServerBackend;

use crate::parser::{Cli, LogLevel};

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: LogLevel) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_directive()))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

/// Run the server until ctrl-c, or until startup fails.
pub async fn run(cli: Cli) -> Result<()> {
    let server_config = cli.server_config();
    let backend_config = cli.backend_config();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %server_config.addr(),
        root_path = ?server_config.root_path,
        upstream = %backend_config.base_url,
        ready_timeout_secs = backend_config.ready_timeout.as_secs(),
        "Starting genserve"
    );

    let shutdown = CancellationToken::new();
    let state = Arc::new(ApiContext::new(shutdown.clone()));

    let listener = bind(&server_config).await?;
    let server = tokio::spawn({
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        async move { serve(listener, state, &server_config, shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received ctrl-c, shutting down"),
                Err(e) => warn!(error = %e, "Failed to listen for ctrl-c, shutting down"),
            }
            shutdown.cancel();
        }
    });

    match with_cancellation(&shutdown, LlamaServerBackend::connect(backend_config)).await {
        Outcome::Completed(Ok(backend)) => {
            let backend: Arc<dyn GenerationBackend> = Arc::new(backend);
            if state.backend.install(backend).is_err() {
                shutdown.cancel();
                return Err(anyhow!("A generation backend was already installed"));
            }
        }
        Outcome::Completed(Err(e)) => {
            error!(error = %e, "Backend failed to start");
            shutdown.cancel();
            // Surface the backend failure, not the server's shutdown result.
            let _ = server.await;
            return Err(e).context("Backend failed to start");
        }
        Outcome::Cancelled => info!("Shutdown requested before the backend was ready"),
    }

    server.await.context("Server task panicked")?
}
