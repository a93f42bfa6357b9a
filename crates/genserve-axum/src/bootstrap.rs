//! Server configuration and the serve loop.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::routes::create_router;
use crate::state::AppState;

/// Server configuration for the Axum adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port for the HTTP server.
    pub port: u16,
    /// Optional prefix the routes are also served under.
    pub root_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            root_path: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Bind the listener for `config`.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.addr();
    TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))
}

/// Serve the API on a pre-bound listener until `cancel` fires.
///
/// In-flight requests observe the same token through `state.shutdown`, so
/// graceful shutdown cancels outstanding generations instead of waiting for
/// them.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    config: &ServerConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    let app = create_router(state, config.root_path.as_deref());

    info!(%addr, root_path = ?config.root_path, "genserve listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("genserve shut down");
    Ok(())
}
