//! Shared application state type.
//!
//! Defines the `AppState` type used across all handlers and routers.

use std::sync::{Arc, OnceLock};

use genserve_core::{GenerationBackend, InFlightRequests};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Set-once holder for the generation backend.
///
/// Empty until startup installs the backend; `/generate` answers 503 while
/// it is empty.
#[derive(Debug, Default)]
pub struct BackendSlot(OnceLock<Arc<dyn GenerationBackend>>);

impl BackendSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the backend. Returns it back if one is already installed.
    pub fn install(&self, backend: Arc<dyn GenerationBackend>) -> Result<(), Arc<dyn GenerationBackend>> {
        self.0.set(backend)?;
        info!("Generation backend installed");
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn GenerationBackend>> {
        self.0.get().cloned()
    }

    pub fn is_installed(&self) -> bool {
        self.0.get().is_some()
    }
}

/// State for the generation API.
#[derive(Debug)]
pub struct ApiContext {
    pub backend: BackendSlot,
    /// Request ids owned by live sessions.
    pub in_flight: InFlightRequests,
    /// Server shutdown signal; every request's cancellation token is a child.
    pub shutdown: CancellationToken,
}

impl ApiContext {
    /// Context with an empty backend slot.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            backend: BackendSlot::new(),
            in_flight: InFlightRequests::new(),
            shutdown,
        }
    }

    /// Context with the backend already installed.
    pub fn with_backend(backend: Arc<dyn GenerationBackend>, shutdown: CancellationToken) -> Self {
        let ctx = Self::new(shutdown);
        // A fresh slot is empty.
        let _ = ctx.backend.install(backend);
        ctx
    }
}

/// Application state shared across all handlers.
pub type AppState = Arc<ApiContext>;
