//! Configuration for the llama-server backend.

use std::time::Duration;

/// Where the upstream server lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlamaServerConfig {
    /// Base URL without a trailing slash, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// How long `connect` polls `/health` before giving up.
    pub ready_timeout: Duration,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
    /// Timeout for a single readiness probe.
    pub probe_timeout: Duration,
}

impl Default for LlamaServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            ready_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl LlamaServerConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub const fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub(crate) fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    pub(crate) fn completion_url(&self) -> String {
        format!("{}/completion", self.base_url)
    }
}
