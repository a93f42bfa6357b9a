//! Readiness probing for llama-server.
//!
//! llama-server answers `/health` with 503 while the model is still loading
//! and 200 once it can serve completions.

use reqwest::{Client, StatusCode};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use genserve_core::BackendError;

use crate::config::LlamaServerConfig;

/// Make a single probe against the health endpoint.
///
/// Transport errors count as "not ready" rather than failures.
pub async fn check_health(client: &Client, config: &LlamaServerConfig) -> bool {
    match client
        .get(config.health_url())
        .timeout(config.probe_timeout)
        .send()
        .await
    {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Poll the health endpoint until it reports ready.
///
/// # Errors
///
/// Returns `BackendError::Unavailable` if the server is not ready within
/// `config.ready_timeout`, or if the port answers 403/404 repeatedly (some
/// other service owns it).
pub async fn wait_for_ready(client: &Client, config: &LlamaServerConfig) -> Result<(), BackendError> {
    let health_url = config.health_url();
    info!(url = %health_url, timeout_secs = config.ready_timeout.as_secs(), "Waiting for llama-server to be ready");

    let deadline = Instant::now() + config.ready_timeout;
    let mut attempt = 0_u32;

    loop {
        attempt += 1;

        match client.get(&health_url).timeout(config.probe_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                info!(url = %health_url, attempt, "llama-server is ready");
                return Ok(());
            }
            Ok(response) => {
                let status = response.status();
                debug!(%status, attempt, "Health check not ready, retrying");

                // Fail faster if clearly wrong service
                if matches!(status, StatusCode::FORBIDDEN | StatusCode::NOT_FOUND) && attempt > 3 {
                    return Err(BackendError::Unavailable(format!(
                        "{health_url} answered {status}; it does not appear to be llama-server"
                    )));
                }
            }
            Err(e) => {
                debug!(error = %e, attempt, "Health check failed, retrying");
            }
        }

        if Instant::now() + config.poll_interval > deadline {
            return Err(BackendError::Unavailable(format!(
                "llama-server at {} was not ready within {}s",
                config.base_url,
                config.ready_timeout.as_secs()
            )));
        }
        sleep(config.poll_interval).await;
    }
}
