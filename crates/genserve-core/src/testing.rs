//! Test doubles for the generation backend port, plus log capture.
//!
//! Only compiled for tests or with the `test-utils` feature.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::sync::Notify;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

use crate::domain::{CompletionOutput, FinishReason, Prompt, RequestId, RequestOutput};
use crate::ports::{BackendError, GenerationBackend, OutputStream};
use crate::sampling::SamplingParams;

/// One recorded `generate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCall {
    pub request_id: RequestId,
    pub prompt: Prompt,
    pub params: SamplingParams,
}

/// A backend that replays a fixed script of snapshots and records every call.
///
/// Each script step is the list of candidates for one snapshot. The backend
/// stamps the request id, and marks the last step finished unless the stream
/// is held open.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Vec<Vec<CompletionOutput>>,
    hold_open: bool,
    fail_after: Option<(usize, BackendError)>,
    reject: Option<BackendError>,
    calls: Mutex<Vec<GenerateCall>>,
    aborted: Mutex<Vec<RequestId>>,
    generated: Notify,
}

impl ScriptedBackend {
    /// Single-candidate script with cumulative texts.
    ///
    /// Step `i` carries token ids `100..=100 + i`.
    #[must_use]
    pub fn from_texts(texts: &[&str]) -> Self {
        let script = texts
            .iter()
            .zip(0_u32..)
            .map(|(text, step)| vec![CompletionOutput::new(0, *text, (100..=100 + step).collect())])
            .collect();
        Self::with_snapshots(script)
    }

    #[must_use]
    pub fn with_snapshots(script: Vec<Vec<CompletionOutput>>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Keep the stream pending forever after the script, like a long generation.
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Yield `error` after `steps` snapshots.
    #[must_use]
    pub fn fail_after(mut self, steps: usize, error: BackendError) -> Self {
        self.fail_after = Some((steps, error));
        self
    }

    /// Refuse every request in `generate`.
    #[must_use]
    pub fn reject_with(mut self, error: BackendError) -> Self {
        self.reject = Some(error);
        self
    }

    /// Every `generate` call so far, in order.
    pub fn generate_calls(&self) -> Vec<GenerateCall> {
        lock(&self.calls).clone()
    }

    /// Every `abort` call so far, in order.
    pub fn aborted(&self) -> Vec<RequestId> {
        lock(&self.aborted).clone()
    }

    pub fn abort_count(&self, request_id: RequestId) -> usize {
        lock(&self.aborted)
            .iter()
            .filter(|id| **id == request_id)
            .count()
    }

    /// Resolve once `generate` has been called (a call made earlier counts).
    pub async fn wait_for_generate(&self) {
        self.generated.notified().await;
    }

    fn snapshots(&self, request_id: RequestId) -> Vec<Result<RequestOutput, BackendError>> {
        let last = self.script.len().saturating_sub(1);
        let mut items: Vec<_> = self
            .script
            .iter()
            .enumerate()
            .map(|(step, outputs)| {
                let finished = step == last && !self.hold_open;
                let outputs = if finished {
                    outputs
                        .iter()
                        .cloned()
                        .map(|o| o.with_finish_reason(FinishReason::Stop))
                        .collect()
                } else {
                    outputs.clone()
                };
                Ok(RequestOutput::new(request_id, outputs, finished))
            })
            .collect();

        if let Some((steps, error)) = &self.fail_after {
            items.truncate(*steps);
            items.push(Err(error.clone()));
        }
        items
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        request_id: RequestId,
        prompt: Prompt,
        params: SamplingParams,
    ) -> Result<OutputStream, BackendError> {
        lock(&self.calls).push(GenerateCall {
            request_id,
            prompt,
            params,
        });
        self.generated.notify_one();

        if let Some(error) = &self.reject {
            return Err(error.clone());
        }

        let items = stream::iter(self.snapshots(request_id));
        if self.hold_open {
            Ok(items.chain(stream::pending()).boxed())
        } else {
            Ok(items.boxed())
        }
    }

    fn abort(&self, request_id: RequestId) {
        lock(&self.aborted).push(request_id);
    }
}

/// Formatted log output captured for assertions.
///
/// Installed per thread, so it sees everything a current-thread runtime
/// runs while the guard is alive.
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Capture `INFO` and above on this thread until the guard drops.
    #[must_use]
    pub fn install(&self) -> DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }

    /// Number of events logged with `outcome = <outcome>`.
    pub fn outcomes(&self, outcome: &str) -> usize {
        let field = format!("outcome=\"{outcome}\"");
        self.contents()
            .lines()
            .filter(|line| line.contains(&field))
            .count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
