//! Cancellation guard.
//!
//! Runs a unit of request work against a cancellation signal. Whichever
//! completes first decides the outcome; the losing side is dropped, so work
//! that owns a [`GenerationSession`](crate::GenerationSession) aborts its
//! request as part of that drop.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Result of work raced against cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The completed value, or `None` if cancelled.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }
}

/// Run `work` unless `cancel` fires first.
///
/// A token that is already cancelled wins without polling `work`.
pub async fn with_cancellation<F>(cancel: &CancellationToken, work: F) -> Outcome<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Outcome::Cancelled,
        value = work => Outcome::Completed(value),
    }
}
