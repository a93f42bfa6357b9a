//! Registry of in-flight request ids.
//!
//! Request ids are random, so collisions are already negligible. The registry
//! turns "unique among in-flight requests" into a checked invariant: a
//! session cannot open while another live session holds the same id.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::RequestId;

/// Shared set of request ids currently owned by a live session.
#[derive(Debug, Clone, Default)]
pub struct InFlightRequests {
    ids: Arc<Mutex<HashSet<RequestId>>>,
}

impl InFlightRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `request_id` until the returned lease is dropped.
    ///
    /// Returns `None` if the id is already in flight.
    #[must_use]
    pub fn register(&self, request_id: RequestId) -> Option<InFlightLease> {
        if !self.lock().insert(request_id) {
            return None;
        }
        Some(InFlightLease {
            request_id,
            ids: Arc::clone(&self.ids),
        })
    }

    #[must_use]
    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.lock().contains(request_id)
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<RequestId>> {
        // The set stays consistent even if a holder panicked mid-operation.
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ownership of one in-flight request id. Releases the id on drop.
#[derive(Debug)]
pub struct InFlightLease {
    request_id: RequestId,
    ids: Arc<Mutex<HashSet<RequestId>>>,
}

impl InFlightLease {
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl Drop for InFlightLease {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}
