//! Correlation table: in-flight primary requests keyed by correlation id.

use crate::batch::Responder;
use crate::protocol::RequestId;
use crate::{BridgeError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// One call that has been sent (or is about to be sent) over the primary transport.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub endpoint: String,
    pub created_at: Instant,
    deadline: Option<JoinHandle<()>>,
    responder: Responder,
}

impl PendingRequest {
    pub fn new(endpoint: String, responder: Responder, deadline: Option<JoinHandle<()>>) -> Self {
        Self {
            endpoint,
            created_at: Instant::now(),
            deadline,
            responder,
        }
    }

    /// Complete the caller, disarming the deadline timer first.
    pub fn complete(mut self, outcome: Result<Value>) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
        // The caller may have dropped its future; nothing to do then.
        let _ = self.responder.send(outcome);
    }
}

#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl CorrelationTable {
    pub fn insert(&mut self, id: RequestId, request: PendingRequest) {
        self.entries.insert(id, request);
    }

    /// Remove an entry. `None` means it was already answered, timed out, or swept.
    pub fn remove(&mut self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    /// Remove every entry older than `threshold` as of `now`.
    pub fn drain_stale(&mut self, now: Instant, threshold: Duration) -> Vec<(RequestId, PendingRequest)> {
        let stale: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.created_at) > threshold)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|request| (id, request)))
            .collect()
    }

    /// Reject every entry with `Shutdown`.
    pub fn reject_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, request) in self.entries.drain() {
            request.complete(Err(BridgeError::Shutdown));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
