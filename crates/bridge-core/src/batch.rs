//! Batch window queue.
//!
//! Calls accumulate here until the flush timer fires (or the primary transport
//! comes up). A flush swaps the whole queue out, so calls arriving while a
//! batch is being sent always land in a fresh queue.

use crate::Result;
use serde_json::Value;
use tokio::sync::oneshot;

/// Continuation used to complete a caller's [`PendingResponse`](crate::PendingResponse).
pub(crate) type Responder = oneshot::Sender<Result<Value>>;

/// A call waiting in the batch window, not yet assigned a correlation id.
#[derive(Debug)]
pub(crate) struct QueuedCall {
    pub endpoint: String,
    pub payload: Value,
    pub responder: Responder,
}

#[derive(Debug, Default)]
pub(crate) struct BatchQueue {
    calls: Vec<QueuedCall>,
}

impl BatchQueue {
    /// Append a call. Returns true when it is the first call of a new window.
    pub fn push(&mut self, call: QueuedCall) -> bool {
        self.calls.push(call);
        self.calls.len() == 1
    }

    /// Take every queued call, leaving an empty queue behind.
    pub fn take(&mut self) -> Vec<QueuedCall> {
        std::mem::take(&mut self.calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(endpoint: &str) -> (QueuedCall, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            QueuedCall {
                endpoint: endpoint.to_string(),
                payload: json!({}),
                responder: tx,
            },
            rx,
        )
    }

    #[test]
    fn test_push_reports_window_start() {
        let mut queue = BatchQueue::default();
        let (a, _ra) = call("a");
        let (b, _rb) = call("b");

        assert!(queue.push(a));
        assert!(!queue.push(b));
        assert_eq!(queue.take().len(), 2);
    }

    #[test]
    fn test_take_swaps_out_whole_queue() {
        let mut queue = BatchQueue::default();
        let (a, _ra) = call("a");
        let (b, _rb) = call("b");
        queue.push(a);
        queue.push(b);

        let batch = queue.take();
        assert_eq!(batch.len(), 2);
        assert!(queue.take().is_empty());

        // Calls after the swap start a new window and never join the old batch
        let (c, _rc) = call("c");
        assert!(queue.push(c));
        assert_eq!(batch.iter().map(|c| c.endpoint.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(queue.take().len(), 1);
    }

    #[test]
    fn test_take_on_empty_queue() {
        let mut queue = BatchQueue::default();
        assert!(queue.take().is_empty());
    }
}
