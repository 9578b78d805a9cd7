//! Request statistics accumulated by the bridge worker.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Monotonically accumulating counters plus a running average response time.
///
/// Snapshots are published to callers through a watch channel; only the
/// bridge worker mutates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BridgeStats {
    /// Calls accepted by `request()`.
    pub total_requests: u64,
    /// Calls that ended in any rejection (timeout, stale, backend, fallback).
    pub failed_requests: u64,
    /// Calls sent as part of a primary-transport batch.
    pub batched_requests: u64,
    /// Calls dispatched through the fallback transport.
    pub fallback_requests: u64,
    /// Reconnect attempts scheduled.
    pub reconnects: u64,
    /// Responses that contributed to the average.
    pub completed_responses: u64,
    /// Running mean of response time in milliseconds.
    pub avg_response_time_ms: f64,
}

impl BridgeStats {
    /// Fold one response time into the running average.
    pub fn record_response(&mut self, elapsed: Duration) {
        self.completed_responses += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.avg_response_time_ms +=
            (sample - self.avg_response_time_ms) / self.completed_responses as f64;
    }
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} failed={} batched={} fallback={} reconnects={} avg_response={:.1}ms",
            self.total_requests,
            self.failed_requests,
            self.batched_requests,
            self.fallback_requests,
            self.reconnects,
            self.avg_response_time_ms
        )
    }
}
