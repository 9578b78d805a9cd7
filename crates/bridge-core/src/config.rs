//! Centralized configuration for the bridge.
//!
//! `BridgeDefaults` holds the built-in constants; `BridgeConfig` is the value a
//! hosting process builds (and optionally overrides) before starting a bridge.

use crate::backoff::ReconnectBackoff;
use crate::{BridgeError, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Built-in defaults for every bridge knob.
pub struct BridgeDefaults;

impl BridgeDefaults {
    pub const PRIMARY_PORT: u16 = 8765;
    pub const FALLBACK_BASE_URL: &'static str = "http://127.0.0.1:8766";
    pub const HEALTH_PATH: &'static str = "/health";

    // Batching and correlation
    pub const BATCH_WINDOW: Duration = Duration::from_millis(10);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
    pub const STALE_THRESHOLD: Duration = Duration::from_secs(120);

    // Reconnection
    pub const MIN_BACKOFF: Duration = Duration::from_secs(1);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
    pub const BACKOFF_GROWTH: f64 = 2.0;
    pub const BACKOFF_MAX_EXPONENT: u32 = 10;
    pub const BACKOFF_JITTER: Duration = Duration::from_secs(1);
    pub const HEALTHY_PERIOD: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    // Fallback transport
    pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

    pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(60);
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
}

/// Runtime configuration for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Whether the primary socket transport is used at all.
    pub primary_enabled: bool,
    /// Address of the backend's batch-capable socket endpoint.
    pub primary_addr: SocketAddr,
    /// Base URL for the fallback HTTP transport (endpoints are appended).
    pub fallback_base_url: String,
    /// Path of the health probe, relative to the base URL.
    pub health_path: String,
    /// How long calls are coalesced before a flush.
    pub batch_window: Duration,
    /// Per-request deadline on the primary transport.
    pub request_timeout: Duration,
    /// Period of the stale-request sweep.
    pub sweep_interval: Duration,
    /// Age after which the sweep reclaims a pending request.
    pub stale_threshold: Duration,
    /// Reconnect delay policy.
    pub backoff: ReconnectBackoff,
    /// Uptime after which a dropped connection starts backoff from scratch.
    pub healthy_period: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// HTTP timeout for fallback calls and health probes.
    pub fallback_timeout: Duration,
    /// Period of the statistics summary log line.
    pub summary_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            primary_enabled: true,
            primary_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, BridgeDefaults::PRIMARY_PORT)),
            fallback_base_url: BridgeDefaults::FALLBACK_BASE_URL.to_string(),
            health_path: BridgeDefaults::HEALTH_PATH.to_string(),
            batch_window: BridgeDefaults::BATCH_WINDOW,
            request_timeout: BridgeDefaults::REQUEST_TIMEOUT,
            sweep_interval: BridgeDefaults::SWEEP_INTERVAL,
            stale_threshold: BridgeDefaults::STALE_THRESHOLD,
            backoff: ReconnectBackoff::default(),
            healthy_period: BridgeDefaults::HEALTHY_PERIOD,
            connect_timeout: BridgeDefaults::CONNECT_TIMEOUT,
            fallback_timeout: BridgeDefaults::FALLBACK_TIMEOUT,
            summary_interval: BridgeDefaults::SUMMARY_INTERVAL,
        }
    }
}

impl BridgeConfig {
    /// Create a config pointing at the given backend endpoints, defaults elsewhere.
    pub fn new(primary_addr: SocketAddr, fallback_base_url: impl Into<String>) -> Self {
        Self {
            primary_addr,
            fallback_base_url: fallback_base_url.into(),
            ..Self::default()
        }
    }

    /// Enable or disable the primary socket transport.
    pub fn with_primary_enabled(mut self, enabled: bool) -> Self {
        self.primary_enabled = enabled;
        self
    }

    /// Set the health probe path.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Set the batch window.
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the stale sweep interval and threshold.
    pub fn with_stale_sweep(mut self, interval: Duration, threshold: Duration) -> Self {
        self.sweep_interval = interval;
        self.stale_threshold = threshold;
        self
    }

    /// Set the reconnect backoff policy.
    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the healthy-connection period.
    pub fn with_healthy_period(mut self, period: Duration) -> Self {
        self.healthy_period = period;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the fallback HTTP timeout.
    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Set the summary log interval.
    pub fn with_summary_interval(mut self, interval: Duration) -> Self {
        self.summary_interval = interval;
        self
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("request_timeout", self.request_timeout),
            ("sweep_interval", self.sweep_interval),
            ("stale_threshold", self.stale_threshold),
            ("connect_timeout", self.connect_timeout),
            ("fallback_timeout", self.fallback_timeout),
            ("summary_interval", self.summary_interval),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(BridgeError::Config {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }

        if self.fallback_base_url.trim().is_empty() {
            return Err(BridgeError::Config {
                message: "fallback_base_url must not be empty".to_string(),
            });
        }

        self.backoff.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BridgeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_defaults_match_documented_ranges() {
        let config = BridgeConfig::default();
        assert!(config.batch_window < Duration::from_millis(100));
        assert!(config.stale_threshold > config.request_timeout);
        assert_eq!(config.backoff.min, Duration::from_secs(1));
        assert_eq!(config.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = BridgeConfig::default().with_request_timeout(Duration::ZERO);
        match config.validate() {
            Err(BridgeError::Config { message }) => assert!(message.contains("request_timeout")),
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = BridgeConfig::new("127.0.0.1:9000".parse().unwrap(), "  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = BridgeConfig::default()
            .with_primary_enabled(false)
            .with_batch_window(Duration::from_millis(20))
            .with_stale_sweep(Duration::from_secs(5), Duration::from_secs(10));

        assert!(!config.primary_enabled);
        assert_eq!(config.batch_window, Duration::from_millis(20));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.stale_threshold, Duration::from_secs(10));
    }
}
