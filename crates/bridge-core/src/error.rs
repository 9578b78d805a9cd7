//! Error types for the bridge.
//!
//! Callers only ever see the variants produced on the request path
//! (`Timeout`, `StaleCleanup`, `Backend`, `Fallback`, `Shutdown`). Transport and
//! framing errors are internal: they are logged and drive reconnection.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Request to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("Request to {endpoint} reclaimed by stale cleanup after {age:?}")]
    StaleCleanup { endpoint: String, age: Duration },

    #[error("Backend error from {endpoint}: {message}")]
    Backend { endpoint: String, message: String },

    #[error("Fallback request to {endpoint} failed{}: {message}", status_suffix(.status))]
    Fallback {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    // Primary transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Bridge has shut down")]
    Shutdown,
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" with status {}", code))
        .unwrap_or_default()
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// True when the request ran past its per-request deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// True when the request was reclaimed by the stale sweep rather than timing out.
    pub fn is_stale(&self) -> bool {
        matches!(self, BridgeError::StaleCleanup { .. })
    }

    /// True when the backend itself answered with an error.
    pub fn is_backend(&self) -> bool {
        matches!(self, BridgeError::Backend { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Timeout {
            endpoint: "models/list".into(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Request to models/list timed out after 30s");

        let err = BridgeError::Backend {
            endpoint: "models/list".into(),
            message: "not found".into(),
        };
        assert_eq!(err.to_string(), "Backend error from models/list: not found");
    }

    #[test]
    fn test_fallback_display_with_and_without_status() {
        let err = BridgeError::Fallback {
            endpoint: "status".into(),
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "Fallback request to status failed with status 503: unavailable"
        );

        let err = BridgeError::Fallback {
            endpoint: "status".into(),
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Fallback request to status failed: connection refused"
        );
    }

    #[test]
    fn test_timeout_and_stale_are_distinct() {
        let timeout = BridgeError::Timeout {
            endpoint: "a".into(),
            after: Duration::from_secs(1),
        };
        let stale = BridgeError::StaleCleanup {
            endpoint: "a".into(),
            age: Duration::from_secs(200),
        };
        assert!(timeout.is_timeout() && !timeout.is_stale());
        assert!(stale.is_stale() && !stale.is_timeout());
    }

    #[test]
    fn test_json_conversion() {
        let err: BridgeError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, BridgeError::Json { .. }));
    }
}
