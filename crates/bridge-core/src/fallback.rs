//! Fallback transport used while the primary socket is unavailable.
//!
//! Each call is an independent HTTP exchange: `POST {base_url}/{endpoint}`
//! with the payload as the JSON body. There is no batching and no correlation
//! table; the caller is completed straight from the HTTP response.

use crate::{BridgeError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A stateless, per-call transport to the backend.
#[async_trait]
pub trait FallbackTransport: Send + Sync + 'static {
    /// Issue one call and return the backend's result.
    async fn call(&self, endpoint: &str, payload: Value) -> Result<Value>;

    /// Probe the backend; true only when it reports itself fully operational.
    async fn check_health(&self) -> bool;
}

/// HTTP implementation of [`FallbackTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFallback {
    client: Client,
    base_url: String,
    health_path: String,
}

impl HttpFallback {
    /// Create a fallback client for the given base URL.
    pub fn new(base_url: &str, health_path: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| BridgeError::Config {
            message: format!("Invalid fallback base URL {}: {}", base_url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BridgeError::Config {
                message: format!("Unsupported fallback URL scheme: {}", parsed.scheme()),
            });
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("backend-bridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            health_path: health_path.to_string(),
        })
    }

    /// Path-style address for an endpoint.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn health_url(&self) -> String {
        self.endpoint_url(&self.health_path)
    }

    async fn read_result(endpoint: &str, response: Response) -> Result<Value> {
        let status = response.status();
        let body = response.bytes().await.map_err(|e| BridgeError::Fallback {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(BridgeError::Fallback {
                endpoint: endpoint.to_string(),
                status: Some(status.as_u16()),
                message: error_message(&body).unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                }),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|e| BridgeError::Fallback {
            endpoint: endpoint.to_string(),
            status: Some(status.as_u16()),
            message: format!("Invalid JSON in response: {}", e),
        })
    }
}

#[async_trait]
impl FallbackTransport for HttpFallback {
    async fn call(&self, endpoint: &str, payload: Value) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        debug!("Fallback POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BridgeError::Fallback {
                endpoint: endpoint.to_string(),
                status: None,
                message: format!("POST {} failed: {}", url, e),
            })?;

        Self::read_result(endpoint, response).await
    }

    async fn check_health(&self) -> bool {
        match self.client.get(self.health_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

/// Pull a human-readable message out of an error body, if it carries one.
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        other => Some(other.to_string()),
    }
}
