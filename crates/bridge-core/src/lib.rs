//! Backend Bridge - batched, failover-capable requests from a front-end to its backend.
//!
//! A [`Bridge`] lets a front-end process issue asynchronous calls to a separate
//! backend process. Calls issued within a short window are coalesced into one
//! frame on a persistent socket connection; responses are matched back to
//! their callers by correlation id. While the socket is down the bridge
//! reconnects with exponential backoff and serves calls over a stateless HTTP
//! fallback instead, so callers never see the outage.
//!
//! # Example
//!
//! ```rust,ignore
//! use backend_bridge::{Bridge, BridgeConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> backend_bridge::Result<()> {
//!     let config = BridgeConfig::new("127.0.0.1:8765".parse().unwrap(), "http://127.0.0.1:8766");
//!     let bridge = Bridge::start(config)?;
//!
//!     let models = bridge.request("models/list", json!({"limit": 10})).await?;
//!     println!("{}", models);
//!
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod fallback;
pub mod protocol;
pub mod stats;
pub mod transport;

mod batch;
mod bridge;
mod correlation;

pub use backoff::ReconnectBackoff;
pub use bridge::{Bridge, PendingResponse};
pub use config::{BridgeConfig, BridgeDefaults};
pub use error::{BridgeError, Result};
pub use fallback::{FallbackTransport, HttpFallback};
pub use protocol::RequestId;
pub use stats::BridgeStats;
pub use transport::{ConnectionState, ConnectionStatus};
