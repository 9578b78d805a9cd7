//! Wire format for the primary socket transport.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! document:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Outbound frames are always batches:
//! `{"type":"batch","requests":[{"id","endpoint","data"}, ...]}`.
//! Inbound frames are either a batch response `{"batch":true,"results":[...]}`
//! or a single response `{"id","data"?,"error"?}`.

use crate::config::BridgeDefaults;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Opaque correlation token matching a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh, never-reused id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One call inside an outbound batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub id: RequestId,
    pub endpoint: String,
    pub data: Value,
}

/// Frames sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage<'a> {
    Batch {
        requests: Cow<'a, [OutboundRequest]>,
    },
}

/// One result as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseEntry {
    /// Split into the caller-facing outcome: `data` (or `null`) on success,
    /// the backend's error message otherwise.
    pub fn into_outcome(self) -> std::result::Result<Value, String> {
        match self.error {
            None | Some(Value::Null) => Ok(self.data.unwrap_or(Value::Null)),
            Some(Value::String(message)) => Err(message),
            Some(Value::Object(map)) => match map.get("message").and_then(Value::as_str) {
                Some(message) => Err(message.to_string()),
                None => Err(Value::Object(map).to_string()),
            },
            Some(other) => Err(other.to_string()),
        }
    }
}

/// Body of a batch response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch: bool,
    pub results: Vec<ResponseEntry>,
}

/// Frames received from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    Batch(BatchResponse),
    Single(ResponseEntry),
}

impl InboundMessage {
    /// Flatten into the individual response entries.
    pub fn into_entries(self) -> Vec<ResponseEntry> {
        match self {
            InboundMessage::Batch(batch) => batch.results,
            InboundMessage::Single(entry) => vec![entry],
        }
    }
}

/// Encode an outbound batch as frame payload bytes.
pub fn encode_batch(requests: &[OutboundRequest]) -> Result<Vec<u8>> {
    let message = OutboundMessage::Batch {
        requests: Cow::Borrowed(requests),
    };
    Ok(serde_json::to_vec(&message)?)
}

/// Decode a frame payload received from the backend.
pub fn decode_inbound(payload: &[u8]) -> Result<InboundMessage> {
    let message: InboundMessage = serde_json::from_slice(payload)?;
    if let InboundMessage::Batch(BatchResponse { batch: false, .. }) = message {
        return Err(BridgeError::Json {
            message: "results frame without batch flag".to_string(),
            source: None,
        });
    }
    Ok(message)
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > BridgeDefaults::MAX_FRAME_SIZE {
        return Err(BridgeError::FrameTooLarge {
            size: len,
            max: BridgeDefaults::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > BridgeDefaults::MAX_FRAME_SIZE {
        return Err(BridgeError::FrameTooLarge {
            size: payload.len(),
            max: BridgeDefaults::MAX_FRAME_SIZE,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
