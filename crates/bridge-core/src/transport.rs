//! Primary socket transport: connection state and per-connection I/O tasks.
//!
//! A live connection is split into a reader task and a writer task. Both report
//! back to the bridge worker through a single channel of [`LinkEvent`]s tagged
//! with the connection's generation, so events from a superseded connection
//! can be recognised and ignored.

use crate::protocol::{read_frame, write_frame};
use crate::{BridgeError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle of the primary connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

/// Observable state of the primary transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Consecutive reconnects since the last healthy period.
    pub reconnect_attempts: u32,
    /// When the most recent reconnect was scheduled.
    pub last_reconnect_at: Option<DateTime<Utc>>,
    /// Delay chosen for the most recent reconnect.
    pub last_backoff: Option<Duration>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Event reported by a connection's I/O tasks.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    Frame(Vec<u8>),
    Closed(String),
}

pub(crate) type LinkEventSender = mpsc::UnboundedSender<(u64, LinkEvent)>;

/// Open a TCP connection to the backend's socket endpoint.
pub(crate) async fn open(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| BridgeError::Transport {
            message: format!("connect to {} timed out after {:?}", addr, timeout),
        })?
        .map_err(|e| BridgeError::Transport {
            message: format!("connect to {} failed: {}", addr, e),
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
    }

    Ok(stream)
}

/// A live primary connection owned by the bridge worker.
#[derive(Debug)]
pub(crate) struct PrimaryLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PrimaryLink {
    /// Spawn reader and writer tasks for an established stream.
    pub fn spawn(stream: TcpStream, generation: u64, events: LinkEventSender) -> Self {
        let (mut read_half, mut write_half) = stream.into_split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(payload)) => {
                        if reader_events
                            .send((generation, LinkEvent::Frame(payload)))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = reader_events
                            .send((generation, LinkEvent::Closed("peer closed connection".into())));
                        break;
                    }
                    Err(e) => {
                        let _ = reader_events.send((generation, LinkEvent::Closed(e.to_string())));
                        break;
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, &payload).await {
                    warn!("Primary transport write failed: {}", e);
                    let _ = events.send((generation, LinkEvent::Closed(e.to_string())));
                    break;
                }
            }
        });

        Self {
            generation,
            outbound,
            reader,
            writer,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a frame for the writer. Returns false if the writer has stopped.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.outbound.send(payload).is_ok()
    }

    /// Tear down both I/O tasks; the socket closes when they drop their halves.
    pub fn close(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_state_is_disconnected() {
        let state = ConnectionState::default();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
        assert!(!state.is_connected());
    }

    #[tokio::test]
    async fn test_open_unreachable_is_transport_error() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = open(addr, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(BridgeError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_link_exchanges_frames_and_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let stream = open(addr, Duration::from_secs(1)).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        let link = PrimaryLink::spawn(stream, 7, events_tx);

        assert!(link.send(b"ping".to_vec()));
        let received = read_frame(&mut peer).await.unwrap();
        assert_eq!(received, Some(b"ping".to_vec()));

        write_frame(&mut peer, b"pong").await.unwrap();
        match events_rx.recv().await {
            Some((7, LinkEvent::Frame(payload))) => assert_eq!(payload, b"pong"),
            other => panic!("Expected frame, got: {:?}", other),
        }

        drop(peer);
        match events_rx.recv().await {
            Some((7, LinkEvent::Closed(_))) => {}
            other => panic!("Expected close, got: {:?}", other),
        }

        assert_eq!(link.generation(), 7);
        link.close();
    }
}
