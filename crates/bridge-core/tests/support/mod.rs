//! In-process mock backend: a framed socket endpoint plus an HTTP fallback.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backend_bridge::protocol::{read_frame, write_frame};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Mock of the backend's batch-capable socket endpoint.
///
/// Every decoded inbound frame is forwarded to `next_frame`; replies go out on
/// the most recently accepted connection.
pub struct MockSocket {
    pub addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Value>,
    connection: Arc<tokio::sync::Mutex<Option<Connection>>>,
    accept_task: Option<JoinHandle<()>>,
}

struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl MockSocket {
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap()).await
    }

    /// Listen on a specific address, e.g. to bring a backend back on the
    /// port a bridge is already reconnecting to.
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let connection: Arc<tokio::sync::Mutex<Option<Connection>>> = Arc::default();

        let current = connection.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (mut read_half, writer) = stream.into_split();
                let frames_tx = frames_tx.clone();
                // Hold the lock until the connection is registered so a reply
                // to its first frame always finds it.
                let mut slot = current.lock().await;
                let reader = tokio::spawn(async move {
                    while let Ok(Some(payload)) = read_frame(&mut read_half).await {
                        let value: Value = serde_json::from_slice(&payload).unwrap();
                        if frames_tx.send(value).is_err() {
                            break;
                        }
                    }
                });
                if let Some(previous) = slot.replace(Connection { writer, reader }) {
                    previous.reader.abort();
                }
            }
        });

        Self {
            addr,
            frames,
            connection,
            accept_task: Some(accept_task),
        }
    }

    /// Wait for the next frame the bridge sends, failing the test after 5s.
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("frame channel closed")
    }

    /// Return a frame if one arrives within `wait`.
    pub async fn frame_within(&mut self, wait: Duration) -> Option<Value> {
        tokio::time::timeout(wait, self.frames.recv()).await.ok().flatten()
    }

    pub async fn reply(&self, value: Value) {
        self.reply_raw(value.to_string().as_bytes()).await;
    }

    pub async fn reply_raw(&self, payload: &[u8]) {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().expect("no live connection");
        write_frame(&mut connection.writer, payload).await.unwrap();
    }

    /// Wait until a connection from the bridge has been accepted.
    pub async fn accepted(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connection.lock().await.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no connection accepted");
    }

    /// Close the live connection from the backend side.
    pub async fn drop_connection(&self) {
        self.accepted().await;
        if let Some(connection) = self.connection.lock().await.take() {
            connection.reader.abort();
            drop(connection.writer);
        }
    }

    /// Stop accepting connections; further connects are refused.
    pub fn stop_accepting(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.stop_accepting();
    }
}

/// Ids of the requests inside an outbound batch frame, in wire order.
pub fn batch_ids(frame: &Value) -> Vec<String> {
    assert_eq!(frame["type"], "batch", "expected a batch frame: {}", frame);
    frame["requests"]
        .as_array()
        .expect("requests array")
        .iter()
        .map(|r| r["id"].as_str().expect("string id").to_string())
        .collect()
}

/// Mock of the backend's synchronous HTTP endpoints.
pub struct MockHttp {
    pub base_url: String,
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
    server: JoinHandle<()>,
}

#[derive(Clone)]
struct HttpState {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    healthy: bool,
}

async fn health(State(state): State<HttpState>) -> (StatusCode, Json<Value>) {
    if state.healthy {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "starting"})),
        )
    }
}

async fn call(
    State(state): State<HttpState>,
    Path(endpoint): Path<String>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state
        .calls
        .lock()
        .unwrap()
        .push((endpoint.clone(), payload.clone()));

    if endpoint == "fail" {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "boom"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"via": "http", "endpoint": endpoint, "echo": payload})),
    )
}

impl MockHttp {
    pub async fn start() -> Self {
        Self::start_with_health(true).await
    }

    pub async fn start_with_health(healthy: bool) -> Self {
        let calls: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let state = HttpState {
            calls: calls.clone(),
            healthy,
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/*endpoint", post(call))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            calls,
            server,
        }
    }

    pub fn recorded(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Drop for MockHttp {
    fn drop(&mut self) {
        self.server.abort();
    }
}
