//! The bridge: a cloneable handle in front of a single worker task.
//!
//! The worker owns the batch queue, the correlation table and the connection
//! state, and is the only place any of them is mutated. Everything else
//! (callers, timers, socket I/O tasks, fallback calls) talks to it over
//! channels, so a flush (swap queue, assign ids, insert, then send) is never
//! interleaved with another bridge operation.

use crate::backoff::ReconnectBackoff;
use crate::batch::{BatchQueue, QueuedCall, Responder};
use crate::config::{BridgeConfig, BridgeDefaults};
use crate::correlation::{CorrelationTable, PendingRequest};
use crate::fallback::{FallbackTransport, HttpFallback};
use crate::protocol::{decode_inbound, encode_batch, OutboundRequest, RequestId, ResponseEntry};
use crate::stats::BridgeStats;
use crate::transport::{self, ConnectionState, ConnectionStatus, LinkEvent, PrimaryLink};
use crate::{BridgeError, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running bridge.
///
/// Cheap to clone; every clone talks to the same worker. The worker drains and
/// stops on [`Bridge::shutdown`] or once every handle has been dropped.
#[derive(Clone)]
pub struct Bridge {
    commands: mpsc::UnboundedSender<Command>,
    fallback: Arc<dyn FallbackTransport>,
    stats: watch::Receiver<BridgeStats>,
    connection: watch::Receiver<ConnectionState>,
}

/// Future returned by [`Bridge::request`].
///
/// Resolves with the backend's data or a [`BridgeError`]. If the bridge goes
/// away before completing the call, resolves with [`BridgeError::Shutdown`].
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Value>>,
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(BridgeError::Shutdown)))
    }
}

enum Command {
    Request(QueuedCall),
    Shutdown(oneshot::Sender<()>),
}

/// Internal events produced by timers and helper tasks.
enum WorkerEvent {
    FlushDue,
    Deadline(RequestId),
    ReconnectDue,
    ConnectFinished {
        generation: u64,
        result: Result<TcpStream>,
    },
    FallbackFinished {
        call: u64,
        outcome: Result<Value>,
        elapsed: Duration,
    },
}

/// A call being served by the fallback transport. The worker keeps the
/// responder so shutdown can reject it while the HTTP call is still running.
struct FallbackCall {
    responder: Responder,
    task: JoinHandle<()>,
}

impl Bridge {
    /// Start a bridge with the HTTP fallback transport described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let fallback = HttpFallback::new(
            &config.fallback_base_url,
            &config.health_path,
            config.fallback_timeout,
        )?;
        Self::with_fallback(config, Arc::new(fallback))
    }

    /// Start a bridge with a caller-supplied fallback transport.
    pub fn with_fallback(config: BridgeConfig, fallback: Arc<dyn FallbackTransport>) -> Result<Self> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(BridgeStats::default());
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::default());

        info!(
            "Starting bridge (primary {}, fallback {})",
            if config.primary_enabled {
                config.primary_addr.to_string()
            } else {
                "disabled".to_string()
            },
            config.fallback_base_url
        );

        let worker = BridgeWorker {
            backoff: config.backoff.clone(),
            config,
            fallback: fallback.clone(),
            queue: BatchQueue::default(),
            table: CorrelationTable::default(),
            connection: ConnectionState::default(),
            connected_at: None,
            link: None,
            generation: 0,
            flush_timer: None,
            reconnect_timer: None,
            fallback_calls: HashMap::new(),
            next_fallback_call: 0,
            stats: stats_tx,
            connection_tx,
            events: events_tx,
            link_events: link_tx,
        };
        tokio::spawn(worker.run(commands_rx, events_rx, link_rx));

        Ok(Self {
            commands: commands_tx,
            fallback,
            stats: stats_rx,
            connection: connection_rx,
        })
    }

    /// Issue a call to `endpoint`. Never blocks; the returned future completes
    /// with the backend's data or a rejection.
    pub fn request(&self, endpoint: impl Into<String>, payload: Value) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let call = QueuedCall {
            endpoint: endpoint.into(),
            payload,
            responder: tx,
        };
        // If the worker is gone the call is dropped here, which completes the
        // future with `Shutdown`.
        let _ = self.commands.send(Command::Request(call));
        PendingResponse { rx }
    }

    /// Probe backend health over the fallback transport.
    pub async fn check_health(&self) -> bool {
        self.fallback.check_health().await
    }

    /// Snapshot of the request statistics.
    pub fn stats(&self) -> BridgeStats {
        self.stats.borrow().clone()
    }

    /// Snapshot of the primary connection state.
    pub fn connection(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    /// Receiver for waiting on connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Stop the worker, rejecting every queued and pending call with `Shutdown`.
    ///
    /// Idempotent: calling it on an already stopped bridge returns immediately.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

struct BridgeWorker {
    config: BridgeConfig,
    backoff: ReconnectBackoff,
    fallback: Arc<dyn FallbackTransport>,
    queue: BatchQueue,
    table: CorrelationTable,
    connection: ConnectionState,
    connected_at: Option<Instant>,
    link: Option<PrimaryLink>,
    generation: u64,
    flush_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    fallback_calls: HashMap<u64, FallbackCall>,
    next_fallback_call: u64,
    stats: watch::Sender<BridgeStats>,
    connection_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    link_events: transport::LinkEventSender,
}

impl BridgeWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        mut link_events: mpsc::UnboundedReceiver<(u64, LinkEvent)>,
    ) {
        if self.config.primary_enabled {
            self.connect();
        }

        let start = tokio::time::Instant::now();
        let mut sweep = tokio::time::interval_at(
            start + self.config.sweep_interval,
            self.config.sweep_interval,
        );
        let mut summary = tokio::time::interval_at(
            start + self.config.summary_interval,
            self.config.summary_interval,
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Request(call)) => self.enqueue(call),
                    Some(Command::Shutdown(ack)) => {
                        self.drain();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        debug!("All bridge handles dropped");
                        self.drain();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                Some((generation, event)) = link_events.recv() => self.handle_link_event(generation, event),
                _ = sweep.tick() => self.sweep_stale(),
                _ = summary.tick() => self.log_summary(),
            }
        }

        info!("Bridge stopped: {}", *self.stats.borrow());
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::FlushDue => {
                self.flush_timer = None;
                self.flush();
            }
            WorkerEvent::Deadline(id) => self.expire(id),
            WorkerEvent::ReconnectDue => {
                self.reconnect_timer = None;
                self.connect();
            }
            WorkerEvent::ConnectFinished { generation, result } => {
                self.on_connect_finished(generation, result)
            }
            WorkerEvent::FallbackFinished {
                call,
                outcome,
                elapsed,
            } => self.on_fallback_finished(call, outcome, elapsed),
        }
    }

    /// Send `event` back to the worker after `delay`.
    fn schedule(&self, delay: Duration, event: WorkerEvent) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        })
    }

    // Batch scheduler

    fn enqueue(&mut self, call: QueuedCall) {
        self.stats.send_modify(|s| s.total_requests += 1);
        if self.queue.push(call) {
            self.flush_timer = Some(self.schedule(self.config.batch_window, WorkerEvent::FlushDue));
        }
    }

    fn flush(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }

        let calls = self.queue.take();
        if calls.is_empty() {
            return;
        }

        if self.connection.is_connected() && self.link.is_some() {
            self.send_batch(calls);
        } else {
            debug!("Primary transport unavailable, sending {} call(s) via fallback", calls.len());
            for call in calls {
                self.dispatch_fallback(call);
            }
        }
    }

    fn send_batch(&mut self, calls: Vec<QueuedCall>) {
        let mut requests = Vec::with_capacity(calls.len());
        let mut responders = Vec::with_capacity(calls.len());
        for call in calls {
            requests.push(OutboundRequest {
                id: RequestId::generate(),
                endpoint: call.endpoint,
                data: call.payload,
            });
            responders.push(call.responder);
        }
        self.send_frame(requests, responders);
    }

    /// Encode and send one frame. A frame over the size limit is split in
    /// half until each part fits; a single call that cannot fit is rejected
    /// on its own and the link stays up.
    fn send_frame(&mut self, mut requests: Vec<OutboundRequest>, mut responders: Vec<Responder>) {
        let count = requests.len();
        let payload = match encode_batch(&requests) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode batch of {}: {}", count, e);
                let message = e.to_string();
                for responder in responders {
                    let _ = responder.send(Err(BridgeError::Json {
                        message: message.clone(),
                        source: None,
                    }));
                }
                self.stats.send_modify(|s| s.failed_requests += count as u64);
                return;
            }
        };

        if payload.len() > BridgeDefaults::MAX_FRAME_SIZE {
            if count > 1 {
                debug!(
                    "Batch of {} is {} bytes, splitting to fit the frame limit",
                    count,
                    payload.len()
                );
                let tail_requests = requests.split_off(count / 2);
                let tail_responders = responders.split_off(count / 2);
                self.send_frame(requests, responders);
                self.send_frame(tail_requests, tail_responders);
            } else {
                let endpoint = &requests[0].endpoint;
                warn!(
                    "Request to {} is {} bytes, over the {} byte frame limit",
                    endpoint,
                    payload.len(),
                    BridgeDefaults::MAX_FRAME_SIZE
                );
                for responder in responders {
                    let _ = responder.send(Err(BridgeError::FrameTooLarge {
                        size: payload.len(),
                        max: BridgeDefaults::MAX_FRAME_SIZE,
                    }));
                }
                self.stats.send_modify(|s| s.failed_requests += 1);
            }
            return;
        }

        // Register every call before the frame leaves, so a fast response can
        // never arrive ahead of its table entry.
        for (request, responder) in requests.into_iter().zip(responders) {
            let deadline = self.schedule(
                self.config.request_timeout,
                WorkerEvent::Deadline(request.id.clone()),
            );
            self.table.insert(
                request.id,
                PendingRequest::new(request.endpoint, responder, Some(deadline)),
            );
        }

        let sent = self.link.as_ref().map(|link| link.send(payload)).unwrap_or(false);
        if sent {
            debug!("Sent batch of {} request(s)", count);
        } else {
            // Already registered; these calls resolve by response or deadline.
            warn!("Primary writer unavailable; batch of {} left to time out", count);
        }
        self.stats.send_modify(|s| s.batched_requests += count as u64);
    }

    fn dispatch_fallback(&mut self, call: QueuedCall) {
        self.stats.send_modify(|s| s.fallback_requests += 1);

        let id = self.next_fallback_call;
        self.next_fallback_call += 1;

        let QueuedCall {
            endpoint,
            payload,
            responder,
        } = call;
        let fallback = self.fallback.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = fallback.call(&endpoint, payload).await;
            if let Err(e) = &outcome {
                warn!("Fallback call to {} failed: {}", endpoint, e);
            }
            let _ = events.send(WorkerEvent::FallbackFinished {
                call: id,
                outcome,
                elapsed: started.elapsed(),
            });
        });
        self.fallback_calls.insert(id, FallbackCall { responder, task });
    }

    fn on_fallback_finished(&mut self, call: u64, outcome: Result<Value>, elapsed: Duration) {
        let Some(call) = self.fallback_calls.remove(&call) else {
            return;
        };

        self.stats.send_modify(|s| {
            if outcome.is_err() {
                s.failed_requests += 1;
            } else {
                s.record_response(elapsed);
            }
        });
        let _ = call.responder.send(outcome);
    }

    // Correlation and response dispatch

    fn handle_link_event(&mut self, generation: u64, event: LinkEvent) {
        let current = self.link.as_ref().map(PrimaryLink::generation);
        if current != Some(generation) {
            debug!("Ignoring event from stale connection generation {}", generation);
            return;
        }

        match event {
            LinkEvent::Frame(payload) => match decode_inbound(&payload) {
                Ok(message) => {
                    for entry in message.into_entries() {
                        self.resolve(entry);
                    }
                }
                Err(e) => warn!("Dropping malformed frame ({} bytes): {}", payload.len(), e),
            },
            LinkEvent::Closed(reason) => self.on_disconnect(&reason),
        }
    }

    fn resolve(&mut self, entry: ResponseEntry) {
        let Some(request) = self.table.remove(&entry.id) else {
            debug!("No pending request for response {}, dropping", entry.id);
            return;
        };

        let elapsed = request.created_at.elapsed();
        let endpoint = request.endpoint.clone();
        match entry.into_outcome() {
            Ok(data) => {
                self.stats.send_modify(|s| s.record_response(elapsed));
                request.complete(Ok(data));
            }
            Err(message) => {
                self.stats.send_modify(|s| {
                    s.record_response(elapsed);
                    s.failed_requests += 1;
                });
                request.complete(Err(BridgeError::Backend { endpoint, message }));
            }
        }
    }

    fn expire(&mut self, id: RequestId) {
        if let Some(request) = self.table.remove(&id) {
            let endpoint = request.endpoint.clone();
            warn!("Request {} to {} timed out", id, endpoint);
            self.stats.send_modify(|s| s.failed_requests += 1);
            request.complete(Err(BridgeError::Timeout {
                endpoint,
                after: self.config.request_timeout,
            }));
        }
    }

    fn sweep_stale(&mut self) {
        let now = Instant::now();
        let stale = self.table.drain_stale(now, self.config.stale_threshold);
        if stale.is_empty() {
            return;
        }

        warn!("Reclaiming {} stale request(s)", stale.len());
        self.stats.send_modify(|s| s.failed_requests += stale.len() as u64);
        for (id, request) in stale {
            let age = now.saturating_duration_since(request.created_at);
            let endpoint = request.endpoint.clone();
            debug!("Stale request {} to {} ({:?} old)", id, endpoint, age);
            request.complete(Err(BridgeError::StaleCleanup { endpoint, age }));
        }
    }

    // Transport manager

    fn connect(&mut self) {
        if !self.config.primary_enabled || self.connection.status != ConnectionStatus::Disconnected {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        self.set_status(ConnectionStatus::Connecting);

        let addr = self.config.primary_addr;
        let timeout = self.config.connect_timeout;
        let events = self.events.clone();
        debug!("Connecting to primary transport at {} (generation {})", addr, generation);
        tokio::spawn(async move {
            let result = transport::open(addr, timeout).await;
            let _ = events.send(WorkerEvent::ConnectFinished { generation, result });
        });
    }

    fn on_connect_finished(&mut self, generation: u64, result: Result<TcpStream>) {
        if generation != self.generation || self.connection.status != ConnectionStatus::Connecting {
            return;
        }

        match result {
            Ok(stream) => {
                info!("Primary transport connected to {}", self.config.primary_addr);
                self.link = Some(PrimaryLink::spawn(stream, generation, self.link_events.clone()));
                self.connected_at = Some(Instant::now());
                self.set_status(ConnectionStatus::Connected);
                // Anything that queued up while disconnected goes out now.
                self.flush();
            }
            Err(e) => {
                warn!("{}", e);
                self.set_status(ConnectionStatus::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn on_disconnect(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        warn!("Primary transport disconnected: {}", reason);

        let healthy = self
            .connected_at
            .take()
            .is_some_and(|at| at.elapsed() >= self.config.healthy_period);
        if healthy {
            self.connection.reconnect_attempts = 0;
        }

        self.set_status(ConnectionStatus::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() || !self.config.primary_enabled {
            return;
        }

        let delay = self.backoff.delay(self.connection.reconnect_attempts);
        self.connection.reconnect_attempts = self.connection.reconnect_attempts.saturating_add(1);
        self.connection.last_reconnect_at = Some(Utc::now());
        self.connection.last_backoff = Some(delay);
        self.stats.send_modify(|s| s.reconnects += 1);
        self.publish_connection();

        info!(
            "Reconnecting in {:?} (attempt {})",
            delay, self.connection.reconnect_attempts
        );
        self.reconnect_timer = Some(self.schedule(delay, WorkerEvent::ReconnectDue));
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.connection.status = status;
        self.publish_connection();
    }

    fn publish_connection(&self) {
        self.connection_tx.send_replace(self.connection.clone());
    }

    // Lifecycle

    fn log_summary(&self) {
        info!(
            "Bridge summary: {} pending={} connection={}",
            *self.stats.borrow(),
            self.table.len(),
            self.connection.status
        );
    }

    fn drain(&mut self) {
        for timer in [self.flush_timer.take(), self.reconnect_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.generation += 1;
        self.connected_at = None;
        self.set_status(ConnectionStatus::Disconnected);

        let queued = self.queue.take();
        let queued_count = queued.len();
        for call in queued {
            let _ = call.responder.send(Err(BridgeError::Shutdown));
        }
        let pending_count = self.table.reject_all();
        let fallback_count = self.fallback_calls.len();
        for (_, call) in self.fallback_calls.drain() {
            call.task.abort();
            let _ = call.responder.send(Err(BridgeError::Shutdown));
        }

        info!(
            "Bridge shut down: rejected {} queued, {} pending and {} fallback call(s)",
            queued_count, pending_count, fallback_count
        );
    }
}
