// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The self-healing control-plane session.
//!
//! The client alternates two phases and never busy-loops: it polls the
//! server's cheap HTTP health endpoint until a 200 is seen, then attempts
//! the WebSocket upgrade immediately. Reattach latency after an outage is
//! therefore bounded by the probe interval, not an exponential backoff —
//! the server is authoritative, so latency-to-reattach wins over
//! politeness.
//!
//! Liveness is enforced twice over: transport pings with a pong deadline,
//! and a read deadline on every frame. Either tripping funnels into the
//! single teardown path (the connection token), which closes the channel
//! exactly once no matter how many failure signals race.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::dispatch::Dispatcher;
use super::envelope::{msg, Envelope, MAX_FRAME_BYTES};
use super::{
    health_url, ws_url, AUTH_TIMEOUT, HEALTH_TIMEOUT, OUTBOUND_CAPACITY, PING_INTERVAL,
    PONG_GRACE,
};

/// Connection-lifecycle notifications for the other agent loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Authenticated,
    Disconnected,
    /// The server rejected authentication; when `needs_enrollment` is set
    /// the device ID is stale and re-enrollment should fire.
    AuthRejected { needs_enrollment: bool },
}

/// Static connection parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub agent_id: String,
    pub enrollment_token: String,
    pub device_info: serde_json::Value,
    /// Health probe cadence; [`super::HEALTH_POLL`] unless overridden.
    pub health_poll: Duration,
}

/// Cheap cloneable send handle given to handlers and loops.
///
/// `send` never blocks: a full queue or a down channel returns an error
/// synchronously and the caller decides (typically: queue offline).
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Envelope>,
    connected: Arc<AtomicBool>,
}

impl Outbound {
    pub fn send(&self, env: Envelope) -> anyhow::Result<()> {
        anyhow::ensure!(self.connected.load(Ordering::Acquire), "control channel not connected");
        self.tx.try_send(env).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow::anyhow!("outbound queue full"),
            mpsc::error::TrySendError::Closed(_) => anyhow::anyhow!("control client stopped"),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

/// The persistent control-channel client.
pub struct ControlClient {
    config: ClientConfig,
    dispatcher: std::sync::OnceLock<Arc<Dispatcher>>,
    outbound_tx: mpsc::Sender<Envelope>,
    outbound_rx: std::sync::Mutex<Option<mpsc::Receiver<Envelope>>>,
    connected: Arc<AtomicBool>,
    authenticated: Arc<AtomicBool>,
    link_tx: broadcast::Sender<LinkEvent>,
    http: reqwest::Client,
}

impl ControlClient {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (link_tx, _) = broadcast::channel(16);
        let http = reqwest::Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            config,
            dispatcher: std::sync::OnceLock::new(),
            outbound_tx,
            outbound_rx: std::sync::Mutex::new(Some(outbound_rx)),
            connected: Arc::new(AtomicBool::new(false)),
            authenticated: Arc::new(AtomicBool::new(false)),
            link_tx,
            http,
        })
    }

    /// Install the populated handler registry. Registration happens once
    /// at startup, before [`ControlClient::run`]; later calls are no-ops.
    pub fn install_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Subscribe to connection-lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.link_tx.subscribe()
    }

    /// Send handle for handlers and background loops.
    pub fn outbound(&self) -> Outbound {
        Outbound { tx: self.outbound_tx.clone(), connected: Arc::clone(&self.connected) }
    }

    /// Queue a frame for the writer. Fails synchronously when the channel
    /// is down or the queue is full.
    pub fn send(&self, env: Envelope) -> anyhow::Result<()> {
        self.outbound().send(env)
    }

    /// Run the reconnect loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .map_err(|_| anyhow::anyhow!("outbound receiver lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow::anyhow!("ControlClient::run called twice"))?;

        let endpoint = ws_url(&self.config.server_url);
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if !self.wait_for_server(&cancel).await {
                return Ok(());
            }

            match tokio_tungstenite::connect_async(endpoint.as_str()).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %endpoint, "control channel connected");
                    self.serve_connection(stream, &mut outbound_rx, &cancel).await;
                    tracing::info!("control channel lost, re-entering health gate");
                }
                Err(e) => {
                    // Health said yes but the upgrade failed; the gate
                    // bounds the retry cadence.
                    tracing::debug!(err = %e, "websocket upgrade failed");
                }
            }
        }
    }

    /// Poll `GET /health` until it answers 200 or `cancel` fires.
    /// Returns false when cancelled.
    async fn wait_for_server(&self, cancel: &CancellationToken) -> bool {
        let url = health_url(&self.config.server_url);
        loop {
            match self.http.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    tracing::trace!(status = %resp.status(), "health probe not ready");
                }
                Err(e) => {
                    tracing::trace!(err = %e, "health probe failed");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.health_poll) => {}
            }
        }
    }

    /// Drive one established connection to its end.
    async fn serve_connection(
        self: &Arc<Self>,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        outbound_rx: &mut mpsc::Receiver<Envelope>,
        cancel: &CancellationToken,
    ) {
        let conn = cancel.child_token();
        let (mut sink, read_stream) = stream.split();

        // Authenticate before anything else leaves the queue.
        let auth = Envelope::new(msg::AUTH).with_data(json!({
            "agentId": self.config.agent_id,
            "token": self.config.enrollment_token,
            "deviceInfo": self.config.device_info,
        }));
        let Ok(text) = serde_json::to_string(&auth) else {
            return;
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }

        self.connected.store(true, Ordering::Release);
        let _ = self.link_tx.send(LinkEvent::Connected);

        // Epoch-ms of the last pong; shared between reader (writes) and
        // the ping tick (reads).
        let last_pong = Arc::new(AtomicU64::new(epoch_ms()));

        let reader = tokio::spawn(read_loop(
            Arc::clone(self),
            read_stream,
            conn.clone(),
            Arc::clone(&last_pong),
        ));

        // Writer + ping run inline; they own the sink.
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Two consecutive unanswered pings close the channel. The first
        // ping goes out on the immediate tick and its successor one
        // interval later, so this deadline trips on the tick after the
        // second grace expires; even a pong landing just after a tick
        // leaves detection inside two ping windows.
        let pong_deadline = (PING_INTERVAL + PONG_GRACE).as_millis() as u64;
        let auth_deadline = tokio::time::Instant::now() + AUTH_TIMEOUT;

        loop {
            tokio::select! {
                _ = conn.cancelled() => break,

                _ = ping.tick() => {
                    // Auth gate: if the server never confirms, give up on
                    // this connection rather than hold a half-open session.
                    if !self.is_authenticated() && tokio::time::Instant::now() > auth_deadline {
                        tracing::warn!("authentication not confirmed in time");
                        break;
                    }
                    let age = epoch_ms().saturating_sub(last_pong.load(Ordering::Acquire));
                    if age >= pong_deadline {
                        tracing::warn!(age_ms = age, "two pongs missed, closing channel");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }

                env = outbound_rx.recv(), if self.is_authenticated() => {
                    let Some(env) = env else { break };
                    let Ok(text) = serde_json::to_string(&env) else { continue };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Single teardown path: first failure cancels, everyone follows.
        conn.cancel();
        let _ = reader.await;
        self.connected.store(false, Ordering::Release);
        self.authenticated.store(false, Ordering::Release);
        // In-flight frames die with the session; a response to a request
        // the server has already written off is worse than silence.
        while outbound_rx.try_recv().is_ok() {}
        let _ = self.link_tx.send(LinkEvent::Disconnected);
    }

    /// Intercept channel-management frames; route the rest to handlers.
    fn handle_frame(self: &Arc<Self>, env: Envelope) {
        match env.msg_type.as_str() {
            msg::AUTH_RESPONSE => {
                if env.success == Some(true) {
                    self.authenticated.store(true, Ordering::Release);
                    tracing::info!("control channel authenticated");
                    let _ = self.link_tx.send(LinkEvent::Authenticated);
                } else {
                    let needs_enrollment = env
                        .data
                        .as_ref()
                        .and_then(|d| d.get("needsEnrollment"))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    tracing::warn!(
                        needs_enrollment,
                        error = env.error.as_deref().unwrap_or("unspecified"),
                        "authentication rejected"
                    );
                    let _ = self.link_tx.send(LinkEvent::AuthRejected { needs_enrollment });
                }
            }
            msg::PING => {
                let mut pong = Envelope::new(msg::PONG);
                pong.request_id = env.request_id;
                let _ = self.outbound().send(pong);
            }
            msg::PONG => {
                // Application-level pong; the transport pong path also
                // refreshes liveness, this one is belt and braces.
            }
            _ => match self.dispatcher.get() {
                Some(dispatcher) => dispatcher.dispatch(self.outbound(), env),
                None => {
                    tracing::warn!(msg_type = %env.msg_type, "frame before dispatcher install");
                }
            },
        }
    }
}

async fn read_loop(
    client: Arc<ControlClient>,
    mut stream: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
    conn: CancellationToken,
    last_pong: Arc<AtomicU64>,
) {
    loop {
        let next = tokio::select! {
            _ = conn.cancelled() => break,
            next = tokio::time::timeout(super::READ_DEADLINE, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::warn!("read deadline expired, closing channel");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(err = %e, "socket read error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Pong(_) => {
                last_pong.store(epoch_ms(), Ordering::Release);
            }
            Message::Ping(_) => {
                // tungstenite queues the reply pong itself.
            }
            Message::Close(_) => break,
            Message::Text(text) => {
                if text.len() > MAX_FRAME_BYTES {
                    tracing::warn!(len = text.len(), "oversize frame, protocol violation");
                    break;
                }
                match serde_json::from_str::<Envelope>(&text) {
                    Ok(env) => client.handle_frame(env),
                    Err(e) => {
                        // Malformed frames are logged and skipped; only
                        // oversize frames kill the channel.
                        tracing::warn!(err = %e, "malformed frame skipped");
                    }
                }
            }
            _ => {}
        }
    }
    conn.cancel();
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Build a detached [`Outbound`] whose receiver the test drains directly.
#[cfg(test)]
pub(crate) fn test_outbound(capacity: usize) -> (Outbound, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Outbound { tx, connected: Arc::new(AtomicBool::new(true)) }, rx)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
