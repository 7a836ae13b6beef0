// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `sentinel-agent` binary against an in-process mock of
//! the RMM server (health endpoint, enrollment endpoint, and the
//! `/ws/agent` control channel).

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Resolve the path to the compiled `sentinel-agent` binary.
pub fn agent_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("sentinel-agent")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Everything the mock server observed from the agent.
#[derive(Clone)]
struct Observed {
    frames: mpsc::UnboundedSender<serde_json::Value>,
    enrolls: mpsc::UnboundedSender<serde_json::Value>,
    to_agent: broadcast::Sender<String>,
    shutdown: CancellationToken,
}

/// An in-process RMM server double.
pub struct MockServer {
    port: u16,
    pub frames: mpsc::UnboundedReceiver<serde_json::Value>,
    pub enrolls: mpsc::UnboundedReceiver<serde_json::Value>,
    to_agent: broadcast::Sender<String>,
    shutdown: CancellationToken,
    serve_task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    /// Start on an ephemeral port.
    pub async fn start() -> anyhow::Result<Self> {
        let port = free_port()?;
        Self::start_on(port).await
    }

    /// Start on a specific port (restart-after-outage tests).
    pub async fn start_on(port: u16) -> anyhow::Result<Self> {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (enrolls_tx, enrolls_rx) = mpsc::unbounded_channel();
        let (to_agent, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let observed = Observed {
            frames: frames_tx,
            enrolls: enrolls_tx,
            to_agent: to_agent.clone(),
            shutdown: shutdown.clone(),
        };

        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/agent/enroll", post(enroll_handler))
            .route("/ws/agent", any(ws_handler))
            .with_state(observed);

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        let serve_task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            port,
            frames: frames_rx,
            enrolls: enrolls_rx,
            to_agent,
            shutdown,
            serve_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Push a raw frame to every connected agent.
    pub fn send_to_agent(&self, frame: serde_json::Value) {
        let _ = self.to_agent.send(frame.to_string());
    }

    /// Kill the listener and every open control channel.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.serve_task.abort();
    }

    /// Await the next frame of the given type, skipping others.
    pub async fn next_frame_of(
        &mut self,
        msg_type: &str,
        timeout: Duration,
    ) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.frames.recv())
                .await
                .map_err(|_| anyhow::anyhow!("no {msg_type} frame within {timeout:?}"))?
                .ok_or_else(|| anyhow::anyhow!("frame stream closed"))?;
            if frame["type"] == msg_type {
                return Ok(frame);
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn enroll_handler(
    State(observed): State<Observed>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let token = headers
        .get("X-Enrollment-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let _ = observed.enrolls.send(serde_json::json!({ "token": token, "body": body }));

    Json(serde_json::json!({
        "success": true,
        "deviceId": "D1",
        "config": { "heartbeatInterval": 30, "metricsInterval": 10 },
    }))
}

async fn ws_handler(State(observed): State<Observed>, ws: WebSocketUpgrade) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| serve_agent(socket, observed))
}

async fn serve_agent(mut socket: WebSocket, observed: Observed) {
    let mut to_agent = observed.to_agent.subscribe();

    loop {
        tokio::select! {
            _ = observed.shutdown.cancelled() => break,

            outbound = to_agent.recv() => {
                let Ok(text) = outbound else { continue };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }

            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };
                let WsMessage::Text(text) = message else { continue };
                let Ok(frame) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                let is_auth = frame["type"] == "auth";
                let _ = observed.frames.send(frame);
                if is_auth {
                    let reply = serde_json::json!({
                        "type": "auth_response",
                        "success": true,
                    });
                    if socket.send(WsMessage::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// A running agent process, killed on drop.
pub struct AgentProcess {
    child: Child,
    data_dir: PathBuf,
    _tmp: Option<tempfile::TempDir>,
}

impl AgentProcess {
    /// Spawn `sentinel-agent --service` in a fresh data directory.
    pub fn start(server_url: &str, token: &str) -> anyhow::Result<Self> {
        let tmp = tempfile::tempdir()?;
        let data_dir = tmp.path().join("data");
        Self::start_in(server_url, token, &data_dir, Some(tmp))
    }

    /// Spawn with a caller-managed data directory (pre-seeded configs).
    pub fn start_with_data_dir(
        server_url: &str,
        token: &str,
        data_dir: &Path,
    ) -> anyhow::Result<Self> {
        Self::start_in(server_url, token, data_dir, None)
    }

    fn start_in(
        server_url: &str,
        token: &str,
        data_dir: &Path,
        tmp: Option<tempfile::TempDir>,
    ) -> anyhow::Result<Self> {
        let binary = agent_binary();
        anyhow::ensure!(
            binary.exists(),
            "sentinel-agent binary not found at {} (build the workspace first)",
            binary.display()
        );

        let child = Command::new(&binary)
            .args([
                "--service",
                "--server",
                server_url,
                "--token",
                token,
                "--log-level",
                "warn",
            ])
            .env("SENTINEL_DATA_DIR", data_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, data_dir: data_dir.to_path_buf(), _tmp: tmp })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn beacon_path(&self) -> PathBuf {
        self.data_dir.join("agent-info.json")
    }

    /// Poll until `check` passes or `timeout` elapses.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        mut check: impl FnMut(&Self) -> bool,
    ) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check(self) {
                return Ok(());
            }
            anyhow::ensure!(
                tokio::time::Instant::now() < deadline,
                "condition not reached within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
