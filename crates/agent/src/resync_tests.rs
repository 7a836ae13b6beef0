// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end replay test: a store full of offline entries drains through
//! a mock server that acks every batch.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handlers;
use crate::offline::{OfflineStore, QueueKind};
use crate::paths::DataDir;
use crate::session::remote::RemoteManager;
use crate::settings::Settings;
use crate::state::Agent;
use crate::transport::client::ClientConfig;
use crate::transport::{msg, ControlClient, Envelope};

async fn acking_socket(mut socket: WebSocket, seen: mpsc::UnboundedSender<Envelope>) {
    // Auth handshake.
    let Some(Ok(WsMessage::Text(_auth))) = socket.recv().await else { return };
    let mut ok = Envelope::new(msg::AUTH_RESPONSE);
    ok.success = Some(true);
    let Ok(text) = serde_json::to_string(&ok) else { return };
    if socket.send(WsMessage::Text(text.into())).await.is_err() {
        return;
    }

    while let Some(Ok(frame)) = socket.recv().await {
        let WsMessage::Text(text) = frame else { continue };
        let Ok(env) = serde_json::from_str::<Envelope>(&text) else { continue };
        let is_bulk = env.msg_type == msg::BULK_METRICS;
        let rid = env.request_id.clone();
        let _ = seen.send(env);
        if is_bulk {
            if let Some(rid) = rid {
                let mut ack = Envelope::new(msg::BULK_METRICS_ACK).with_request_id(rid);
                ack.success = Some(true);
                let Ok(text) = serde_json::to_string(&ack) else { continue };
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn mock_acking_server() -> anyhow::Result<(String, mpsc::UnboundedReceiver<Envelope>)> {
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/ws/agent",
            any(move |ws: WebSocketUpgrade| {
                let seen = seen_tx.clone();
                async move { ws.on_upgrade(move |socket| acking_socket(socket, seen)) }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), seen_rx))
}

#[tokio::test]
async fn offline_entries_replay_in_order_and_drain() -> anyhow::Result<()> {
    let (url, mut seen) = mock_acking_server().await?;
    let dir = tempfile::tempdir()?;
    let dirs = DataDir::from_root(dir.path());

    let offline = Arc::new(OfflineStore::open(dirs.offline_store())?);
    for i in 0..250 {
        offline.enqueue(QueueKind::Metrics, None, json!({ "seq": i }))?;
    }
    offline.enqueue(QueueKind::Event, Some("info".into()), json!({"kind": "boot"}))?;

    let shutdown = CancellationToken::new();
    let client = ControlClient::new(ClientConfig {
        server_url: url,
        agent_id: "agent-1".into(),
        enrollment_token: "T".into(),
        device_info: json!({}),
        health_poll: Duration::from_millis(50),
    });
    let agent = Agent::new(
        dirs,
        [0u8; 32],
        Settings::bootstrap("http://unused/".into(), "T".into()),
        Arc::clone(&client),
        Arc::clone(&offline),
        Arc::new(RemoteManager::headless()),
        shutdown.clone(),
    );
    client.install_dispatcher(Arc::new(handlers::build(Arc::clone(&agent))));

    tokio::spawn(crate::resync::resync_loop(Arc::clone(&agent)));
    tokio::spawn(Arc::clone(&client).run(shutdown.clone()));

    // Wait for the store to drain.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let pending = offline.pending_count(QueueKind::Metrics)
            + offline.pending_count(QueueKind::Event);
        if pending == 0 {
            break;
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "replay did not drain, {pending} still pending"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    shutdown.cancel();

    // The server must have seen sync_request first, then batches whose
    // local IDs never decrease.
    let mut sync_request_seen = false;
    let mut last_id: u64 = 0;
    let mut replayed: u64 = 0;
    while let Ok(env) = seen.try_recv() {
        match env.msg_type.as_str() {
            msg::SYNC_REQUEST => {
                assert!(!sync_request_seen, "sync_request sent twice");
                sync_request_seen = true;
                let data = env.data.unwrap_or_default();
                assert_eq!(data["pendingMetrics"], 250);
                assert_eq!(data["pendingEvents"], 1);
                assert_eq!(replayed, 0, "batches before sync_request");
            }
            msg::BULK_METRICS => {
                assert!(sync_request_seen, "batch before sync_request");
                let data = env.data.unwrap_or_default();
                let entries = data["entries"].as_array().cloned().unwrap_or_default();
                assert!(entries.len() <= 100);
                for entry in entries {
                    let id = entry["localId"].as_u64().unwrap_or(0);
                    assert!(id > last_id, "local IDs must be strictly increasing");
                    last_id = id;
                    replayed += 1;
                }
            }
            _ => {}
        }
    }
    assert!(sync_request_seen);
    assert_eq!(replayed, 251);
    Ok(())
}
