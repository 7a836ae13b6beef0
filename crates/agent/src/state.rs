// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared agent state.
//!
//! The root `Agent` is constructed explicitly by the CLI — there are no
//! process-level singletons. Mutable pieces (the settings record) sit
//! behind an RW-lock; session managers each carry their own lock; the
//! control client keeps its own connection flags.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::offline::{OfflineStore, QueueKind};
use crate::paths::DataDir;
use crate::secrets::MachineKey;
use crate::session::files::TransferManager;
use crate::session::remote::RemoteManager;
use crate::session::terminal::TerminalManager;
use crate::settings::Settings;
use crate::transport::{msg, ControlClient, Envelope};

/// Event severities accepted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Root agent state shared by loops and handlers.
pub struct Agent {
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub dirs: DataDir,
    pub key: MachineKey,
    pub settings: RwLock<Settings>,
    pub client: Arc<ControlClient>,
    pub offline: Arc<OfflineStore>,

    pub terminals: Arc<TerminalManager>,
    pub remotes: Arc<RemoteManager>,
    pub transfers: Arc<TransferManager>,

    /// Root cancellation; every loop selects on it.
    pub shutdown: CancellationToken,
    /// Pinged when `set_metrics_interval` lands so the metrics loop
    /// re-reads its cadence immediately.
    pub metrics_interval_changed: Arc<Notify>,

    /// `bulk_metrics_ack` request IDs, routed from the dispatch handler
    /// to the replay loop.
    pub sync_ack_tx: mpsc::Sender<String>,
    sync_ack_rx: std::sync::Mutex<Option<mpsc::Receiver<String>>>,

    /// Set by `uninstall_agent`; the CLI completes the uninstall after
    /// the run loop drains.
    pub uninstall_requested: std::sync::atomic::AtomicBool,
}

impl Agent {
    pub fn new(
        dirs: DataDir,
        key: MachineKey,
        settings: Settings,
        client: Arc<ControlClient>,
        offline: Arc<OfflineStore>,
        remotes: Arc<RemoteManager>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (sync_ack_tx, sync_ack_rx) = mpsc::channel(16);
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            started_at: chrono::Utc::now(),
            dirs,
            key,
            settings: RwLock::new(settings),
            client,
            offline,
            terminals: Arc::new(TerminalManager::new()),
            remotes,
            transfers: Arc::new(TransferManager::new()),
            shutdown,
            metrics_interval_changed: Arc::new(Notify::new()),
            sync_ack_tx,
            sync_ack_rx: std::sync::Mutex::new(Some(sync_ack_rx)),
            uninstall_requested: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Hand the ack receiver to the replay loop (first caller wins).
    pub fn take_sync_acks(&self) -> Option<mpsc::Receiver<String>> {
        self.sync_ack_rx.lock().ok().and_then(|mut guard| guard.take())
    }

    pub fn uptime_secs(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }

    /// Persist the current settings record (encrypting at rest).
    pub async fn save_settings(&self) -> anyhow::Result<()> {
        let settings = self.settings.read().await;
        settings.save(&self.dirs.config(), &self.key)
    }

    /// Ship a metrics payload, or queue it when the channel is down.
    pub fn send_metrics(&self, payload: serde_json::Value) {
        if self.client.is_authenticated() {
            let frame = Envelope::new(msg::METRICS).with_data(payload.clone());
            if self.client.send(frame).is_ok() {
                return;
            }
        }
        if let Err(e) = self.offline.enqueue(QueueKind::Metrics, None, payload) {
            tracing::warn!(err = %e, "metrics payload dropped");
        }
    }

    /// Ship an event, or queue it when the channel is down.
    pub fn publish_event(&self, severity: Severity, kind: &str, details: serde_json::Value) {
        let payload = json!({
            "severity": severity.as_str(),
            "kind": kind,
            "details": details,
        });
        if self.client.is_authenticated() {
            let frame = Envelope::new(msg::EVENT).with_data(payload.clone());
            if self.client.send(frame).is_ok() {
                return;
            }
        }
        if let Err(e) =
            self.offline.enqueue(QueueKind::Event, Some(severity.as_str().to_owned()), payload)
        {
            tracing::warn!(err = %e, "event dropped");
        }
    }

    /// Close every live sub-session (peer disconnect, shutdown).
    pub async fn close_all_sessions(&self) {
        self.terminals.close_all().await;
        self.remotes.stop_all().await;
        self.transfers.abort_all().await;
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
