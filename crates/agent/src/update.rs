// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side update plumbing.
//!
//! The agent never swaps its own binary. It stages the request file for
//! the watchdog, pokes the watchdog's control socket, and on the next
//! boot reports the outcome the watchdog recorded.

use std::sync::Arc;

use serde_json::json;

use crate::ipc::{self, PipeCommand, UpdateRequest};
use crate::state::Agent;
use crate::transport::{msg, Envelope};

/// Validate and write `update-request.json`, then signal the watchdog.
///
/// At most one request may be pending; a second is refused until the
/// watchdog consumes the first.
pub async fn stage_update(agent: &Agent, request: UpdateRequest) -> anyhow::Result<()> {
    let request_path = agent.dirs.update_request();
    anyhow::ensure!(
        !request_path.exists(),
        "an update to {} is already pending",
        ipc::read_json::<UpdateRequest>(&request_path)?
            .map(|r| r.version)
            .unwrap_or_else(|| "unknown".to_owned())
    );

    let staged = std::path::Path::new(&request.staged_path);
    let meta = std::fs::metadata(staged)
        .map_err(|e| anyhow::anyhow!("staged binary {}: {e}", staged.display()))?;
    anyhow::ensure!(meta.len() > 0, "staged binary is empty");

    ipc::write_json(&request_path, &request)?;
    tracing::info!(version = %request.version, "update request staged");

    // Best-effort nudge; the watchdog also polls for the file.
    #[cfg(unix)]
    {
        let watchdog_socket = agent.dirs.root().join("watchdog.sock");
        if let Err(e) = ipc::pipe_send(&watchdog_socket, PipeCommand::UpdateReady).await {
            tracing::debug!(err = %e, "watchdog socket nudge failed, poll will pick it up");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = PipeCommand::UpdateReady;
    }
    Ok(())
}

/// On boot, publish the previous update's terminal outcome once the
/// channel authenticates, then clear the status file.
pub async fn report_boot_status(agent: Arc<Agent>) {
    let status_path = agent.dirs.update_status();
    let status = match ipc::read_json::<ipc::UpdateStatus>(&status_path) {
        Ok(Some(status)) if status.state.is_terminal() => status,
        Ok(_) => return,
        Err(e) => {
            tracing::warn!(err = %e, "unreadable update status");
            return;
        }
    };

    // Wait for the first authenticated window (or give up at shutdown).
    let mut events = agent.client.subscribe();
    loop {
        if agent.client.is_authenticated() {
            break;
        }
        tokio::select! {
            _ = agent.shutdown.cancelled() => return,
            event = events.recv() => {
                if matches!(event, Ok(crate::transport::LinkEvent::Authenticated)) {
                    break;
                }
            }
        }
    }

    let frame = Envelope::new(msg::UPDATE_STATUS).with_data(json!({
        "state": status.state.as_str(),
        "version": status.version,
        "startedAt": status.started_at.to_rfc3339(),
        "completedAt": status.completed_at.map(|t| t.to_rfc3339()),
        "rolledBack": status.rolled_back,
        "error": status.error,
    }));
    if agent.client.send(frame).is_ok() {
        tracing::info!(state = %status.state.as_str(), "previous update outcome reported");
        let _ = std::fs::remove_file(&status_path);
    }
}

#[cfg(test)]
#[path = "update_tests.rs"]
mod tests;
