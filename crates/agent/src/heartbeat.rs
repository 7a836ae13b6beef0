// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat loop: the server-facing heartbeat frame and the on-disk
//! beacon the watchdog reads for liveness.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::ipc::{self, AgentInfo};
use crate::state::Agent;
use crate::transport::{msg, Envelope};

/// Write the beacon file for the watchdog. Freshness is the signal; the
/// watchdog treats a stale mtime as evidence of a hung agent.
pub fn write_beacon(agent: &Agent, agent_id: &str) -> anyhow::Result<()> {
    let info = AgentInfo {
        version: agent.version.clone(),
        pid: std::process::id(),
        started_at: agent.started_at,
        agent_id: agent_id.to_owned(),
    };
    ipc::write_json(&agent.dirs.agent_info(), &info)
}

/// Tick on the configured heartbeat cadence: beacon first (the watchdog
/// must see liveness even while the server is down), then the wire frame.
pub async fn heartbeat_loop(agent: Arc<Agent>) {
    loop {
        let (interval_secs, agent_id) = {
            let settings = agent.settings.read().await;
            (settings.heartbeat_interval.max(1), settings.agent_id.clone())
        };

        tokio::select! {
            _ = agent.shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
        }

        if let Err(e) = write_beacon(&agent, &agent_id) {
            tracing::warn!(err = %e, "beacon write failed");
        }

        if agent.client.is_authenticated() {
            let frame = Envelope::new(msg::HEARTBEAT).with_data(json!({
                "agentId": agent_id,
                "version": agent.version,
                "uptimeSecs": agent.uptime_secs(),
            }));
            if let Err(e) = agent.client.send(frame) {
                tracing::debug!(err = %e, "heartbeat frame not sent");
            }
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
