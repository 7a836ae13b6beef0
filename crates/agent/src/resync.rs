// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline replay after reconnect.
//!
//! When the link authenticates and the offline store holds pending
//! entries, the agent announces the outage with one `sync_request`, then
//! replays in local-ID order, one `bulk_metrics` batch at a time. A batch
//! is marked synced only after its ack; a missing ack aborts the replay
//! and the batch goes out again on the next reconnect (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use crate::offline::QueueKind;
use crate::state::Agent;
use crate::transport::{msg, Envelope, LinkEvent};

/// How long to wait for a batch ack before giving up on this replay.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Listen for authentication events and drive replay.
pub async fn resync_loop(agent: Arc<Agent>) {
    let Some(mut acks) = agent.take_sync_acks() else {
        tracing::error!("resync loop started twice");
        return;
    };
    let mut events = agent.client.subscribe();

    // The link may have authenticated before this loop subscribed.
    if agent.client.is_authenticated() {
        if let Err(e) = replay(&agent, &mut acks).await {
            tracing::warn!(err = %e, "offline replay interrupted");
        }
    }

    loop {
        let event = tokio::select! {
            _ = agent.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(_) => continue, // lagged; the next event still arrives
            },
        };

        if event != LinkEvent::Authenticated {
            continue;
        }
        if let Err(e) = replay(&agent, &mut acks).await {
            tracing::warn!(err = %e, "offline replay interrupted");
        }
    }
}

async fn replay(agent: &Arc<Agent>, acks: &mut mpsc::Receiver<String>) -> anyhow::Result<()> {
    let pending_metrics = agent.offline.pending_count(QueueKind::Metrics);
    let pending_events = agent.offline.pending_count(QueueKind::Event);
    if pending_metrics + pending_events == 0 {
        return Ok(());
    }

    let offline_secs = agent
        .offline
        .oldest_pending_at()
        .map(|t| (chrono::Utc::now() - t).num_seconds().max(0))
        .unwrap_or(0);

    tracing::info!(pending_metrics, pending_events, offline_secs, "starting offline replay");
    agent.client.send(Envelope::new(msg::SYNC_REQUEST).with_data(json!({
        "offlineDurationSecs": offline_secs,
        "pendingMetrics": pending_metrics,
        "pendingEvents": pending_events,
    })))?;

    // Drain stale acks from an interrupted earlier replay.
    while acks.try_recv().is_ok() {}

    let mut batch_no: u64 = 0;
    loop {
        let batch = agent.offline.pending_batch();
        if batch.is_empty() {
            break;
        }
        batch_no += 1;
        let request_id = format!("sync-{batch_no}");
        let ids: Vec<u64> = batch.iter().map(|e| e.local_id).collect();

        let entries: Vec<serde_json::Value> = batch
            .iter()
            .map(|e| {
                json!({
                    "localId": e.local_id,
                    "kind": e.kind,
                    "severity": e.severity,
                    "enqueuedAt": e.enqueued_at.to_rfc3339(),
                    "payload": e.payload,
                })
            })
            .collect();

        agent.client.send(
            Envelope::new(msg::BULK_METRICS)
                .with_request_id(&request_id)
                .with_data(json!({ "entries": entries })),
        )?;

        // Only the matching ack advances the batch.
        loop {
            let acked = tokio::select! {
                _ = agent.shutdown.cancelled() => anyhow::bail!("shutdown during replay"),
                acked = tokio::time::timeout(ACK_TIMEOUT, acks.recv()) => match acked {
                    Ok(Some(acked)) => acked,
                    Ok(None) => anyhow::bail!("ack channel closed"),
                    Err(_) => anyhow::bail!("no ack for batch {request_id}"),
                },
            };
            if acked == request_id {
                break;
            }
            tracing::debug!(expected = %request_id, got = %acked, "out-of-order ack skipped");
        }

        agent.offline.mark_synced(&ids)?;
    }

    // Replay finished; drop acked rows so the file stays small.
    agent.offline.compact()?;
    tracing::info!(batches = batch_no, "offline replay complete");
    Ok(())
}

#[cfg(test)]
#[path = "resync_tests.rs"]
mod tests;
