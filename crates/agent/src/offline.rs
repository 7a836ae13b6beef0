// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable offline queue for metrics and events.
//!
//! Entries are appended as JSONL while the control channel is down and
//! replayed in local-ID order after reconnect. Mark-synced and eviction
//! rewrite the file atomically (tmp + rename); enqueue is a plain append
//! so the hot path never rewrites.
//!
//! Delivery is at-least-once: an ack lost after the server commit leads
//! to a duplicate on the next replay, which the server deduplicates by
//! (agent ID, local ID, timestamp).

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Retention cap; once reached, oldest synced entries are pruned first,
/// then oldest pending. Producers are never blocked.
pub const RETENTION_CAP: usize = 10_000;

/// Replay batch size.
pub const BATCH_SIZE: usize = 100;

/// What a queued payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Metrics,
    Event,
}

/// Delivery state of a queued entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Synced,
}

/// One queued outbound payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEntry {
    pub local_id: u64,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub kind: QueueKind,
    /// Only meaningful for events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub payload: serde_json::Value,
    pub state: EntryState,
}

struct StoreInner {
    entries: Vec<QueuedEntry>,
    next_id: u64,
}

/// File-backed offline queue.
pub struct OfflineStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
    cap: usize,
}

impl OfflineStore {
    /// Open (or create) the store, restoring the local-ID counter from the
    /// highest ID on disk so IDs stay monotonic across restarts.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        Self::open_with_cap(path, RETENTION_CAP)
    }

    pub fn open_with_cap(path: PathBuf, cap: usize) -> anyhow::Result<Self> {
        let mut entries: Vec<QueuedEntry> = Vec::new();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                // Torn trailing lines from a crash mid-append are dropped.
                entries.extend(
                    contents.lines().filter_map(|l| serde_json::from_str(l).ok()),
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        }
        entries.sort_by_key(|e| e.local_id);
        let next_id = entries.last().map(|e| e.local_id + 1).unwrap_or(1);
        Ok(Self {
            path,
            inner: Mutex::new(StoreInner { entries, next_id }),
            cap,
        })
    }

    /// Queue a payload for later delivery. Returns the assigned local ID.
    pub fn enqueue(
        &self,
        kind: QueueKind,
        severity: Option<String>,
        payload: serde_json::Value,
    ) -> anyhow::Result<u64> {
        let mut inner = self.lock();
        let entry = QueuedEntry {
            local_id: inner.next_id,
            enqueued_at: chrono::Utc::now(),
            kind,
            severity,
            payload,
            state: EntryState::Pending,
        };
        inner.next_id += 1;
        let id = entry.local_id;

        if inner.entries.len() >= self.cap {
            evict_one(&mut inner.entries);
            inner.entries.push(entry);
            self.rewrite(&inner.entries)?;
        } else {
            self.append_line(&entry)?;
            inner.entries.push(entry);
        }
        Ok(id)
    }

    /// Next batch of pending entries in local-ID order (at most
    /// [`BATCH_SIZE`]).
    pub fn pending_batch(&self) -> Vec<QueuedEntry> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Pending)
            .take(BATCH_SIZE)
            .cloned()
            .collect()
    }

    /// Count of pending entries of the given kind.
    pub fn pending_count(&self, kind: QueueKind) -> usize {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Pending && e.kind == kind)
            .count()
    }

    /// Enqueue time of the oldest pending entry, if any. Used to report
    /// the offline window duration in `sync_request`.
    pub fn oldest_pending_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.state == EntryState::Pending)
            .map(|e| e.enqueued_at)
            .min()
    }

    /// Mark entries synced after a server ack and persist the change.
    pub fn mark_synced(&self, ids: &[u64]) -> anyhow::Result<()> {
        let mut inner = self.lock();
        for entry in inner.entries.iter_mut() {
            if ids.contains(&entry.local_id) {
                entry.state = EntryState::Synced;
            }
        }
        self.rewrite(&inner.entries)
    }

    /// Drop synced entries that have been acked; keeps the file small
    /// between retention evictions.
    pub fn compact(&self) -> anyhow::Result<()> {
        let mut inner = self.lock();
        inner.entries.retain(|e| e.state == EntryState::Pending);
        self.rewrite(&inner.entries)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn append_line(&self, entry: &QueuedEntry) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn rewrite(&self, entries: &[QueuedEntry]) -> anyhow::Result<()> {
        let mut out = String::new();
        for entry in entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, out)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Remove the best eviction candidate: oldest synced, else oldest pending.
fn evict_one(entries: &mut Vec<QueuedEntry>) {
    if let Some(pos) = entries.iter().position(|e| e.state == EntryState::Synced) {
        entries.remove(pos);
    } else if !entries.is_empty() {
        entries.remove(0);
    }
}

#[cfg(test)]
#[path = "offline_tests.rs"]
mod tests;
