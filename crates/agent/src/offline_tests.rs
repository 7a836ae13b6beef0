// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::{EntryState, OfflineStore, QueueKind};

fn store(dir: &tempfile::TempDir) -> anyhow::Result<OfflineStore> {
    OfflineStore::open(dir.path().join("offline.jsonl"))
}

#[test]
fn local_ids_are_monotonic_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let s = store(&dir)?;
        assert_eq!(s.enqueue(QueueKind::Metrics, None, json!({"cpu": 1}))?, 1);
        assert_eq!(s.enqueue(QueueKind::Event, Some("info".into()), json!({}))?, 2);
    }
    let s = store(&dir)?;
    assert_eq!(s.enqueue(QueueKind::Metrics, None, json!({"cpu": 2}))?, 3);
    Ok(())
}

#[test]
fn pending_batch_is_fifo_by_local_id() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let s = store(&dir)?;
    for i in 0..5 {
        s.enqueue(QueueKind::Metrics, None, json!({ "i": i }))?;
    }
    let batch = s.pending_batch();
    let ids: Vec<u64> = batch.iter().map(|e| e.local_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    Ok(())
}

#[test]
fn mark_synced_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let s = store(&dir)?;
        s.enqueue(QueueKind::Metrics, None, json!({}))?;
        s.enqueue(QueueKind::Metrics, None, json!({}))?;
        s.mark_synced(&[1])?;
    }
    let s = store(&dir)?;
    let batch = s.pending_batch();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].local_id, 2);
    Ok(())
}

#[test]
fn pending_counts_split_by_kind() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let s = store(&dir)?;
    s.enqueue(QueueKind::Metrics, None, json!({}))?;
    s.enqueue(QueueKind::Metrics, None, json!({}))?;
    s.enqueue(QueueKind::Event, Some("warning".into()), json!({}))?;
    assert_eq!(s.pending_count(QueueKind::Metrics), 2);
    assert_eq!(s.pending_count(QueueKind::Event), 1);
    Ok(())
}

#[test]
fn eviction_prefers_synced_then_oldest_pending() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let s = OfflineStore::open_with_cap(dir.path().join("offline.jsonl"), 3)?;
    s.enqueue(QueueKind::Metrics, None, json!({"n": 1}))?;
    s.enqueue(QueueKind::Metrics, None, json!({"n": 2}))?;
    s.enqueue(QueueKind::Metrics, None, json!({"n": 3}))?;
    s.mark_synced(&[2])?;

    // At cap: entry 2 (synced) must be evicted, not entry 1.
    s.enqueue(QueueKind::Metrics, None, json!({"n": 4}))?;
    let ids: Vec<u64> = s.pending_batch().iter().map(|e| e.local_id).collect();
    assert_eq!(ids, vec![1, 3, 4]);

    // At cap with nothing synced: the oldest pending goes.
    s.enqueue(QueueKind::Metrics, None, json!({"n": 5}))?;
    let ids: Vec<u64> = s.pending_batch().iter().map(|e| e.local_id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    Ok(())
}

#[test]
fn torn_trailing_line_is_dropped_on_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("offline.jsonl");
    {
        let s = OfflineStore::open(path.clone())?;
        s.enqueue(QueueKind::Metrics, None, json!({}))?;
    }
    // Simulate a crash mid-append.
    let mut contents = std::fs::read_to_string(&path)?;
    contents.push_str("{\"localId\":2,\"enqueu");
    std::fs::write(&path, contents)?;

    let s = OfflineStore::open(path)?;
    assert_eq!(s.pending_batch().len(), 1);
    // The torn id is reused: only complete lines count.
    assert_eq!(s.enqueue(QueueKind::Metrics, None, json!({}))?, 2);
    Ok(())
}

#[test]
fn compact_drops_synced_entries() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let s = store(&dir)?;
    s.enqueue(QueueKind::Metrics, None, json!({}))?;
    s.enqueue(QueueKind::Metrics, None, json!({}))?;
    s.mark_synced(&[1, 2])?;
    s.compact()?;
    assert_eq!(s.pending_batch().len(), 0);
    assert_eq!(s.pending_count(QueueKind::Metrics), 0);
    // IDs keep climbing after compaction (in-memory counter).
    assert_eq!(s.enqueue(QueueKind::Metrics, None, json!({}))?, 3);
    Ok(())
}

#[test]
fn entries_record_state_transitions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let s = store(&dir)?;
    s.enqueue(QueueKind::Event, Some("critical".into()), json!({"what": "tamper"}))?;
    let batch = s.pending_batch();
    assert_eq!(batch[0].state, EntryState::Pending);
    assert_eq!(batch[0].severity.as_deref(), Some("critical"));
    Ok(())
}
