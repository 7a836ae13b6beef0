// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{
    read_json, write_json, AgentInfo, PipeCommand, UpdateRequest, UpdateState, UpdateStatus,
};

#[test]
fn update_request_round_trips_through_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("update-request.json");

    let request = UpdateRequest {
        version: "2".into(),
        staged_path: "/tmp/staged".into(),
        target_path: "/usr/bin/sentinel-agent".into(),
        checksum: Some("ab".repeat(32)),
    };
    write_json(&path, &request)?;

    let loaded: UpdateRequest = read_json(&path)?
        .ok_or_else(|| anyhow::anyhow!("request file missing"))?;
    assert_eq!(loaded.version, "2");
    assert_eq!(loaded.checksum.as_deref(), Some("ab".repeat(32).as_str()));
    Ok(())
}

#[test]
fn read_missing_file_is_none() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing: Option<AgentInfo> = read_json(&dir.path().join("nope.json"))?;
    assert!(missing.is_none());
    Ok(())
}

#[test]
fn update_state_serializes_kebab_case() -> anyhow::Result<()> {
    let status = UpdateStatus {
        state: UpdateState::RolledBack,
        version: "2".into(),
        started_at: chrono::Utc::now(),
        completed_at: None,
        backup_path: None,
        error: Some("health window failed".into()),
        rolled_back: true,
    };
    let json = serde_json::to_string(&status)?;
    assert!(json.contains("\"rolled-back\""), "unexpected json: {json}");
    Ok(())
}

#[test]
fn terminal_states() {
    assert!(!UpdateState::Applying.is_terminal());
    assert!(UpdateState::Complete.is_terminal());
    assert!(UpdateState::Failed.is_terminal());
    assert!(UpdateState::RolledBack.is_terminal());
}

#[test]
fn pipe_command_parse() {
    assert_eq!(PipeCommand::parse("update-ready"), Some(PipeCommand::UpdateReady));
    assert_eq!(PipeCommand::parse(" version-query\n"), Some(PipeCommand::VersionQuery));
    assert_eq!(PipeCommand::parse("shutdown"), Some(PipeCommand::Shutdown));
    assert_eq!(PipeCommand::parse("reboot"), None);
}

#[cfg(unix)]
#[tokio::test]
async fn pipe_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let socket = dir.path().join("sentinel.sock");
    let cancel = CancellationToken::new();

    super::serve_pipe(
        socket.clone(),
        Arc::new(|cmd| match cmd {
            PipeCommand::VersionQuery => "1.4.2".to_owned(),
            other => format!("ok {}", other.as_str()),
        }),
        cancel.clone(),
    )?;

    // The listener task needs a beat to come up.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let reply = super::pipe_send(&socket, PipeCommand::VersionQuery).await?;
    assert_eq!(reply, "1.4.2");
    let reply = super::pipe_send(&socket, PipeCommand::UpdateReady).await?;
    assert_eq!(reply, "ok update-ready");

    cancel.cancel();
    Ok(())
}
