// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sentinel::ipc::{self, UpdateRequest, UpdateState, UpdateStatus};
use sentinel::paths::DataDir;

use super::recover_from_crash;

fn applying_status() -> UpdateStatus {
    UpdateStatus {
        state: UpdateState::Applying,
        version: "2.0.0".into(),
        started_at: chrono::Utc::now(),
        completed_at: None,
        backup_path: None,
        error: None,
        rolled_back: false,
    }
}

#[test]
fn crash_evidence_becomes_terminal_failed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dirs = DataDir::from_root(dir.path());
    dirs.ensure()?;
    ipc::write_json(&dirs.update_status(), &applying_status())?;

    recover_from_crash(&dirs)?;

    let status: UpdateStatus = ipc::read_json(&dirs.update_status())?
        .ok_or_else(|| anyhow::anyhow!("status missing"))?;
    assert_eq!(status.state, UpdateState::Failed);
    assert!(status.error.as_deref().unwrap_or_default().contains("manual recovery"));
    assert!(status.completed_at.is_some());
    Ok(())
}

#[test]
fn stale_request_is_parked_not_retried() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dirs = DataDir::from_root(dir.path());
    dirs.ensure()?;
    ipc::write_json(&dirs.update_status(), &applying_status())?;
    ipc::write_json(
        &dirs.update_request(),
        &UpdateRequest {
            version: "2.0.0".into(),
            staged_path: "/tmp/staged".into(),
            target_path: "/usr/bin/sentinel-agent".into(),
            checksum: None,
        },
    )?;

    recover_from_crash(&dirs)?;

    assert!(!dirs.update_request().exists(), "request must not be retried silently");
    assert!(
        dirs.update_request().with_extension("json.crashed").exists(),
        "request must be parked for the operator"
    );
    Ok(())
}

#[test]
fn terminal_status_is_left_alone() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dirs = DataDir::from_root(dir.path());
    dirs.ensure()?;
    let mut status = applying_status();
    status.state = UpdateState::Complete;
    status.completed_at = Some(chrono::Utc::now());
    ipc::write_json(&dirs.update_status(), &status)?;

    recover_from_crash(&dirs)?;

    let after: UpdateStatus = ipc::read_json(&dirs.update_status())?
        .ok_or_else(|| anyhow::anyhow!("status missing"))?;
    assert_eq!(after.state, UpdateState::Complete);
    Ok(())
}

#[test]
fn no_status_file_is_a_clean_boot() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dirs = DataDir::from_root(dir.path());
    dirs.ensure()?;
    recover_from_crash(&dirs)?;
    assert!(!dirs.update_status().exists());
    Ok(())
}
