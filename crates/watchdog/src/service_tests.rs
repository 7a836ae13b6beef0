// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::{wait_for_state, ServiceState};
use crate::testutil::ScriptedService;

#[tokio::test]
async fn wait_reaches_target_state() -> anyhow::Result<()> {
    let service = ScriptedService::scripted(
        vec![ServiceState::Unknown, ServiceState::Stopped, ServiceState::Running],
        ServiceState::Running,
    );
    wait_for_state(&service, ServiceState::Running, Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn wait_times_out_with_a_named_state() -> anyhow::Result<()> {
    let service = ScriptedService::steady(ServiceState::Stopped);
    let err = match wait_for_state(&service, ServiceState::Running, Duration::from_millis(300))
        .await
    {
        Err(e) => e,
        Ok(()) => anyhow::bail!("wait succeeded against a stopped service"),
    };
    assert!(err.to_string().contains("running"), "unexpected error: {err}");
    Ok(())
}

#[test]
fn state_names() {
    assert_eq!(ServiceState::Running.as_str(), "running");
    assert_eq!(ServiceState::Stopped.as_str(), "stopped");
    assert_eq!(ServiceState::Unknown.as_str(), "unknown");
}
