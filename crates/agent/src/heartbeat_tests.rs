// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::ipc::AgentInfo;
use crate::offline::OfflineStore;
use crate::paths::DataDir;
use crate::session::remote::RemoteManager;
use crate::settings::Settings;
use crate::state::Agent;
use crate::transport::client::ClientConfig;
use crate::transport::ControlClient;

use super::write_beacon;

#[tokio::test]
async fn beacon_carries_version_pid_and_identity() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let dirs = DataDir::from_root(dir.path());
    let client = ControlClient::new(ClientConfig {
        server_url: "http://127.0.0.1:9".into(),
        agent_id: "agent-1".into(),
        enrollment_token: "T".into(),
        device_info: json!({}),
        health_poll: Duration::from_millis(250),
    });
    let offline = Arc::new(OfflineStore::open(dirs.offline_store())?);
    let agent = Agent::new(
        dirs,
        [0u8; 32],
        Settings::bootstrap("http://127.0.0.1:9".into(), "T".into()),
        client,
        offline,
        Arc::new(RemoteManager::headless()),
        CancellationToken::new(),
    );

    write_beacon(&agent, "agent-1")?;

    let info: AgentInfo = crate::ipc::read_json(&agent.dirs.agent_info())?
        .ok_or_else(|| anyhow::anyhow!("beacon missing"))?;
    assert_eq!(info.agent_id, "agent-1");
    assert_eq!(info.pid, std::process::id());
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    Ok(())
}
