// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: the real `sentinel-agent` binary against an
//! in-process mock server.

use std::time::Duration;

use serde_json::json;

use sentinel_specs::{AgentProcess, MockServer};

const TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn cold_start_enrolls_and_encrypts_config() -> anyhow::Result<()> {
    let mut server = MockServer::start().await?;
    let agent = AgentProcess::start(&server.url(), "T")?;

    // Enrollment arrives bearing the token header.
    let enroll = tokio::time::timeout(TIMEOUT, server.enrolls.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("no enrollment"))?;
    assert_eq!(enroll["token"], "T");
    assert!(enroll["body"]["agentId"].is_string());
    assert!(enroll["body"]["systemInfo"].is_object());

    // The control channel authenticates with the same identity.
    let auth = server.next_frame_of("auth", TIMEOUT).await?;
    assert_eq!(auth["data"]["token"], "T");

    // The config on disk is SNTL v1 and carries the issued device ID.
    agent.wait_for(TIMEOUT, |a| a.config_path().exists()).await?;
    // Give the post-enrollment save a moment to land.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let raw = std::fs::read(agent.config_path())?;
    assert_eq!(&raw[..5], &[0x53, 0x4e, 0x54, 0x4c, 0x01]);

    // The beacon is written at startup.
    agent.wait_for(TIMEOUT, |a| a.beacon_path().exists()).await?;
    Ok(())
}

#[tokio::test]
async fn plaintext_config_is_migrated_to_sntl() -> anyhow::Result<()> {
    let mut server = MockServer::start().await?;

    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");
    std::fs::create_dir_all(&data_dir)?;
    std::fs::write(
        data_dir.join("config.json"),
        format!(r#"{{"serverUrl":"{}","enrollmentToken":"T"}}"#, server.url()),
    )?;

    let agent = AgentProcess::start_with_data_dir(&server.url(), "T", &data_dir)?;

    agent
        .wait_for(TIMEOUT, |a| {
            std::fs::read(a.config_path())
                .map(|raw| raw.len() >= 5 && &raw[..5] == b"SNTL\x01")
                .unwrap_or(false)
        })
        .await?;

    // The agent still comes up and authenticates with the migrated config.
    let _auth = server.next_frame_of("auth", TIMEOUT).await?;
    Ok(())
}

#[tokio::test]
async fn reconnects_promptly_after_an_outage() -> anyhow::Result<()> {
    let mut server = MockServer::start().await?;
    let port = server.port();
    let _agent = AgentProcess::start(&server.url(), "T")?;

    let _first_auth = server.next_frame_of("auth", TIMEOUT).await?;

    // Outage: drop the listener and every open channel.
    server.stop();
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Server returns on the same port; the health gate bounds reattach.
    let mut revived = MockServer::start_on(port).await?;
    let reattach_started = tokio::time::Instant::now();
    let _second_auth = revived.next_frame_of("auth", Duration::from_secs(6)).await?;
    assert!(
        reattach_started.elapsed() <= Duration::from_millis(5500),
        "reconnect took {:?}",
        reattach_started.elapsed()
    );
    Ok(())
}

#[tokio::test]
async fn bidi_override_path_is_rejected_without_fs_access() -> anyhow::Result<()> {
    let mut server = MockServer::start().await?;
    let _agent = AgentProcess::start(&server.url(), "T")?;
    let _auth = server.next_frame_of("auth", TIMEOUT).await?;

    server.send_to_agent(json!({
        "type": "list_files",
        "requestId": "p1",
        "data": { "path": "/tmp/evil\u{202E}gpj.exe" },
    }));

    let response = server.next_frame_of("response", TIMEOUT).await?;
    assert_eq!(response["requestId"], "p1");
    assert_eq!(response["success"], false);
    let error = response["error"].as_str().unwrap_or_default();
    assert!(
        error.contains("bidirectional override"),
        "unexpected error text: {error}"
    );
    Ok(())
}

#[tokio::test]
async fn execute_command_round_trips_over_the_channel() -> anyhow::Result<()> {
    let mut server = MockServer::start().await?;
    let _agent = AgentProcess::start(&server.url(), "T")?;
    let _auth = server.next_frame_of("auth", TIMEOUT).await?;

    server.send_to_agent(json!({
        "type": "execute_command",
        "requestId": "c1",
        "data": { "command": "echo smoke-marker" },
    }));

    let result = server.next_frame_of("command_result", TIMEOUT).await?;
    assert_eq!(result["requestId"], "c1");
    assert_eq!(result["data"]["exitCode"], 0);
    assert!(result["data"]["stdout"]
        .as_str()
        .unwrap_or_default()
        .contains("smoke-marker"));
    Ok(())
}

#[tokio::test]
async fn heartbeats_flow_after_authentication() -> anyhow::Result<()> {
    let mut server = MockServer::start().await?;
    let _agent = AgentProcess::start(&server.url(), "T")?;
    let _auth = server.next_frame_of("auth", TIMEOUT).await?;

    // Default heartbeat interval is 30s from enrollment; metrics arrive
    // sooner (10s). Either frame proves the post-auth loops are alive.
    let frame = tokio::time::timeout(Duration::from_secs(40), async {
        loop {
            let Some(frame) = server.frames.recv().await else {
                anyhow::bail!("frame stream closed");
            };
            if frame["type"] == "heartbeat" || frame["type"] == "metrics" {
                return Ok(frame);
            }
        }
    })
    .await??;
    assert!(frame["type"] == "heartbeat" || frame["type"] == "metrics");
    Ok(())
}
