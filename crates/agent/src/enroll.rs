// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot enrollment against the server.
//!
//! A POST to `/api/agent/enroll` bearing the enrollment token registers
//! the device; the server answers with a device ID and its recommended
//! intervals, which override the local defaults and are persisted.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Enrollment HTTP timeout.
pub const ENROLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the bearer enrollment token.
pub const TOKEN_HEADER: &str = "X-Enrollment-Token";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub config: Option<EnrollConfig>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollConfig {
    pub heartbeat_interval: Option<u64>,
    pub metrics_interval: Option<u64>,
}

/// Build the enrollment endpoint from the server base URL.
pub fn enroll_url(server_url: &str) -> String {
    format!("{}/api/agent/enroll", server_url.trim_end_matches('/'))
}

/// Register this agent. Returns the parsed response on HTTP 2xx.
pub async fn enroll(
    server_url: &str,
    token: &str,
    agent_id: &str,
    device_info: serde_json::Value,
) -> anyhow::Result<EnrollResponse> {
    let client = reqwest::Client::builder()
        .timeout(ENROLL_TIMEOUT)
        .build()
        .unwrap_or_default();

    let body = serde_json::json!({
        "agentId": agent_id,
        "systemInfo": device_info,
    });

    let resp = client
        .post(enroll_url(server_url))
        .header(TOKEN_HEADER, token)
        .json(&body)
        .send()
        .await
        .context("enrollment request failed")?;

    let status = resp.status();
    anyhow::ensure!(status.is_success(), "enrollment rejected with HTTP {status}");

    let parsed: EnrollResponse = resp.json().await.context("parse enrollment response")?;
    anyhow::ensure!(
        parsed.success,
        "enrollment refused: {}",
        parsed.error.as_deref().unwrap_or("unspecified")
    );
    anyhow::ensure!(!parsed.device_id.is_empty(), "enrollment response missing deviceId");
    Ok(parsed)
}

#[cfg(test)]
#[path = "enroll_tests.rs"]
mod tests;
