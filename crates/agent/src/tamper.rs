// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tamper watch: detects interference with the agent's on-disk state and
//! reports it as high-severity events.
//!
//! The config file is the prize for an attacker (deleting it forces
//! re-enrollment; truncating it bricks the agent), so the watch focuses
//! there: existence, the encryption magic, and unexpected shrinkage.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::secrets;
use crate::state::{Agent, Severity};

/// Watch cadence.
pub const TAMPER_POLL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigCondition {
    Ok,
    Missing,
    Plaintext,
    Truncated,
}

fn inspect(path: &std::path::Path) -> ConfigCondition {
    match std::fs::read(path) {
        Err(_) => ConfigCondition::Missing,
        Ok(raw) if raw.len() < 5 => ConfigCondition::Truncated,
        Ok(raw) if !secrets::is_encrypted(&raw) => ConfigCondition::Plaintext,
        Ok(_) => ConfigCondition::Ok,
    }
}

/// Poll the config file and publish an event on every deterioration.
/// Each distinct condition is reported once until it changes again.
pub async fn tamper_loop(agent: Arc<Agent>) {
    watch(agent, TAMPER_POLL).await;
}

async fn watch(agent: Arc<Agent>, poll: Duration) {
    let path = agent.dirs.config();
    let mut last = ConfigCondition::Ok;

    loop {
        tokio::select! {
            _ = agent.shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let condition = inspect(&path);
        if condition != last && condition != ConfigCondition::Ok {
            let what = match condition {
                ConfigCondition::Missing => "config file removed",
                ConfigCondition::Truncated => "config file truncated",
                ConfigCondition::Plaintext => "config file replaced with plaintext",
                ConfigCondition::Ok => unreachable!(),
            };
            tracing::warn!(path = %path.display(), what, "tamper detected");
            agent.publish_event(
                Severity::Critical,
                "tamper",
                json!({ "path": path.to_string_lossy(), "what": what }),
            );
        }
        last = condition;
    }
}

#[cfg(test)]
#[path = "tamper_tests.rs"]
mod tests;
