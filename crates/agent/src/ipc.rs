// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent ↔ watchdog coordination.
//!
//! Three well-known files under the data directory form the contract:
//! the beacon (`agent-info.json`, freshness is evidence of liveness), the
//! update request (`update-request.json`, at most one pending), and the
//! update status (`update-status.json`, written by the watchdog and read
//! back by the agent on its next boot). A Unix-domain control socket
//! carries small synchronous commands between running processes.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Liveness/version beacon written by the running agent every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub version: String,
    pub pid: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub agent_id: String,
}

/// A staged self-update, written by the agent, consumed by the watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub version: String,
    pub staged_path: String,
    pub target_path: String,
    /// Hex SHA-256 of the staged binary; verification is skipped when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Terminal and intermediate update outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    Applying,
    Complete,
    Failed,
    RolledBack,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applying => "applying",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        }
    }

    /// True once the watchdog has no further work on this update.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Applying)
    }
}

/// Update outcome record written by the watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub state: UpdateState,
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub rolled_back: bool,
}

/// Read a JSON state file, returning `None` when it does not exist.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let value = serde_json::from_slice(&raw)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write a JSON state file atomically (tmp + rename).
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

// -- Control channel ----------------------------------------------------------

/// Commands accepted on the control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeCommand {
    /// A staged update is ready for the watchdog to pick up.
    UpdateReady,
    /// Ask the peer for its version string.
    VersionQuery,
    /// Ask the peer to shut down.
    Shutdown,
}

impl PipeCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateReady => "update-ready",
            Self::VersionQuery => "version-query",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "update-ready" => Some(Self::UpdateReady),
            "version-query" => Some(Self::VersionQuery),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

#[cfg(unix)]
pub use pipe_unix::{pipe_send, serve_pipe};

#[cfg(unix)]
mod pipe_unix {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio_util::sync::CancellationToken;

    use super::PipeCommand;

    /// Handler invoked per command; the returned string is the reply line.
    pub type PipeHandler = Arc<dyn Fn(PipeCommand) -> String + Send + Sync>;

    /// Serve the control socket until cancelled. One line in, one line out.
    pub fn serve_pipe(
        path: PathBuf,
        handler: PipeHandler,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        // A stale socket from a previous run blocks bind.
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let handler = Arc::clone(&handler);
                        tokio::spawn(handle_conn(stream, handler));
                    }
                }
            }
            let _ = std::fs::remove_file(&path);
        });
        Ok(())
    }

    async fn handle_conn(stream: UnixStream, handler: PipeHandler) {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = match PipeCommand::parse(&line) {
                Some(cmd) => handler(cmd),
                None => "err unknown-command".to_owned(),
            };
            if write_half.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                break;
            }
        }
    }

    /// Send one command to a peer's control socket and return its reply.
    pub async fn pipe_send(path: &Path, cmd: PipeCommand) -> anyhow::Result<String> {
        let stream = UnixStream::connect(path).await?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(format!("{}\n", cmd.as_str()).as_bytes()).await?;
        let mut lines = BufReader::new(read_half).lines();
        let reply = lines.next_line().await?.unwrap_or_default();
        Ok(reply)
    }
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
