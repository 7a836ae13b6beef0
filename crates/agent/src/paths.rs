// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk layout under the platform program-data directory.
//!
//! Everything the agent and watchdog persist lives in one directory so
//! the two processes agree on paths without configuration. The directory
//! is overridable (env or flag) for tests and side-by-side installs.

use std::path::{Path, PathBuf};

/// Environment override for the data directory.
pub const DATA_DIR_ENV: &str = "SENTINEL_DATA_DIR";

/// Resolved layout of the agent's persistent state.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory: explicit override, env var, then the
    /// platform program-data location.
    pub fn resolve(override_path: Option<&Path>) -> Self {
        if let Some(p) = override_path {
            return Self { root: p.to_path_buf() };
        }
        if let Ok(p) = std::env::var(DATA_DIR_ENV) {
            if !p.is_empty() {
                return Self { root: PathBuf::from(p) };
            }
        }
        let root = if cfg!(windows) {
            dirs::data_dir().unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
        } else {
            PathBuf::from("/var/lib")
        };
        Self { root: root.join("sentinel") }
    }

    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree (best-effort on repeat calls).
    pub fn ensure(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encrypted config record.
    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Liveness/version beacon written by the agent, read by the watchdog.
    pub fn agent_info(&self) -> PathBuf {
        self.root.join("agent-info.json")
    }

    /// Pending update request, written by the agent, consumed by the watchdog.
    pub fn update_request(&self) -> PathBuf {
        self.root.join("update-request.json")
    }

    /// Update outcome written by the watchdog, read by the agent on boot.
    pub fn update_status(&self) -> PathBuf {
        self.root.join("update-status.json")
    }

    /// Offline queue backing file.
    pub fn offline_store(&self) -> PathBuf {
        self.root.join("offline.jsonl")
    }

    /// Agent log file.
    pub fn agent_log(&self) -> PathBuf {
        self.root.join("agent.log")
    }

    /// Server certificate delivered via `update_certificate`.
    pub fn server_cert(&self) -> PathBuf {
        self.root.join("server.pem")
    }

    /// Named control channel between agent and watchdog.
    pub fn control_socket(&self) -> PathBuf {
        self.root.join("sentinel.sock")
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
