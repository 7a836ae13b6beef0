// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable per-host config record.
//!
//! Stored encrypted on disk (see [`crate::secrets::vault`]); legacy
//! plaintext files from older installs are migrated transparently on
//! load. All mutation goes through [`Settings::save`], which re-encrypts
//! and replaces the file atomically.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::secrets::{self, MachineKey};

/// Default heartbeat interval, overridden by enrollment.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
/// Default metrics interval, overridden by enrollment.
pub const DEFAULT_METRICS_SECS: u64 = 10;

/// Durable per-host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub server_url: String,
    #[serde(default)]
    pub enrollment_token: String,
    /// Stable UUID assigned at first boot, independent of hostname.
    #[serde(default)]
    pub agent_id: String,
    /// Server-assigned identifier, empty until enrollment.
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub enrolled: bool,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval: u64,
    #[serde(default = "default_metrics")]
    pub metrics_interval: u64,
}

fn default_heartbeat() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}

fn default_metrics() -> u64 {
    DEFAULT_METRICS_SECS
}

impl Settings {
    /// Fresh settings for a first boot: new agent ID, default intervals.
    pub fn bootstrap(server_url: String, enrollment_token: String) -> Self {
        Self {
            server_url,
            enrollment_token,
            agent_id: uuid::Uuid::new_v4().to_string(),
            device_id: String::new(),
            enrolled: false,
            heartbeat_interval: DEFAULT_HEARTBEAT_SECS,
            metrics_interval: DEFAULT_METRICS_SECS,
        }
    }

    /// Load and decrypt the config record.
    ///
    /// A plaintext JSON file (pre-encryption installs) is accepted,
    /// logged, and rewritten encrypted via the normal save path.
    pub fn load(path: &Path, key: &MachineKey) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("read config {}", path.display()))?;

        if secrets::is_encrypted(&raw) {
            let plain = secrets::decrypt(key, &raw)?;
            let settings: Self = serde_json::from_slice(&plain).context("parse config")?;
            return Ok(settings);
        }

        // Legacy plaintext config: migrate in place.
        let settings: Self =
            serde_json::from_slice(&raw).context("parse legacy plaintext config")?;
        tracing::info!(path = %path.display(), "migrating plaintext config to encrypted format");
        settings.save(path, key)?;
        Ok(settings)
    }

    /// Marshal, encrypt, and atomically replace the config file.
    pub fn save(&self, path: &Path, key: &MachineKey) -> anyhow::Result<()> {
        let json = serde_json::to_vec(self)?;
        let blob = secrets::encrypt(key, &json)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_sibling(path);
        std::fs::write(&tmp_path, &blob)?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    // Owner-only ACLs on Windows are the protection layer's concern.
    Ok(())
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
