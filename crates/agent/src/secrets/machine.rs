// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-bound key material.
//!
//! The config-at-rest key is derived from identifiers that survive
//! reinstalls but not hardware swaps: the platform machine ID and the
//! hostname. The derived key lives only in memory; it is computed once
//! per process and cached.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};

/// 32-byte AES-256 key derived from machine identity.
pub type MachineKey = [u8; 32];

static CACHED_KEY: OnceLock<MachineKey> = OnceLock::new();

/// Return the per-machine encryption key, deriving it on first use.
///
/// Key = SHA-256(machine-id || hostname). A change in either component
/// (VM clone, hostname reset, hardware swap) makes previously encrypted
/// config unreadable; that is intentional.
pub fn machine_key() -> anyhow::Result<MachineKey> {
    if let Some(key) = CACHED_KEY.get() {
        return Ok(*key);
    }
    let id = machine_id()?;
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(host.as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(*CACHED_KEY.get_or_init(|| key))
}

/// Read the platform machine identifier.
#[cfg(target_os = "linux")]
pub fn machine_id() -> anyhow::Result<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            let id = contents.trim();
            if !id.is_empty() {
                return Ok(id.to_owned());
            }
        }
    }
    anyhow::bail!("no machine-id found under /etc or /var/lib/dbus")
}

#[cfg(target_os = "macos")]
pub fn machine_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .context("spawn ioreg")?;
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if line.contains("IOPlatformUUID") {
            if let Some(uuid) = line.split('"').nth(3) {
                return Ok(uuid.to_owned());
            }
        }
    }
    anyhow::bail!("IOPlatformUUID not present in ioreg output")
}

#[cfg(target_os = "windows")]
pub fn machine_id() -> anyhow::Result<String> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .context("spawn reg query")?;
    let text = String::from_utf8_lossy(&output.stdout);
    for line in text.lines() {
        if let Some(pos) = line.find("REG_SZ") {
            let guid = line[pos + "REG_SZ".len()..].trim();
            if !guid.is_empty() {
                return Ok(guid.to_owned());
            }
        }
    }
    anyhow::bail!("MachineGuid not present in registry output")
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn machine_id() -> anyhow::Result<String> {
    anyhow::bail!("unsupported platform for machine-id")
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
