// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::Settings;
use crate::secrets::vault::MAGIC;

fn test_key() -> [u8; 32] {
    [7u8; 32]
}

#[test]
fn save_then_load_round_trips() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.json");
    let key = test_key();

    let mut settings = Settings::bootstrap("http://h/".into(), "T".into());
    settings.device_id = "D1".into();
    settings.enrolled = true;
    settings.save(&path, &key)?;

    let loaded = Settings::load(&path, &key)?;
    assert_eq!(loaded.server_url, "http://h/");
    assert_eq!(loaded.device_id, "D1");
    assert!(loaded.enrolled);
    assert_eq!(loaded.agent_id, settings.agent_id);
    Ok(())
}

#[test]
fn file_on_disk_starts_with_magic_and_version() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.json");
    Settings::bootstrap("http://h/".into(), "T".into()).save(&path, &test_key())?;

    let raw = std::fs::read(&path)?;
    assert_eq!(&raw[..4], MAGIC);
    assert_eq!(raw[4], 1);
    Ok(())
}

#[test]
fn plaintext_config_is_migrated_on_load() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.json");
    let key = test_key();
    std::fs::write(&path, br#"{"serverUrl":"http://h/"}"#)?;

    let loaded = Settings::load(&path, &key)?;
    assert_eq!(loaded.server_url, "http://h/");
    assert_eq!(loaded.heartbeat_interval, 30);
    assert_eq!(loaded.metrics_interval, 10);

    // The file must now be encrypted, and a second load must agree.
    let raw = std::fs::read(&path)?;
    assert_eq!(&raw[..5], b"SNTL\x01");
    let again = Settings::load(&path, &key)?;
    assert_eq!(again.server_url, "http://h/");
    Ok(())
}

#[cfg(unix)]
#[test]
fn config_file_is_owner_only() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.json");
    Settings::bootstrap("http://h/".into(), "T".into()).save(&path, &test_key())?;

    let mode = std::fs::metadata(&path)?.permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    Ok(())
}

#[test]
fn bootstrap_assigns_stable_uuid() {
    let a = Settings::bootstrap("http://h/".into(), "T".into());
    let b = Settings::bootstrap("http://h/".into(), "T".into());
    assert_ne!(a.agent_id, b.agent_id);
    assert!(uuid::Uuid::parse_str(&a.agent_id).is_ok());
}
