// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::machine_key;

#[test]
fn key_is_stable_within_process() -> anyhow::Result<()> {
    let a = machine_key()?;
    let b = machine_key()?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn key_is_32_bytes_and_nonzero() -> anyhow::Result<()> {
    let key = machine_key()?;
    assert_eq!(key.len(), 32);
    assert!(key.iter().any(|&b| b != 0));
    Ok(())
}
