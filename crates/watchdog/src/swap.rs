// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary verification, backup, and the atomic replace itself.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of a file, streamed.
pub fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the staged binary: present, non-empty, and matching the
/// supplied checksum when one was given.
pub fn verify_staged(staged: &Path, checksum: Option<&str>) -> anyhow::Result<()> {
    let meta = std::fs::metadata(staged)
        .with_context(|| format!("stat staged binary {}", staged.display()))?;
    anyhow::ensure!(meta.len() > 0, "staged binary {} is empty", staged.display());

    if let Some(expected) = checksum {
        let actual = file_sha256(staged)?;
        anyhow::ensure!(
            actual.eq_ignore_ascii_case(expected),
            "checksum mismatch on {}: expected {expected}, got {actual}",
            staged.display()
        );
    }
    Ok(())
}

/// Copy the current target aside for rollback. Any stale backup is
/// overwritten with a fresh handle; nothing beyond the bytes matters.
pub fn back_up(target: &Path, backup: &Path) -> anyhow::Result<()> {
    let _ = std::fs::remove_file(backup);
    std::fs::copy(target, backup)
        .with_context(|| format!("back up {} to {}", target.display(), backup.display()))?;
    Ok(())
}

/// Atomic replace with write-through: the source is copied next to the
/// destination, fsynced, then renamed over it. Rename within one volume
/// is the platform's atomic primitive.
pub fn atomic_replace(source: &Path, dest: &Path) -> anyhow::Result<()> {
    let staging = dest.with_extension("new");
    let _ = std::fs::remove_file(&staging);

    std::fs::copy(source, &staging)
        .with_context(|| format!("stage {} beside {}", source.display(), dest.display()))?;
    copy_permissions(dest, &staging);

    let file = std::fs::OpenOptions::new().read(true).open(&staging)?;
    file.sync_all().context("fsync staged copy")?;
    drop(file);

    std::fs::rename(&staging, dest)
        .with_context(|| format!("rename {} over {}", staging.display(), dest.display()))?;

    if let Some(dir) = dest.parent() {
        if let Ok(dir_handle) = std::fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }
    }
    Ok(())
}

/// Carry the destination's mode onto the staged copy so an executable
/// stays executable after the rename.
fn copy_permissions(from: &Path, to: &Path) {
    if let Ok(meta) = std::fs::metadata(from) {
        let _ = std::fs::set_permissions(to, meta.permissions());
    }
}

#[cfg(test)]
#[path = "swap_tests.rs"]
mod tests;
