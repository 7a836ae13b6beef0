// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path validation applied before every file operation.
//!
//! Remote paths are attacker-supplied. The checks here run before any
//! filesystem access: NFC normalization, rejection of bidi-override,
//! zero-width, and Cyrillic code points (homoglyph smuggling), Windows
//! reserved device names, 8.3 short-name aliases, and traversal.
//! Immediately before the real open the path is re-stat'd via lstat so a
//! symlink swapped in after validation is still caught.

use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Validate and absolutize an untrusted path string.
pub fn sanitize(raw: &str) -> anyhow::Result<PathBuf> {
    anyhow::ensure!(!raw.trim().is_empty(), "empty path");

    let normalized: String = raw.nfc().collect();

    for ch in normalized.chars() {
        if is_bidi_override(ch) {
            anyhow::bail!("path contains a bidirectional override character (U+{:04X})", ch as u32);
        }
        if is_zero_width(ch) {
            anyhow::bail!("path contains a zero-width character (U+{:04X})", ch as u32);
        }
        if is_cyrillic(ch) {
            anyhow::bail!("path contains a Cyrillic homoglyph character (U+{:04X})", ch as u32);
        }
    }

    let path = PathBuf::from(&normalized);
    for component in path.components() {
        if let Component::Normal(part) = component {
            let part = part.to_string_lossy();
            if is_reserved_device_name(&part) {
                anyhow::bail!("path contains a reserved device name: {part}");
            }
            if is_short_name_alias(&part) {
                anyhow::bail!("path contains an 8.3 short-name alias: {part}");
            }
        }
    }

    let absolute = std::path::absolute(&path)?;
    anyhow::ensure!(
        !absolute.components().any(|c| matches!(c, Component::ParentDir)),
        "path traversal rejected"
    );
    Ok(absolute)
}

/// Re-stat immediately before the real open. A symlink is resolved and
/// the resolved target is the path actually used; a target that vanished
/// between validation and open is reported as such.
pub fn resolve_for_open(path: &Path) -> anyhow::Result<PathBuf> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let resolved = std::fs::canonicalize(path)?;
            tracing::debug!(
                requested = %path.display(),
                resolved = %resolved.display(),
                "symlink resolved before open"
            );
            Ok(resolved)
        }
        Ok(_) => Ok(path.to_path_buf()),
        Err(e) => Err(e.into()),
    }
}

/// Like [`resolve_for_open`] but tolerates a missing final component
/// (write targets that do not exist yet).
pub fn resolve_for_create(path: &Path) -> anyhow::Result<PathBuf> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => resolve_for_open(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(e.into()),
    }
}

fn is_bidi_override(ch: char) -> bool {
    matches!(ch, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{061C}' | '\u{200E}' | '\u{200F}')
}

fn is_zero_width(ch: char) -> bool {
    matches!(ch, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

fn is_cyrillic(ch: char) -> bool {
    matches!(ch, '\u{0400}'..='\u{04FF}' | '\u{0500}'..='\u{052F}')
}

fn is_reserved_device_name(component: &str) -> bool {
    // The reservation applies to the stem: "CON.txt" is still CON.
    let stem = component.split('.').next().unwrap_or(component);
    let upper = stem.trim().to_ascii_uppercase();
    matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || (upper.len() == 4
            && (upper.starts_with("COM") || upper.starts_with("LPT"))
            && upper.as_bytes()[3].is_ascii_digit()
            && upper.as_bytes()[3] != b'0')
}

fn is_short_name_alias(component: &str) -> bool {
    // 8.3 aliases look like PROGRA~1; a tilde directly followed by a
    // digit inside the name is the telltale.
    let bytes = component.as_bytes();
    bytes.windows(2).any(|w| w[0] == b'~' && w[1].is_ascii_digit())
}

#[cfg(test)]
#[path = "pathsafe_tests.rs"]
mod tests;
