// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive directory scans.
//!
//! Depth-first, depth-capped, cancellable. Progress frames are throttled
//! to at most one per 100 ms; directories the agent cannot read are
//! skipped without failing the scan.

use std::time::{Duration, Instant};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::transport::{msg, Envelope, Outbound};

use super::pathsafe;

/// Default depth cap when the peer does not supply one.
pub const DEFAULT_MAX_DEPTH: u32 = 10;
/// Minimum interval between `scan_progress` frames.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Scan totals returned in the terminal response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanTotals {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub skipped: u64,
}

impl ScanTotals {
    pub fn to_json(self) -> serde_json::Value {
        json!({
            "files": self.files,
            "dirs": self.dirs,
            "totalBytes": self.bytes,
            "skippedDirs": self.skipped,
        })
    }
}

/// Walk `raw_root` and stream throttled progress bound to `request_id`.
pub async fn scan_directory(
    raw_root: &str,
    max_depth: Option<u32>,
    request_id: &str,
    outbound: Outbound,
    cancel: CancellationToken,
) -> anyhow::Result<ScanTotals> {
    let root = pathsafe::sanitize(raw_root)?;
    let root = pathsafe::resolve_for_open(&root)?;
    let depth_cap = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let request_id = request_id.to_owned();

    // The walk is synchronous fs work; keep it off the runtime workers.
    let totals = tokio::task::spawn_blocking(move || {
        walk(&root, depth_cap, &request_id, &outbound, &cancel)
    })
    .await??;
    Ok(totals)
}

fn walk(
    root: &std::path::Path,
    depth_cap: u32,
    request_id: &str,
    outbound: &Outbound,
    cancel: &CancellationToken,
) -> anyhow::Result<ScanTotals> {
    let mut totals = ScanTotals::default();
    let mut stack: Vec<(std::path::PathBuf, u32)> = vec![(root.to_path_buf(), 0)];
    let mut last_progress = Instant::now() - PROGRESS_INTERVAL;

    while let Some((dir, depth)) = stack.pop() {
        anyhow::ensure!(!cancel.is_cancelled(), "scan cancelled");

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => {
                // Permission errors are not fatal.
                totals.skipped += 1;
                continue;
            }
        };
        totals.dirs += 1;

        for entry in entries.flatten() {
            anyhow::ensure!(!cancel.is_cancelled(), "scan cancelled");
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                if depth + 1 <= depth_cap {
                    stack.push((entry.path(), depth + 1));
                } else {
                    totals.skipped += 1;
                }
            } else if meta.is_file() {
                totals.files += 1;
                totals.bytes += meta.len();
            }

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                last_progress = Instant::now();
                let frame = Envelope::progress(
                    msg::SCAN_PROGRESS,
                    request_id,
                    json!({
                        "current": entry.path().to_string_lossy(),
                        "files": totals.files,
                        "dirs": totals.dirs,
                        "totalBytes": totals.bytes,
                    }),
                );
                // Throttled best-effort; a full queue just drops the tick.
                let _ = outbound.send(frame);
            }
        }
    }

    Ok(totals)
}

#[cfg(test)]
#[path = "scan_tests.rs"]
mod tests;
