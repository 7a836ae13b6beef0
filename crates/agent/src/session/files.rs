// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File listings and chunked transfers.
//!
//! Reads stream the file out in 64 KiB blocks as `file_data` frames.
//! Writes are sized up-front against a hard cap and a free-space reserve
//! before a single byte is decoded, then streamed through a buffered
//! writer; blowing the cap mid-stream aborts and removes the partial
//! output (unless appending to a pre-existing file).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::transport::{msg, Envelope, Outbound};

use super::pathsafe;
use super::{Session, SessionMap};

/// Read/transfer chunk size.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Hard cap on a single uploaded file.
pub const UPLOAD_CAP_BYTES: u64 = 100 * 1024 * 1024;
/// Free space that must remain on the target volume after the write.
pub const FREE_SPACE_RESERVE: u64 = 500 * 1024 * 1024;

/// Enumerate mounted volumes.
pub fn list_drives() -> serde_json::Value {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let drives: Vec<serde_json::Value> = disks
        .iter()
        .map(|d| {
            json!({
                "mountPoint": d.mount_point().to_string_lossy(),
                "name": d.name().to_string_lossy(),
                "fileSystem": d.file_system().to_string_lossy(),
                "totalBytes": d.total_space(),
                "availableBytes": d.available_space(),
                "removable": d.is_removable(),
            })
        })
        .collect();
    json!({ "drives": drives })
}

/// List one directory (non-recursive).
pub async fn list_files(raw_path: &str) -> anyhow::Result<serde_json::Value> {
    let path = pathsafe::sanitize(raw_path)?;
    let path = pathsafe::resolve_for_open(&path)?;

    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(&path)
        .await
        .with_context(|| format!("read dir {}", path.display()))?;
    while let Some(entry) = dir.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let modified = meta
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .map(|t| t.to_rfc3339());
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "isDir": meta.is_dir(),
            "size": meta.len(),
            "modified": modified,
        }));
    }
    entries.sort_by(|a, b| {
        a["name"].as_str().unwrap_or_default().cmp(b["name"].as_str().unwrap_or_default())
    });
    Ok(json!({ "path": path.to_string_lossy(), "entries": entries }))
}

/// Stream a file to the peer in `file_data` frames bound to `request_id`.
/// Returns the terminal response payload on EOF.
pub async fn send_file(
    raw_path: &str,
    request_id: &str,
    outbound: Outbound,
    cancel: CancellationToken,
) -> anyhow::Result<serde_json::Value> {
    let path = pathsafe::sanitize(raw_path)?;
    let path = pathsafe::resolve_for_open(&path)?;

    let mut file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let total = file.metadata().await?.len();

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut offset: u64 = 0;
    let mut chunks: u64 = 0;
    loop {
        anyhow::ensure!(!cancel.is_cancelled(), "transfer cancelled");
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let frame = Envelope::progress(
            msg::FILE_DATA,
            request_id,
            json!({
                "chunk": base64::engine::general_purpose::STANDARD.encode(&buf[..n]),
                "offset": offset,
                "total": total,
            }),
        );
        send_paced(&outbound, frame, &cancel).await?;
        offset += n as u64;
        chunks += 1;
    }

    Ok(json!({ "path": path.to_string_lossy(), "size": total, "chunks": chunks }))
}

/// Queue a frame, yielding briefly while the bounded outbound queue is
/// full. The queue never grows past its cap; this producer paces itself
/// instead of buffering.
async fn send_paced(
    outbound: &Outbound,
    frame: Envelope,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    loop {
        anyhow::ensure!(!cancel.is_cancelled(), "transfer cancelled");
        match outbound.send(frame.clone()) {
            Ok(()) => return Ok(()),
            Err(e) => {
                anyhow::ensure!(outbound.is_connected(), "control channel lost: {e}");
            }
        }
        // Queue full: wait for the writer to drain a little.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// One inbound (peer → agent) file write.
pub struct UploadSession {
    pub id: String,
    path: PathBuf,
    writer: tokio::sync::Mutex<Option<BufWriter<tokio::fs::File>>>,
    received: AtomicU64,
    expected: u64,
    append: bool,
    cancel: CancellationToken,
}

impl Session for UploadSession {
    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Owns inbound file-write sessions.
#[derive(Default)]
pub struct TransferManager {
    uploads: SessionMap<UploadSession>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and open a write session. The size and free-space checks
    /// run before any chunk is accepted.
    pub async fn begin_upload(
        &self,
        id: &str,
        raw_path: &str,
        expected_bytes: u64,
        append: bool,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            expected_bytes <= UPLOAD_CAP_BYTES,
            "upload of {expected_bytes} bytes exceeds the {UPLOAD_CAP_BYTES} byte cap"
        );

        let path = pathsafe::sanitize(raw_path)?;
        let path = pathsafe::resolve_for_create(&path)?;

        if let Some(available) = available_space(&path) {
            anyhow::ensure!(
                available > expected_bytes + FREE_SPACE_RESERVE,
                "insufficient free space: {available} bytes available, \
                 {expected_bytes} requested plus {FREE_SPACE_RESERVE} reserve"
            );
        } else {
            tracing::warn!(path = %path.display(), "no volume match, free-space check skipped");
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(append)
            .write(true)
            .truncate(!append)
            .open(&path)
            .await
            .with_context(|| format!("open {} for write", path.display()))?;

        let session = Arc::new(UploadSession {
            id: id.to_owned(),
            path,
            writer: tokio::sync::Mutex::new(Some(BufWriter::new(file))),
            received: AtomicU64::new(0),
            expected: expected_bytes,
            append,
            cancel: shutdown.child_token(),
        });
        self.uploads.insert(id, session).await
    }

    /// Decode and write one chunk. Exceeding the cap mid-stream aborts
    /// the session and removes partial output (unless appending).
    pub async fn write_chunk(&self, id: &str, chunk_b64: &str) -> anyhow::Result<u64> {
        let session = self
            .uploads
            .get(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("no upload session {id}"))?;
        anyhow::ensure!(!session.cancel.is_cancelled(), "upload session {id} cancelled");

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(chunk_b64)
            .context("invalid base64 chunk")?;

        let received = session.received.fetch_add(bytes.len() as u64, Ordering::AcqRel)
            + bytes.len() as u64;
        if received > UPLOAD_CAP_BYTES {
            self.abort(id).await;
            anyhow::bail!("upload exceeded the {UPLOAD_CAP_BYTES} byte cap mid-stream");
        }

        let mut guard = session.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| anyhow::anyhow!("upload {id} finished"))?;
        writer.write_all(&bytes).await?;
        Ok(received)
    }

    /// Flush and close; returns the terminal response payload.
    pub async fn finish(&self, id: &str) -> anyhow::Result<serde_json::Value> {
        let session = self
            .uploads
            .get(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("no upload session {id}"))?;

        {
            let mut guard = session.writer.lock().await;
            if let Some(mut writer) = guard.take() {
                writer.flush().await?;
            }
        }
        self.uploads.forget(id).await;

        let received = session.received.load(Ordering::Acquire);
        if session.expected > 0 && received != session.expected {
            tracing::warn!(
                session_id = %id,
                expected = session.expected,
                received,
                "upload size differs from estimate"
            );
        }
        Ok(json!({ "path": session.path.to_string_lossy(), "bytes": received }))
    }

    /// Drop the session; partial output is removed unless appending.
    pub async fn abort(&self, id: &str) {
        if let Some(session) = self.uploads.get(id).await {
            {
                let mut guard = session.writer.lock().await;
                guard.take();
            }
            if !session.append {
                let _ = std::fs::remove_file(&session.path);
            }
            self.uploads.close(id).await;
        }
    }

    pub async fn abort_all(&self) {
        self.uploads.close_all().await;
    }
}

/// Available bytes on the volume holding `path` (longest mount prefix).
fn available_space(path: &std::path::Path) -> Option<u64> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
