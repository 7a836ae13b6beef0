// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive shell sessions.
//!
//! Each session spawns the system shell with piped stdio and pumps
//! stdout/stderr into `terminal_output` frames tagged with the session
//! ID. Input frames are written to stdin; resize is accepted but a no-op
//! on the pipe backend (there is no PTY to re-geometry). A session ends
//! on explicit close, child exit, or agent shutdown.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::transport::{msg, Envelope, Outbound};

use super::{Session, SessionMap};

/// One live shell.
pub struct TerminalSession {
    pub id: String,
    pub pid: Option<u32>,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Session for TerminalSession {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
    }
}

/// Owns all shell sessions of the process.
#[derive(Default)]
pub struct TerminalManager {
    sessions: SessionMap<TerminalSession>,
}

impl TerminalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the system shell for `id` and start pumping output.
    /// At most one shell per session ID.
    pub async fn start(
        self: &Arc<Self>,
        id: &str,
        outbound: Outbound,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<u32> {
        let (program, args) = system_shell();
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn shell for session {id}"))?;

        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take().context("shell stdin missing")?;
        let stdout = child.stdout.take().context("shell stdout missing")?;
        let stderr = child.stderr.take().context("shell stderr missing")?;

        let cancel = shutdown.child_token();
        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(64);

        let session = Arc::new(TerminalSession {
            id: id.to_owned(),
            pid: child.id(),
            stdin_tx,
            closed: AtomicBool::new(false),
            cancel: cancel.clone(),
        });
        self.sessions.insert(id, Arc::clone(&session)).await?;

        tokio::spawn(pump_output(id.to_owned(), stdout, outbound.clone(), cancel.clone()));
        tokio::spawn(pump_output(id.to_owned(), stderr, outbound.clone(), cancel.clone()));
        tokio::spawn(pump_stdin(stdin, stdin_rx, cancel.clone()));

        // Reaper: announce exit and release the map entry.
        let manager = Arc::clone(self);
        let session_id = id.to_owned();
        tokio::spawn(async move {
            let exit = tokio::select! {
                _ = cancel.cancelled() => None,
                status = child.wait() => status.ok(),
            };
            cancel.cancel();
            if manager.sessions.forget(&session_id).await {
                let frame = Envelope::new(msg::CLOSE_TERMINAL).with_data(json!({
                    "sessionId": session_id,
                    "exitCode": exit.and_then(|s| s.code()),
                }));
                let _ = outbound.send(frame);
            }
        });

        Ok(pid)
    }

    /// Write peer input to the session's stdin.
    pub async fn write_input(&self, id: &str, data: &[u8]) -> anyhow::Result<()> {
        let session = self
            .sessions
            .get(id)
            .await
            .ok_or_else(|| anyhow::anyhow!("no terminal session {id}"))?;
        anyhow::ensure!(!session.closed.load(Ordering::Acquire), "terminal session {id} closed");
        session
            .stdin_tx
            .send(data.to_vec())
            .await
            .map_err(|_| anyhow::anyhow!("terminal session {id} stdin closed"))
    }

    /// Accepted for protocol symmetry; the pipe backend has no geometry.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> anyhow::Result<()> {
        anyhow::ensure!(self.sessions.get(id).await.is_some(), "no terminal session {id}");
        tracing::debug!(session_id = %id, cols, rows, "resize ignored on pipe backend");
        Ok(())
    }

    pub async fn close(&self, id: &str) -> bool {
        self.sessions.close(id).await
    }

    pub async fn close_all(&self) {
        self.sessions.close_all().await;
    }

    pub async fn active(&self) -> usize {
        self.sessions.len().await
    }
}

/// The platform's interactive shell.
fn system_shell() -> (String, Vec<String>) {
    if cfg!(windows) {
        ("cmd.exe".to_owned(), vec!["/Q".to_owned()])
    } else {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_owned());
        (shell, vec!["-i".to_owned()])
    }
}

async fn pump_output(
    session_id: String,
    mut source: impl tokio::io::AsyncRead + Unpin,
    outbound: Outbound,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = source.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&buf[..n]);
        let frame = Envelope::new(msg::TERMINAL_OUTPUT).with_data(json!({
            "sessionId": session_id,
            "data": encoded,
        }));
        if outbound.send(frame).is_err() {
            // Channel down or backpressured; output for this chunk is lost,
            // which the at-least-once contract does not cover for terminals.
            continue;
        }
    }
}

async fn pump_stdin(
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            _ = cancel.cancelled() => break,
            data = rx.recv() => match data {
                Some(data) => data,
                None => break,
            },
        };
        if stdin.write_all(&data).await.is_err() {
            break;
        }
        let _ = stdin.flush().await;
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
