// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote-desktop sessions.
//!
//! The capture loop, pacing, quality presets, and clipboard sync live
//! here; the actual pixels, input injection, and clipboard access are
//! platform concerns behind narrow traits. A build without a platform
//! capturer still accepts sessions and reports capture as unavailable
//! per-frame request, degrading instead of failing startup.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::transport::{msg, Envelope, Outbound};

use super::{Session, SessionMap};

/// Clipboard poll cadence when sync is enabled.
pub const CLIPBOARD_POLL: Duration = Duration::from_millis(500);

/// Platform screen capture. Implementations return an encoded JPEG for
/// the selected monitor (or the virtual bounding box when `None`).
pub trait ScreenSource: Send + Sync + 'static {
    fn capture_jpeg(&self, monitor: Option<usize>, quality: u8) -> anyhow::Result<Vec<u8>>;
}

/// Platform pointer/keyboard injection.
pub trait InputSink: Send + Sync + 'static {
    fn inject(&self, event: &serde_json::Value) -> anyhow::Result<()>;
}

/// Platform clipboard access.
pub trait ClipboardSource: Send + Sync + 'static {
    fn read_text(&self) -> anyhow::Result<String>;
    fn write_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Capture stub for headless builds.
pub struct NullScreenSource;

impl ScreenSource for NullScreenSource {
    fn capture_jpeg(&self, _monitor: Option<usize>, _quality: u8) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("screen capture is not available in this build")
    }
}

/// Input stub for headless builds.
pub struct NullInputSink;

impl InputSink for NullInputSink {
    fn inject(&self, _event: &serde_json::Value) -> anyhow::Result<()> {
        anyhow::bail!("input injection is not available in this build")
    }
}

/// Quality presets bind JPEG quality and frame rate together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    Low,
    Medium,
    High,
}

impl QualityPreset {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    /// (JPEG quality, frames per second).
    pub fn tuning(self) -> (u8, u32) {
        match self {
            Self::Low => (30, 5),
            Self::Medium => (50, 10),
            Self::High => (80, 15),
        }
    }
}

/// One live remote-desktop session.
pub struct RemoteSession {
    pub id: String,
    pub monitor: Option<usize>,
    pub quality: QualityPreset,
    /// Epoch-ms of the last frame put on the wire.
    last_frame_ms: AtomicI64,
    cancel: CancellationToken,
}

impl Session for RemoteSession {
    fn close(&self) {
        self.cancel.cancel();
    }
}

impl RemoteSession {
    pub fn last_frame_ms(&self) -> i64 {
        self.last_frame_ms.load(Ordering::Acquire)
    }
}

/// Owns all remote-desktop sessions of the process.
pub struct RemoteManager {
    sessions: SessionMap<RemoteSession>,
    screen: Arc<dyn ScreenSource>,
    input: Arc<dyn InputSink>,
    clipboard: Option<Arc<dyn ClipboardSource>>,
}

impl RemoteManager {
    pub fn new(
        screen: Arc<dyn ScreenSource>,
        input: Arc<dyn InputSink>,
        clipboard: Option<Arc<dyn ClipboardSource>>,
    ) -> Self {
        Self { sessions: SessionMap::new(), screen, input, clipboard }
    }

    /// Headless configuration: sessions are accepted, frames fail soft.
    pub fn headless() -> Self {
        Self::new(Arc::new(NullScreenSource), Arc::new(NullInputSink), None)
    }

    /// Begin a capture loop for `id`.
    pub async fn start(
        self: &Arc<Self>,
        id: &str,
        monitor: Option<usize>,
        quality: QualityPreset,
        clipboard_sync: bool,
        outbound: Outbound,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let cancel = shutdown.child_token();
        let session = Arc::new(RemoteSession {
            id: id.to_owned(),
            monitor,
            quality,
            last_frame_ms: AtomicI64::new(0),
            cancel: cancel.clone(),
        });
        self.sessions.insert(id, Arc::clone(&session)).await?;

        let manager = Arc::clone(self);
        tokio::spawn(capture_loop(manager, session, outbound.clone()));

        if clipboard_sync {
            if let Some(clipboard) = self.clipboard.clone() {
                tokio::spawn(clipboard_loop(id.to_owned(), clipboard, outbound, cancel));
            } else {
                tracing::warn!(session_id = %id, "clipboard sync requested but unavailable");
            }
        }
        Ok(())
    }

    /// Forward a peer input event to the platform sink.
    pub async fn input(&self, id: &str, event: &serde_json::Value) -> anyhow::Result<()> {
        anyhow::ensure!(self.sessions.get(id).await.is_some(), "no remote session {id}");
        self.input.inject(event)
    }

    pub async fn stop(&self, id: &str) -> bool {
        self.sessions.close(id).await
    }

    pub async fn stop_all(&self) {
        self.sessions.close_all().await;
    }

    pub async fn active(&self) -> usize {
        self.sessions.len().await
    }
}

async fn capture_loop(manager: Arc<RemoteManager>, session: Arc<RemoteSession>, outbound: Outbound) {
    let (jpeg_quality, fps) = session.quality.tuning();
    let mut ticker = tokio::time::interval(Duration::from_millis(1000 / u64::from(fps.max(1))));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut capture_down = false;

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match manager.screen.capture_jpeg(session.monitor, jpeg_quality) {
            Ok(jpeg) => {
                capture_down = false;
                let frame = Envelope::new(msg::REMOTE_FRAME).with_data(json!({
                    "sessionId": session.id,
                    "image": base64::engine::general_purpose::STANDARD.encode(&jpeg),
                    "monitor": session.monitor,
                }));
                if outbound.send(frame).is_ok() {
                    session.last_frame_ms.store(epoch_ms(), Ordering::Release);
                }
            }
            Err(e) => {
                // Log once per outage, keep ticking; capture may recover
                // (session unlock, display reattach).
                if !capture_down {
                    capture_down = true;
                    tracing::warn!(session_id = %session.id, err = %e, "frame capture failed");
                }
            }
        }
    }

    manager.sessions.forget(&session.id).await;
}

async fn clipboard_loop(
    session_id: String,
    clipboard: Arc<dyn ClipboardSource>,
    outbound: Outbound,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(CLIPBOARD_POLL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Ok(text) = clipboard.read_text() else { continue };
        if text != last {
            last = text.clone();
            let frame = Envelope::new(msg::CLIPBOARD_SYNC).with_data(json!({
                "sessionId": session_id,
                "text": text,
            }));
            let _ = outbound.send(frame);
        }
    }
}

fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
