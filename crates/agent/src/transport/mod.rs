// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane transport: the persistent WebSocket session to the
//! server, its framing, and typed-message dispatch.

pub mod client;
pub mod dispatch;
pub mod envelope;

pub use client::{ControlClient, LinkEvent, Outbound};
pub use dispatch::Dispatcher;
pub use envelope::{msg, Envelope, MAX_FRAME_BYTES};

use std::time::Duration;

/// Health probe cadence while waiting for the server to come back.
pub const HEALTH_POLL: Duration = Duration::from_millis(250);
/// Health probe HTTP timeout.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
/// Transport ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Grace per ping; two consecutive missed pongs force-close.
pub const PONG_GRACE: Duration = Duration::from_secs(5);
/// Read deadline on every frame, reset on each successful read.
pub const READ_DEADLINE: Duration = Duration::from_secs(65);
/// How long to wait for `auth_response` after the upgrade.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Outbound queue depth; `send` fails synchronously on overflow.
pub const OUTBOUND_CAPACITY: usize = 100;

/// Derive the `/ws/agent` WebSocket URL from the HTTP base URL.
pub fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if base.starts_with("https://") {
        base.replacen("https://", "wss://", 1)
    } else {
        base.replacen("http://", "ws://", 1)
    };
    format!("{ws_base}/ws/agent")
}

/// Derive the health probe URL from the HTTP base URL.
pub fn health_url(base_url: &str) -> String {
    format!("{}/health", base_url.trim_end_matches('/'))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
