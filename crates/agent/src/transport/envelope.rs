// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wire envelope and message-type catalogue.
//!
//! One JSON text frame carries one envelope. The type tag is an open
//! string (dispatch is a registration map, so new types are additive);
//! the constants below are the known catalogue.

use serde::{Deserialize, Serialize};

/// Frames larger than this terminate the connection as a protocol violation.
pub const MAX_FRAME_BYTES: usize = 512 * 1024;

/// A single control-channel frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, alias = "payload", skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl Envelope {
    pub fn new(msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.to_owned(),
            request_id: None,
            data: None,
            success: None,
            error: None,
            timestamp: Some(chrono::Utc::now()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Successful `response` frame bound to a request.
    pub fn response_ok(request_id: &str, data: serde_json::Value) -> Self {
        let mut env = Self::new(msg::RESPONSE).with_request_id(request_id).with_data(data);
        env.success = Some(true);
        env
    }

    /// Failed `response` frame bound to a request.
    pub fn response_err(request_id: &str, error: impl Into<String>) -> Self {
        let mut env = Self::new(msg::RESPONSE).with_request_id(request_id);
        env.success = Some(false);
        env.error = Some(error.into());
        env
    }

    /// Typed progress frame carrying the originating request ID.
    pub fn progress(msg_type: &str, request_id: &str, data: serde_json::Value) -> Self {
        Self::new(msg_type).with_request_id(request_id).with_data(data)
    }

    /// Pull a typed payload out of `data`.
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        let data = self.data.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// Message type tags.
pub mod msg {
    // Connection & lifecycle
    pub const AUTH: &str = "auth";
    pub const AUTH_RESPONSE: &str = "auth_response";
    pub const HANDSHAKE: &str = "handshake";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_ACK: &str = "heartbeat_ack";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const RESPONSE: &str = "response";
    pub const ERROR: &str = "error";

    // Telemetry
    pub const METRICS: &str = "metrics";
    pub const EVENT: &str = "event";
    pub const HEALTH_REPORT: &str = "health_report";
    pub const SET_METRICS_INTERVAL: &str = "set_metrics_interval";

    // Command execution
    pub const EXECUTE_COMMAND: &str = "execute_command";
    pub const EXECUTE_SCRIPT: &str = "execute_script";
    pub const COMMAND_RESULT: &str = "command_result";

    // Terminal sessions
    pub const START_TERMINAL: &str = "start_terminal";
    pub const TERMINAL_INPUT: &str = "terminal_input";
    pub const TERMINAL_OUTPUT: &str = "terminal_output";
    pub const TERMINAL_RESIZE: &str = "terminal_resize";
    pub const CLOSE_TERMINAL: &str = "close_terminal";

    // File operations
    pub const LIST_DRIVES: &str = "list_drives";
    pub const LIST_FILES: &str = "list_files";
    pub const SCAN_DIRECTORY: &str = "scan_directory";
    pub const SCAN_PROGRESS: &str = "scan_progress";
    pub const DOWNLOAD_FILE: &str = "download_file";
    pub const UPLOAD_FILE: &str = "upload_file";
    pub const FILE_DATA: &str = "file_data";

    // Remote desktop
    pub const START_REMOTE: &str = "start_remote";
    pub const STOP_REMOTE: &str = "stop_remote";
    pub const REMOTE_INPUT: &str = "remote_input";
    pub const REMOTE_FRAME: &str = "remote_frame";
    pub const CLIPBOARD_SYNC: &str = "clipboard_sync";
    pub const WEBRTC_START: &str = "webrtc_start";
    pub const WEBRTC_SIGNAL: &str = "webrtc_signal";
    pub const WEBRTC_STOP: &str = "webrtc_stop";

    // Administration
    pub const COLLECT_DIAGNOSTICS: &str = "collect_diagnostics";
    pub const UNINSTALL_AGENT: &str = "uninstall_agent";
    pub const ADMIN_DISCOVER: &str = "admin_discover";
    pub const ADMIN_DEMOTE: &str = "admin_demote";
    pub const ADMIN_EVENT: &str = "admin_event";
    pub const UPDATE_CERTIFICATE: &str = "update_certificate";
    pub const CERT_UPDATE_ACK: &str = "cert_update_ack";
    pub const UPDATE_STATUS: &str = "update_status";
    pub const UPDATE_AGENT: &str = "update_agent";

    // Offline resync
    pub const SYNC_REQUEST: &str = "sync_request";
    pub const SYNC_RESPONSE: &str = "sync_response";
    pub const BULK_METRICS: &str = "bulk_metrics";
    pub const BULK_METRICS_ACK: &str = "bulk_metrics_ack";
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
