// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler registration: the message-type → handler map the control
//! client dispatches into.
//!
//! Every handler follows the same contract: parse the payload, do the
//! work, return the reply envelope. Failures become a failed `response`
//! bound to the request ID (the dispatcher does that conversion), never
//! a channel error.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::ipc::UpdateRequest;
use crate::session::remote::QualityPreset;
use crate::session::{files, scan};
use crate::state::{Agent, Severity};
use crate::transport::{msg, Dispatcher, Envelope};
use crate::{admin, update};

/// Default and maximum command execution timeouts.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const COMMAND_TIMEOUT_MAX: Duration = Duration::from_secs(600);

/// Build the full dispatch table for `agent`.
pub fn build(agent: Arc<Agent>) -> Dispatcher {
    let mut d = Dispatcher::new();

    macro_rules! handler {
        ($type:expr, $func:path) => {{
            let agent = Arc::clone(&agent);
            d.register($type, move |env| {
                let agent = Arc::clone(&agent);
                async move { $func(agent, env).await }
            });
        }};
    }

    handler!(msg::EXECUTE_COMMAND, execute_command);
    handler!(msg::EXECUTE_SCRIPT, execute_script);

    handler!(msg::START_TERMINAL, start_terminal);
    handler!(msg::TERMINAL_INPUT, terminal_input);
    handler!(msg::TERMINAL_RESIZE, terminal_resize);
    handler!(msg::CLOSE_TERMINAL, close_terminal);

    handler!(msg::LIST_DRIVES, list_drives);
    handler!(msg::LIST_FILES, list_files);
    handler!(msg::SCAN_DIRECTORY, scan_directory);
    handler!(msg::DOWNLOAD_FILE, download_file);
    handler!(msg::UPLOAD_FILE, upload_file);
    handler!(msg::FILE_DATA, file_data);

    handler!(msg::START_REMOTE, start_remote);
    handler!(msg::STOP_REMOTE, stop_remote);
    handler!(msg::REMOTE_INPUT, remote_input);
    handler!(msg::WEBRTC_START, webrtc_unavailable);
    handler!(msg::WEBRTC_SIGNAL, webrtc_unavailable);
    handler!(msg::WEBRTC_STOP, webrtc_unavailable);

    handler!(msg::COLLECT_DIAGNOSTICS, collect_diagnostics);
    handler!(msg::UNINSTALL_AGENT, uninstall_agent);
    handler!(msg::ADMIN_DISCOVER, admin_discover);
    handler!(msg::ADMIN_DEMOTE, admin_demote);
    handler!(msg::SET_METRICS_INTERVAL, set_metrics_interval);
    handler!(msg::UPDATE_CERTIFICATE, update_certificate);
    handler!(msg::UPDATE_AGENT, update_agent);
    handler!(msg::HEALTH_REPORT, health_report);

    handler!(msg::HANDSHAKE, handshake);
    handler!(msg::HEARTBEAT_ACK, ignore);
    handler!(msg::SYNC_RESPONSE, ignore);
    handler!(msg::BULK_METRICS_ACK, bulk_metrics_ack);
    handler!(msg::ERROR, server_error);

    d
}

fn rid(env: &Envelope) -> anyhow::Result<String> {
    env.request_id
        .clone()
        .ok_or_else(|| anyhow::anyhow!("{} requires a requestId", env.msg_type))
}

// -- Command execution --------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecPayload {
    #[serde(default)]
    command: String,
    #[serde(default)]
    script: String,
    #[serde(default)]
    interpreter: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn exec_timeout(requested: Option<u64>) -> Duration {
    requested
        .map(Duration::from_secs)
        .map(|t| t.min(COMMAND_TIMEOUT_MAX))
        .unwrap_or(COMMAND_TIMEOUT)
}

async fn run_to_completion(
    mut cmd: tokio::process::Command,
    timeout: Duration,
) -> anyhow::Result<serde_json::Value> {
    cmd.kill_on_drop(true);
    cmd.stdin(std::process::Stdio::null());
    let started = std::time::Instant::now();
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("command timed out after {}s", timeout.as_secs()))?
        .context("spawn command")?;

    Ok(json!({
        "exitCode": output.status.code(),
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "durationMs": started.elapsed().as_millis() as u64,
    }))
}

fn shell_command(command_line: &str) -> tokio::process::Command {
    if cfg!(windows) {
        let mut cmd = tokio::process::Command::new("cmd.exe");
        cmd.args(["/C", command_line]);
        cmd
    } else {
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.args(["-c", command_line]);
        cmd
    }
}

async fn execute_command(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: ExecPayload = env.parse_data()?;
    anyhow::ensure!(!payload.command.is_empty(), "empty command");

    let result =
        run_to_completion(shell_command(&payload.command), exec_timeout(payload.timeout_secs))
            .await?;
    let mut reply = Envelope::new(msg::COMMAND_RESULT).with_request_id(rid).with_data(result);
    reply.success = Some(true);
    Ok(Some(reply))
}

async fn execute_script(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: ExecPayload = env.parse_data()?;
    anyhow::ensure!(!payload.script.is_empty(), "empty script");

    let extension = if cfg!(windows) { "ps1" } else { "sh" };
    let script_path = std::env::temp_dir()
        .join(format!("sentinel-script-{}.{extension}", uuid::Uuid::new_v4()));
    tokio::fs::write(&script_path, &payload.script).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o700))?;
    }

    let mut cmd = match payload.interpreter.as_deref() {
        Some(interpreter) => {
            let mut cmd = tokio::process::Command::new(interpreter);
            cmd.arg(&script_path);
            cmd
        }
        None if cfg!(windows) => {
            let mut cmd = tokio::process::Command::new("powershell.exe");
            cmd.args(["-ExecutionPolicy", "Bypass", "-File"]).arg(&script_path);
            cmd
        }
        None => {
            let mut cmd = tokio::process::Command::new("/bin/sh");
            cmd.arg(&script_path);
            cmd
        }
    };
    cmd.stdin(std::process::Stdio::null());

    let result = run_to_completion(cmd, exec_timeout(payload.timeout_secs)).await;
    let _ = tokio::fs::remove_file(&script_path).await;

    let mut reply =
        Envelope::new(msg::COMMAND_RESULT).with_request_id(rid).with_data(result?);
    reply.success = Some(true);
    Ok(Some(reply))
}

// -- Terminal sessions --------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalPayload {
    session_id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    cols: Option<u16>,
    #[serde(default)]
    rows: Option<u16>,
}

async fn start_terminal(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: TerminalPayload = env.parse_data()?;
    let pid = agent
        .terminals
        .start(&payload.session_id, agent.client.outbound(), &agent.shutdown)
        .await?;
    Ok(Some(Envelope::response_ok(&rid, json!({ "sessionId": payload.session_id, "pid": pid }))))
}

async fn terminal_input(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let payload: TerminalPayload = env.parse_data()?;
    let text = payload.data.unwrap_or_default();
    // Input arrives base64-wrapped like output; tolerate plain text from
    // older consoles.
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&text)
        .unwrap_or_else(|_| text.into_bytes());
    agent.terminals.write_input(&payload.session_id, &bytes).await?;
    Ok(None)
}

async fn terminal_resize(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let payload: TerminalPayload = env.parse_data()?;
    agent
        .terminals
        .resize(&payload.session_id, payload.cols.unwrap_or(80), payload.rows.unwrap_or(24))
        .await?;
    Ok(None)
}

async fn close_terminal(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let payload: TerminalPayload = env.parse_data()?;
    let existed = agent.terminals.close(&payload.session_id).await;
    match env.request_id {
        Some(rid) => {
            Ok(Some(Envelope::response_ok(&rid, json!({ "closed": existed }))))
        }
        None => Ok(None),
    }
}

// -- File operations ----------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePayload {
    #[serde(default)]
    path: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    append: Option<bool>,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    max_depth: Option<u32>,
}

async fn list_drives(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    Ok(Some(Envelope::response_ok(&rid, files::list_drives())))
}

async fn list_files(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: FilePayload = env.parse_data()?;
    let listing = files::list_files(&payload.path).await?;
    Ok(Some(Envelope::response_ok(&rid, listing)))
}

async fn scan_directory(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: FilePayload = env.parse_data()?;
    let totals = scan::scan_directory(
        &payload.path,
        payload.max_depth,
        &rid,
        agent.client.outbound(),
        agent.shutdown.child_token(),
    )
    .await?;
    Ok(Some(Envelope::response_ok(&rid, totals.to_json())))
}

async fn download_file(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: FilePayload = env.parse_data()?;
    let summary = files::send_file(
        &payload.path,
        &rid,
        agent.client.outbound(),
        agent.shutdown.child_token(),
    )
    .await?;
    Ok(Some(Envelope::response_ok(&rid, summary)))
}

async fn upload_file(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: FilePayload = env.parse_data()?;
    let session_id = payload.session_id.clone().unwrap_or_else(|| rid.clone());
    agent
        .transfers
        .begin_upload(
            &session_id,
            &payload.path,
            payload.size.unwrap_or(0),
            payload.append.unwrap_or(false),
            &agent.shutdown,
        )
        .await?;
    Ok(Some(Envelope::response_ok(&rid, json!({ "sessionId": session_id }))))
}

async fn file_data(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let payload: FilePayload = env.parse_data()?;
    let session_id = payload
        .session_id
        .clone()
        .or_else(|| env.request_id.clone())
        .ok_or_else(|| anyhow::anyhow!("file_data without a session"))?;

    if let Some(chunk) = payload.chunk.as_deref() {
        agent.transfers.write_chunk(&session_id, chunk).await?;
    }
    if payload.done.unwrap_or(false) {
        let summary = agent.transfers.finish(&session_id).await?;
        let rid = rid(&env)?;
        return Ok(Some(Envelope::response_ok(&rid, summary)));
    }
    Ok(None)
}

// -- Remote desktop -----------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemotePayload {
    session_id: String,
    #[serde(default)]
    monitor: Option<usize>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    clipboard_sync: Option<bool>,
    #[serde(default)]
    event: Option<serde_json::Value>,
}

async fn start_remote(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: RemotePayload = env.parse_data()?;
    let quality = QualityPreset::parse(payload.quality.as_deref().unwrap_or("medium"));
    agent
        .remotes
        .start(
            &payload.session_id,
            payload.monitor,
            quality,
            payload.clipboard_sync.unwrap_or(false),
            agent.client.outbound(),
            &agent.shutdown,
        )
        .await?;
    let (jpeg_quality, fps) = quality.tuning();
    Ok(Some(Envelope::response_ok(
        &rid,
        json!({ "sessionId": payload.session_id, "fps": fps, "jpegQuality": jpeg_quality }),
    )))
}

async fn stop_remote(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let payload: RemotePayload = env.parse_data()?;
    let existed = agent.remotes.stop(&payload.session_id).await;
    match env.request_id {
        Some(rid) => Ok(Some(Envelope::response_ok(&rid, json!({ "stopped": existed })))),
        None => Ok(None),
    }
}

async fn remote_input(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let payload: RemotePayload = env.parse_data()?;
    let event = payload.event.unwrap_or(serde_json::Value::Null);
    agent.remotes.input(&payload.session_id, &event).await?;
    Ok(None)
}

async fn webrtc_unavailable(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    anyhow::bail!("webrtc transport is not available in this build (type {})", env.msg_type)
}

// -- Administration -----------------------------------------------------------

async fn collect_diagnostics(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let settings = agent.settings.read().await;
    let log_tail = read_log_tail(&agent.dirs.agent_log(), 100);
    Ok(Some(Envelope::response_ok(
        &rid,
        json!({
            "version": agent.version,
            "uptimeSecs": agent.uptime_secs(),
            "connected": agent.client.is_connected(),
            "authenticated": agent.client.is_authenticated(),
            "serverUrl": settings.server_url,
            "deviceId": settings.device_id,
            "heartbeatInterval": settings.heartbeat_interval,
            "metricsInterval": settings.metrics_interval,
            "terminalSessions": agent.terminals.active().await,
            "remoteSessions": agent.remotes.active().await,
            "logTail": log_tail,
        }),
    )))
}

fn read_log_tail(path: &std::path::Path, lines: usize) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let all: Vec<&str> = contents.lines().collect();
            all.iter().rev().take(lines).rev().map(|s| (*s).to_owned()).collect()
        }
        Err(_) => Vec::new(),
    }
}

async fn uninstall_agent(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    tracing::warn!("uninstall requested by server");
    agent.publish_event(Severity::Warning, "uninstall", json!({"source": "server"}));
    agent.uninstall_requested.store(true, Ordering::Release);

    // Reply first; the shutdown races the response out of the queue.
    let reply = Envelope::response_ok(&rid, json!({ "uninstalling": true }));
    let shutdown = agent.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
    });
    Ok(Some(reply))
}

async fn admin_discover(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let admins = admin::discover()?;
    Ok(Some(Envelope::response_ok(&rid, admins)))
}

async fn admin_demote(_agent: Arc<Agent>, _env: Envelope) -> anyhow::Result<Option<Envelope>> {
    anyhow::bail!("account demotion requires the platform administration layer")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntervalPayload {
    seconds: u64,
}

async fn set_metrics_interval(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: IntervalPayload = env.parse_data()?;
    anyhow::ensure!(
        (1..=3600).contains(&payload.seconds),
        "metrics interval must be 1..=3600 seconds"
    );

    {
        let mut settings = agent.settings.write().await;
        settings.metrics_interval = payload.seconds;
    }
    agent.save_settings().await?;
    agent.metrics_interval_changed.notify_waiters();
    Ok(Some(Envelope::response_ok(&rid, json!({ "metricsInterval": payload.seconds }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertPayload {
    certificate: String,
}

async fn update_certificate(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let payload: CertPayload = env.parse_data()?;
    anyhow::ensure!(
        payload.certificate.contains("BEGIN CERTIFICATE"),
        "payload is not a PEM certificate"
    );
    let path = agent.dirs.server_cert();
    tokio::fs::write(&path, payload.certificate.as_bytes()).await?;
    tracing::info!(path = %path.display(), "server certificate updated");

    let mut reply = Envelope::new(msg::CERT_UPDATE_ACK).with_request_id(rid);
    reply.success = Some(true);
    Ok(Some(reply))
}

async fn update_agent(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    let mut request: UpdateRequest = env.parse_data()?;
    if request.target_path.is_empty() {
        request.target_path = std::env::current_exe()?.to_string_lossy().into_owned();
    }
    update::stage_update(&agent, request.clone()).await?;
    Ok(Some(Envelope::response_ok(&rid, json!({ "staged": true, "version": request.version }))))
}

async fn health_report(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    let rid = rid(&env)?;
    Ok(Some(Envelope::response_ok(
        &rid,
        json!({
            "version": agent.version,
            "uptimeSecs": agent.uptime_secs(),
            "terminalSessions": agent.terminals.active().await,
            "remoteSessions": agent.remotes.active().await,
            "pendingOffline": {
                "metrics": agent.offline.pending_count(crate::offline::QueueKind::Metrics),
                "events": agent.offline.pending_count(crate::offline::QueueKind::Event),
            },
        }),
    )))
}

// -- Channel bookkeeping ------------------------------------------------------

async fn handshake(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    tracing::debug!(data = ?env.data, "server handshake");
    Ok(None)
}

async fn ignore(_agent: Arc<Agent>, _env: Envelope) -> anyhow::Result<Option<Envelope>> {
    Ok(None)
}

async fn bulk_metrics_ack(agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    if let Some(rid) = env.request_id {
        let _ = agent.sync_ack_tx.try_send(rid);
    }
    Ok(None)
}

async fn server_error(_agent: Arc<Agent>, env: Envelope) -> anyhow::Result<Option<Envelope>> {
    tracing::warn!(
        error = env.error.as_deref().unwrap_or("unspecified"),
        request_id = env.request_id.as_deref().unwrap_or("-"),
        "server reported an error"
    );
    Ok(None)
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
