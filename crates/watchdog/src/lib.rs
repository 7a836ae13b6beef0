// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sentinel watchdog: the sibling privileged process that applies staged
//! agent updates with verification, health monitoring, and rollback.

pub mod config;
pub mod monitor;
pub mod orchestrator;
pub mod protect;
pub mod service;
pub mod swap;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use sentinel::ipc::{self, UpdateRequest, UpdateState, UpdateStatus};
use sentinel::paths::DataDir;
use tokio_util::sync::CancellationToken;

use crate::config::WatchdogConfig;
use crate::orchestrator::{MonitorTuning, Orchestrator};

/// Run the watchdog until shutdown.
pub async fn run(config: WatchdogConfig) -> anyhow::Result<()> {
    let dirs = DataDir::resolve(config.data_dir.as_deref());
    dirs.ensure()?;

    recover_from_crash(&dirs)?;

    let shutdown = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        dirs.clone(),
        service::platform(&config.service),
        Box::new(protect::NoopProtection),
        config.service_timeout(),
        MonitorTuning { window: config.monitor_window(), tick: config.monitor_tick() },
    );

    let wake = Arc::new(tokio::sync::Notify::new());
    serve_control_socket(&dirs, &shutdown, Arc::clone(&wake))?;

    tracing::info!(
        data_dir = %dirs.root().display(),
        poll_secs = config.poll_secs,
        "watchdog running"
    );

    // One update in flight, ever: this loop is the only consumer.
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::signal::ctrl_c() => {
                shutdown.cancel();
                break;
            }
            _ = wake.notified() => {}
            _ = tokio::time::sleep(config.poll_interval()) => {}
        }

        let request = match ipc::read_json::<UpdateRequest>(&dirs.update_request()) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "unreadable update request, removing");
                let _ = std::fs::remove_file(dirs.update_request());
                continue;
            }
        };

        let status = orchestrator.apply_update(&request).await;
        tracing::info!(
            state = %status.state.as_str(),
            version = %status.version,
            "update finished"
        );
    }

    tracing::info!("watchdog shutting down");
    Ok(())
}

/// A pre-existing `applying` status means a previous watchdog died
/// mid-swap. The filesystem may hold any mixture of old and new binary;
/// retrying silently could double-apply a half-finished swap, so the
/// state is marked failed and any pending request is parked for manual
/// recovery.
fn recover_from_crash(dirs: &DataDir) -> anyhow::Result<()> {
    let status_path = dirs.update_status();
    let Some(mut status) = ipc::read_json::<UpdateStatus>(&status_path)? else {
        return Ok(());
    };
    if status.state != UpdateState::Applying {
        return Ok(());
    }

    tracing::error!(
        version = %status.version,
        "found an in-flight update from a previous run; manual recovery required"
    );
    status.state = UpdateState::Failed;
    status.completed_at = Some(chrono::Utc::now());
    status.error = Some(
        "watchdog terminated mid-update; the binary state is unverified and \
         requires manual recovery"
            .to_owned(),
    );
    ipc::write_json(&status_path, &status)?;

    let request_path = dirs.update_request();
    if request_path.exists() {
        let parked = request_path.with_extension("json.crashed");
        if let Err(e) = std::fs::rename(&request_path, &parked) {
            tracing::warn!(err = %e, "could not park the stale update request");
        } else {
            tracing::warn!(parked = %parked.display(), "stale update request parked");
        }
    }
    Ok(())
}

/// Watchdog end of the named channel: wakes the poll loop when the agent
/// announces a staged update, answers version queries, accepts shutdown.
#[cfg(unix)]
fn serve_control_socket(
    dirs: &DataDir,
    shutdown: &CancellationToken,
    wake: Arc<tokio::sync::Notify>,
) -> anyhow::Result<()> {
    use sentinel::ipc::{serve_pipe, PipeCommand};

    let stop = shutdown.clone();
    serve_pipe(
        dirs.root().join("watchdog.sock"),
        Arc::new(move |cmd| match cmd {
            PipeCommand::UpdateReady => {
                wake.notify_one();
                "ok".to_owned()
            }
            PipeCommand::VersionQuery => env!("CARGO_PKG_VERSION").to_owned(),
            PipeCommand::Shutdown => {
                stop.cancel();
                "ok".to_owned()
            }
        }),
        shutdown.clone(),
    )
}

#[cfg(not(unix))]
fn serve_control_socket(
    _dirs: &DataDir,
    _shutdown: &CancellationToken,
    _wake: Arc<tokio::sync::Notify>,
) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
