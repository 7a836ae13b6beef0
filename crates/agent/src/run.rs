// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent bootstrap: load config, enroll, open the control channel, and
//! keep the background loops alive until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::cli::{embedded_config, Config};
use crate::offline::OfflineStore;
use crate::paths::DataDir;
use crate::secrets::machine_key;
use crate::session::remote::RemoteManager;
use crate::settings::Settings;
use crate::state::Agent;
use crate::transport::client::ClientConfig;
use crate::transport::{ControlClient, LinkEvent};
use crate::{enroll, handlers, heartbeat, metrics, resync, tamper, update};

/// What the caller should do after the run loop drains.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub uninstall_requested: bool,
}

/// Run the agent until shutdown. This is the `--service` entry point.
pub async fn run(config: Config) -> anyhow::Result<RunOutcome> {
    let dirs = DataDir::resolve(config.data_dir.as_deref());
    dirs.ensure()?;
    let key = machine_key()?;

    let mut settings = load_or_bootstrap(&config, &dirs, &key)?;

    // Configs migrated from very old installs may predate agent IDs.
    if settings.agent_id.is_empty() {
        settings.agent_id = uuid::Uuid::new_v4().to_string();
        settings.save(&dirs.config(), &key)?;
        tracing::info!(agent_id = %settings.agent_id, "assigned agent ID to legacy config");
    }

    // One-shot enrollment; on failure the channel-level needsEnrollment
    // callback retries once the server is reachable again.
    if !settings.enrolled {
        match try_enroll(&settings).await {
            Ok(applied) => {
                settings = applied;
                settings.save(&dirs.config(), &key)?;
            }
            Err(e) => {
                tracing::warn!(err = %e, "initial enrollment failed, deferring to reconnect");
            }
        }
    }

    let shutdown = CancellationToken::new();
    let client = ControlClient::new(ClientConfig {
        server_url: settings.server_url.clone(),
        agent_id: settings.agent_id.clone(),
        enrollment_token: settings.enrollment_token.clone(),
        device_info: metrics::device_info(env!("CARGO_PKG_VERSION")),
        health_poll: Duration::from_millis(config.health_poll_ms.max(50)),
    });
    let offline = Arc::new(OfflineStore::open(dirs.offline_store())?);

    let agent = Agent::new(
        dirs.clone(),
        key,
        settings,
        Arc::clone(&client),
        offline,
        Arc::new(RemoteManager::headless()),
        shutdown.clone(),
    );
    client.install_dispatcher(Arc::new(handlers::build(Arc::clone(&agent))));

    // First beacon before anything network-facing; the watchdog must see
    // liveness even when the server is down.
    {
        let agent_id = agent.settings.read().await.agent_id.clone();
        if let Err(e) = heartbeat::write_beacon(&agent, &agent_id) {
            tracing::warn!(err = %e, "initial beacon write failed");
        }
    }

    serve_control_socket(&agent, &shutdown)?;

    // Subscribers first, the connection last, so the first
    // `Authenticated` event has an audience.
    tokio::spawn(heartbeat::heartbeat_loop(Arc::clone(&agent)));
    tokio::spawn(metrics::metrics_loop(Arc::clone(&agent)));
    tokio::spawn(resync::resync_loop(Arc::clone(&agent)));
    tokio::spawn(tamper::tamper_loop(Arc::clone(&agent)));
    tokio::spawn(enrollment_watch(Arc::clone(&agent)));
    tokio::spawn(update::report_boot_status(Arc::clone(&agent)));
    tokio::spawn(Arc::clone(&client).run(shutdown.clone()));

    tracing::info!(version = %agent.version, "agent running");

    tokio::select! {
        _ = shutdown.cancelled() => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!(err = %e, "signal listener failed");
            }
            shutdown.cancel();
        }
    }

    tracing::info!("agent shutting down");
    agent.close_all_sessions().await;
    // Give in-flight writes a beat to drain before the process exits.
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(RunOutcome {
        uninstall_requested: agent
            .uninstall_requested
            .load(std::sync::atomic::Ordering::Acquire),
    })
}

/// Load the encrypted config, or bootstrap a fresh record from CLI or
/// embedded parameters.
fn load_or_bootstrap(
    config: &Config,
    dirs: &DataDir,
    key: &crate::secrets::MachineKey,
) -> anyhow::Result<Settings> {
    let path = dirs.config();
    if path.exists() {
        return Settings::load(&path, key);
    }

    let (server, token) = match (&config.server, &config.token) {
        (Some(server), Some(token)) => (server.clone(), token.clone()),
        _ => match embedded_config() {
            Some(embedded) => (embedded.server_url.to_owned(), embedded.token.to_owned()),
            None => anyhow::bail!(
                "no config at {} and no --server/--token to bootstrap from",
                path.display()
            ),
        },
    };

    let settings = Settings::bootstrap(server, token);
    settings.save(&path, key).context("persist bootstrap config")?;
    tracing::info!(agent_id = %settings.agent_id, "bootstrapped fresh config");
    Ok(settings)
}

/// Enroll and fold the server's reply into a settings copy.
async fn try_enroll(settings: &Settings) -> anyhow::Result<Settings> {
    let response = enroll::enroll(
        &settings.server_url,
        &settings.enrollment_token,
        &settings.agent_id,
        metrics::device_info(env!("CARGO_PKG_VERSION")),
    )
    .await?;

    let mut updated = settings.clone();
    updated.device_id = response.device_id;
    updated.enrolled = true;
    if let Some(config) = response.config {
        if let Some(heartbeat) = config.heartbeat_interval {
            updated.heartbeat_interval = heartbeat.max(1);
        }
        if let Some(metrics_interval) = config.metrics_interval {
            updated.metrics_interval = metrics_interval.max(1);
        }
    }
    tracing::info!(device_id = %updated.device_id, "enrolled");
    Ok(updated)
}

/// Re-enroll when the server rejects auth with `needsEnrollment` (stale
/// device ID after a server-side wipe).
async fn enrollment_watch(agent: Arc<Agent>) {
    let mut events = agent.client.subscribe();
    loop {
        let event = tokio::select! {
            _ = agent.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(_) => continue,
            },
        };
        if !matches!(event, LinkEvent::AuthRejected { needs_enrollment: true }) {
            continue;
        }

        let snapshot = agent.settings.read().await.clone();
        match try_enroll(&snapshot).await {
            Ok(updated) => {
                *agent.settings.write().await = updated;
                if let Err(e) = agent.save_settings().await {
                    tracing::warn!(err = %e, "could not persist re-enrollment");
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "re-enrollment failed");
            }
        }
    }
}

/// Answer watchdog commands on the agent's control socket.
#[cfg(unix)]
fn serve_control_socket(agent: &Arc<Agent>, shutdown: &CancellationToken) -> anyhow::Result<()> {
    use crate::ipc::{serve_pipe, PipeCommand};

    let version = agent.version.clone();
    let stop = shutdown.clone();
    serve_pipe(
        agent.dirs.control_socket(),
        Arc::new(move |cmd| match cmd {
            PipeCommand::VersionQuery => version.clone(),
            PipeCommand::Shutdown => {
                stop.cancel();
                "ok".to_owned()
            }
            PipeCommand::UpdateReady => "ok".to_owned(),
        }),
        shutdown.clone(),
    )
}

#[cfg(not(unix))]
fn serve_control_socket(_agent: &Arc<Agent>, _shutdown: &CancellationToken) -> anyhow::Result<()> {
    Ok(())
}
