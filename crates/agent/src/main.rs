// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use sentinel::cli::{embedded_config, Config};
use sentinel::paths::DataDir;
use sentinel::service;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let _log_guard = init_logging(&config);

    let code = dispatch(config).await;
    std::process::exit(code);
}

async fn dispatch(config: Config) -> i32 {
    let svc = service::platform();

    if config.install {
        let (server, token) = match (&config.server, &config.token) {
            (Some(server), Some(token)) => (server.clone(), token.clone()),
            _ => match embedded_config() {
                Some(embedded) => (embedded.server_url.to_owned(), embedded.token.to_owned()),
                None => {
                    eprintln!("error: --install requires --server and --token");
                    return 1;
                }
            },
        };
        // Persist the bootstrap config before the service starts, so the
        // `--service` invocation finds its credentials on disk.
        if let Err(e) = bootstrap_config(&config, &server, &token) {
            eprintln!("error: {e:#}");
            return 1;
        }
        return match svc.install(&server, &token) {
            Ok(()) => {
                println!("installed");
                0
            }
            Err(e) => {
                eprintln!("error: {e:#}");
                1
            }
        };
    }

    if config.uninstall {
        return match svc.uninstall() {
            Ok(()) => {
                println!("uninstalled");
                0
            }
            Err(e) => {
                eprintln!("error: {e:#}");
                1
            }
        };
    }

    if config.status {
        return print_status(&config, svc.as_ref());
    }

    if config.service {
        return run_service(config, svc.as_ref()).await;
    }

    // No mode flag: a provisioned binary self-installs, anything else is
    // a usage error.
    if let Some(embedded) = embedded_config() {
        if !svc.is_elevated() {
            eprintln!("error: embedded auto-install requires elevation");
            return 1;
        }
        return match svc.install(embedded.server_url, embedded.token) {
            Ok(()) => {
                println!("installed from embedded configuration");
                0
            }
            Err(e) => {
                eprintln!("error: {e:#}");
                1
            }
        };
    }

    eprintln!("error: one of --install, --uninstall, --service, --status is required");
    1
}

async fn run_service(config: Config, svc: &dyn service::ServiceManager) -> i32 {
    match sentinel::run::run(config).await {
        Ok(outcome) => {
            if outcome.uninstall_requested {
                if let Err(e) = svc.uninstall() {
                    error!("uninstall after shutdown failed: {e:#}");
                    return 1;
                }
            }
            0
        }
        Err(e) => {
            error!("fatal: {e:#}");
            1
        }
    }
}

fn bootstrap_config(config: &Config, server: &str, token: &str) -> anyhow::Result<()> {
    let dirs = DataDir::resolve(config.data_dir.as_deref());
    if dirs.config().exists() {
        return Ok(());
    }
    dirs.ensure()?;
    let key = sentinel::secrets::machine_key()?;
    let settings = sentinel::settings::Settings::bootstrap(server.to_owned(), token.to_owned());
    settings.save(&dirs.config(), &key)
}

fn print_status(config: &Config, svc: &dyn service::ServiceManager) -> i32 {
    let dirs = DataDir::resolve(config.data_dir.as_deref());
    match svc.status() {
        Ok(status) => println!("service: {}", status.as_str()),
        Err(e) => println!("service: unknown ({e})"),
    }

    match sentinel::ipc::read_json::<sentinel::ipc::AgentInfo>(&dirs.agent_info()) {
        Ok(Some(info)) => {
            println!("agent:   v{} (pid {}, started {})", info.version, info.pid, info.started_at);
        }
        _ => println!("agent:   no beacon"),
    }

    println!("config:  {}", if dirs.config().exists() { "present" } else { "missing" });
    0
}

/// Console logging always; `agent.log` in the data directory when
/// running as the service. The returned guard keeps the non-blocking
/// file writer flushing until exit.
fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));

    type Base = tracing_subscriber::layer::Layered<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>;
    type WithConsole = tracing_subscriber::layer::Layered<
        Box<dyn tracing_subscriber::layer::Layer<Base> + Send + Sync>,
        Base,
    >;

    let mut guard = None;
    let file_layer: Option<Box<dyn tracing_subscriber::layer::Layer<WithConsole> + Send + Sync>> = if config.service {
        let dirs = DataDir::resolve(config.data_dir.as_deref());
        let _ = dirs.ensure();
        let appender = tracing_appender::rolling::never(dirs.root().to_path_buf(), "agent.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        Some(Box::new(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)))
    } else {
        None
    };

    let console_layer: Box<dyn tracing_subscriber::layer::Layer<Base> + Send + Sync> = if config.log_format == "json" {
        Box::new(tracing_subscriber::fmt::layer().json())
    } else {
        Box::new(tracing_subscriber::fmt::layer())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    guard
}
