// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Sentinel endpoint agent.
#[derive(Debug, Parser)]
#[command(name = "sentinel-agent", version, about)]
pub struct Config {
    /// Install as a system service and enroll against the server.
    #[arg(long)]
    pub install: bool,

    /// Remove the service and local state.
    #[arg(long)]
    pub uninstall: bool,

    /// Run the agent loop (used by the service manager).
    #[arg(long)]
    pub service: bool,

    /// Print service and enrollment status.
    #[arg(long)]
    pub status: bool,

    /// Server base URL (required with --install).
    #[arg(long, env = "SENTINEL_SERVER_URL")]
    pub server: Option<String>,

    /// Enrollment token (required with --install).
    #[arg(long, env = "SENTINEL_ENROLL_TOKEN")]
    pub token: Option<String>,

    /// Override the program-data directory.
    #[arg(long, env = "SENTINEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "SENTINEL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SENTINEL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Health probe interval in milliseconds.
    #[arg(long, env = "SENTINEL_HEALTH_POLL_MS", default_value = "250")]
    pub health_poll_ms: u64,
}

/// Server endpoint and token compiled into the binary at build time.
/// Present on provisioned builds; triggers auto-install when the binary
/// is launched with no mode flag.
pub struct EmbeddedConfig {
    pub server_url: &'static str,
    pub token: &'static str,
}

pub fn embedded_config() -> Option<EmbeddedConfig> {
    match (option_env!("SENTINEL_EMBEDDED_SERVER"), option_env!("SENTINEL_EMBEDDED_TOKEN")) {
        (Some(server_url), Some(token)) if !server_url.is_empty() && !token.is_empty() => {
            Some(EmbeddedConfig { server_url, token })
        }
        _ => None,
    }
}

impl Config {
    /// Validate flag combinations after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        let modes =
            [self.install, self.uninstall, self.service, self.status].iter().filter(|m| **m).count();
        if modes > 1 {
            anyhow::bail!("--install, --uninstall, --service, and --status are mutually exclusive");
        }

        if self.install {
            let have_server = self.server.is_some() || embedded_config().is_some();
            let have_token = self.token.is_some() || embedded_config().is_some();
            if !have_server || !have_token {
                anyhow::bail!("--install requires --server and --token");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
