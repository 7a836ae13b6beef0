// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Sentinel update watchdog.
#[derive(Debug, Clone, Parser)]
#[command(name = "sentinel-watchdog", version, about)]
pub struct WatchdogConfig {
    /// Override the program-data directory shared with the agent.
    #[arg(long, env = "SENTINEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// How often to look for a staged update request, in seconds.
    #[arg(long, env = "SENTINEL_WD_POLL_SECS", default_value = "5")]
    pub poll_secs: u64,

    /// Service name controlled during swaps.
    #[arg(long, env = "SENTINEL_WD_SERVICE", default_value = "sentinel-agent")]
    pub service: String,

    /// Post-swap health-monitoring window in seconds.
    #[arg(long, env = "SENTINEL_WD_MONITOR_SECS", default_value = "60")]
    pub monitor_secs: u64,

    /// Health evaluation cadence inside the window, in seconds.
    #[arg(long, env = "SENTINEL_WD_TICK_SECS", default_value = "10")]
    pub tick_secs: u64,

    /// Service start/stop poll deadline, in seconds.
    #[arg(long, env = "SENTINEL_WD_SERVICE_TIMEOUT_SECS", default_value = "30")]
    pub service_timeout_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "SENTINEL_WD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level.
    #[arg(long, env = "SENTINEL_WD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs.max(1))
    }

    pub fn monitor_window(&self) -> Duration {
        Duration::from_secs(self.monitor_secs.max(1))
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs.max(1))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
