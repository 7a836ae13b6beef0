// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! System metrics collection and the metrics loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sysinfo::System;

use crate::state::Agent;

/// Snapshot the host's vitals.
pub fn collect(sys: &mut System) -> serde_json::Value {
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let load = System::load_average();
    json!({
        "cpuPercent": sys.global_cpu_usage(),
        "memoryUsedBytes": sys.used_memory(),
        "memoryTotalBytes": sys.total_memory(),
        "swapUsedBytes": sys.used_swap(),
        "loadAvg1": load.one,
        "loadAvg5": load.five,
        "uptimeSecs": System::uptime(),
        "processCount": sys.processes().len(),
        "hostname": System::host_name(),
    })
}

/// Device identity sent with auth and enrollment.
pub fn device_info(version: &str) -> serde_json::Value {
    json!({
        "hostname": System::host_name(),
        "os": System::long_os_version(),
        "kernel": System::kernel_version(),
        "arch": std::env::consts::ARCH,
        "agentVersion": version,
    })
}

/// Collect-and-send on the configured cadence. The cadence is re-read
/// whenever `set_metrics_interval` pings the change signal.
pub async fn metrics_loop(agent: Arc<Agent>) {
    let mut sys = System::new();
    // First refresh primes the CPU counters; the first report after it
    // carries a real usage figure.
    sys.refresh_all();

    loop {
        let interval_secs = agent.settings.read().await.metrics_interval.max(1);
        let sleep = tokio::time::sleep(Duration::from_secs(interval_secs));

        tokio::select! {
            _ = agent.shutdown.cancelled() => break,
            _ = agent.metrics_interval_changed.notified() => continue,
            _ = sleep => {}
        }

        let payload = collect(&mut sys);
        agent.send_metrics(payload);
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
