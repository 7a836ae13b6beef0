// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-swap health monitoring.
//!
//! For one window after restart the watchdog evaluates the new binary:
//! beacon version, service state, resident memory, crash transitions in
//! a rolling minute, and beacon freshness. Hard failures trigger
//! immediate rollback; transient crashes that recover are logged and
//! tolerated, but the end-of-window gate still requires everything
//! healthy.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use sentinel::ipc::AgentInfo;
use sentinel::paths::DataDir;

use crate::service::{ServiceControl, ServiceState};

/// Tunable thresholds; defaults match the production cadence.
#[derive(Debug, Clone)]
pub struct MonitorParams {
    pub expected_version: String,
    pub window: Duration,
    pub tick: Duration,
    /// Stopped this long after monitoring starts → immediate rollback.
    pub stopped_grace: Duration,
    /// Version must be confirmed by this offset into the window.
    pub version_deadline: Duration,
    /// Beacon mtime older than this fails freshness.
    pub beacon_max_age: Duration,
    /// Resident set cap for the agent process.
    pub memory_cap_bytes: u64,
    /// Crash transitions tolerated per rolling window.
    pub crash_cap: u32,
    pub crash_window: Duration,
}

impl MonitorParams {
    pub fn production(expected_version: &str, window: Duration, tick: Duration) -> Self {
        Self {
            expected_version: expected_version.to_owned(),
            window,
            tick,
            stopped_grace: Duration::from_secs(10),
            version_deadline: Duration::from_secs(30),
            beacon_max_age: Duration::from_secs(15),
            memory_cap_bytes: 500 * 1024 * 1024,
            crash_cap: 2,
            crash_window: Duration::from_secs(60),
        }
    }
}

/// Why monitoring gave up.
#[derive(Debug)]
pub struct HealthFailure(pub String);

impl std::fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HealthFailure {}

/// Run the monitoring window. `Ok(())` means the update sticks.
pub async fn monitor_health(
    params: &MonitorParams,
    service: &dyn ServiceControl,
    dirs: &DataDir,
) -> Result<(), HealthFailure> {
    let started = tokio::time::Instant::now();
    let mut version_confirmed = false;
    let mut crashes: VecDeque<tokio::time::Instant> = VecDeque::new();
    let mut prev_state = service.state();
    let mut sys = sysinfo::System::new();

    loop {
        tokio::time::sleep(params.tick).await;
        let elapsed = started.elapsed();
        let now = tokio::time::Instant::now();

        let state = service.state();
        if prev_state == ServiceState::Running && state == ServiceState::Stopped {
            crashes.push_back(now);
            tracing::warn!(count = crashes.len(), "agent crash observed during monitoring");
        }
        prev_state = state;
        while let Some(front) = crashes.front() {
            if now.duration_since(*front) > params.crash_window {
                crashes.pop_front();
            } else {
                break;
            }
        }

        let beacon = sentinel::ipc::read_json::<AgentInfo>(&dirs.agent_info()).ok().flatten();
        if let Some(ref info) = beacon {
            if info.version == params.expected_version {
                version_confirmed = true;
            }
        }
        let beacon_fresh = beacon_age(&dirs.agent_info())
            .map(|age| age <= params.beacon_max_age)
            .unwrap_or(false);
        let memory_ok = match beacon.as_ref().and_then(|b| process_memory(&mut sys, b.pid)) {
            Some(rss) => rss <= params.memory_cap_bytes,
            None => {
                // Process not observable (restart in flight); memory
                // cannot fail the tick on missing evidence.
                true
            }
        };

        // Immediate rollback triggers.
        if state == ServiceState::Stopped && elapsed >= params.stopped_grace {
            return Err(HealthFailure(format!(
                "service stopped {}s into the monitoring window",
                elapsed.as_secs()
            )));
        }
        if crashes.len() as u32 >= params.crash_cap {
            return Err(HealthFailure(format!(
                "{} crashes within the rolling window",
                crashes.len()
            )));
        }
        if !memory_ok {
            return Err(HealthFailure("resident memory over the 500 MiB cap".to_owned()));
        }
        if !version_confirmed && elapsed >= params.version_deadline {
            return Err(HealthFailure(format!(
                "version {} not confirmed within {}s",
                params.expected_version,
                params.version_deadline.as_secs()
            )));
        }

        if elapsed >= params.window {
            // End-of-window gate.
            if !version_confirmed {
                return Err(HealthFailure("version never confirmed".to_owned()));
            }
            if state != ServiceState::Running {
                return Err(HealthFailure("service not running at end of window".to_owned()));
            }
            if !beacon_fresh {
                return Err(HealthFailure("beacon stale at end of window".to_owned()));
            }
            if !crashes.is_empty() {
                tracing::info!(
                    crashes = crashes.len(),
                    "transient crashes tolerated, agent recovered"
                );
            }
            return Ok(());
        }
    }
}

fn beacon_age(path: &Path) -> Option<Duration> {
    let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
    std::time::SystemTime::now().duration_since(mtime).ok()
}

fn process_memory(sys: &mut sysinfo::System, pid: u32) -> Option<u64> {
    let pid = sysinfo::Pid::from_u32(pid);
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid).map(|p| p.memory())
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
