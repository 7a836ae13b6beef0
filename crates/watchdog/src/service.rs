// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service control used during swaps: stop, start, observe.

use std::time::Duration;

use anyhow::Context;

/// Observable service states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    Unknown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

/// Narrow service interface the orchestrator needs.
pub trait ServiceControl: Send + Sync {
    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self) -> anyhow::Result<()>;
    fn state(&self) -> ServiceState;
}

/// Poll until the service reaches `target` or `timeout` elapses.
pub async fn wait_for_state(
    service: &dyn ServiceControl,
    target: ServiceState,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if service.state() == target {
            return Ok(());
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "service did not reach {} within {timeout:?}",
            target.as_str()
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// The platform's service controller for a named unit.
pub fn platform(service: &str) -> Box<dyn ServiceControl> {
    #[cfg(unix)]
    {
        Box::new(SystemdControl::new(service))
    }
    #[cfg(not(unix))]
    {
        Box::new(ScControl::new(service))
    }
}

#[cfg(unix)]
pub struct SystemdControl {
    unit: String,
}

#[cfg(unix)]
impl SystemdControl {
    pub fn new(unit: &str) -> Self {
        Self { unit: unit.to_owned() }
    }

    fn systemctl(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        std::process::Command::new("systemctl")
            .args(args)
            .output()
            .context("spawn systemctl")
    }
}

#[cfg(unix)]
impl ServiceControl for SystemdControl {
    fn start(&self) -> anyhow::Result<()> {
        let out = self.systemctl(&["start", &self.unit])?;
        anyhow::ensure!(
            out.status.success(),
            "systemctl start failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        let out = self.systemctl(&["stop", &self.unit])?;
        anyhow::ensure!(
            out.status.success(),
            "systemctl stop failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        Ok(())
    }

    fn state(&self) -> ServiceState {
        let Ok(out) = self.systemctl(&["is-active", &self.unit]) else {
            return ServiceState::Unknown;
        };
        match String::from_utf8_lossy(&out.stdout).trim() {
            "active" | "activating" => ServiceState::Running,
            "inactive" | "failed" | "deactivating" => ServiceState::Stopped,
            _ => ServiceState::Unknown,
        }
    }
}

#[cfg(not(unix))]
pub struct ScControl {
    name: String,
}

#[cfg(not(unix))]
impl ScControl {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }

    fn sc(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        std::process::Command::new("sc.exe").args(args).output().context("spawn sc.exe")
    }
}

#[cfg(not(unix))]
impl ServiceControl for ScControl {
    fn start(&self) -> anyhow::Result<()> {
        let out = self.sc(&["start", &self.name])?;
        anyhow::ensure!(out.status.success(), "sc start failed");
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        let out = self.sc(&["stop", &self.name])?;
        anyhow::ensure!(out.status.success(), "sc stop failed");
        Ok(())
    }

    fn state(&self) -> ServiceState {
        let Ok(out) = self.sc(&["query", &self.name]) else {
            return ServiceState::Unknown;
        };
        let text = String::from_utf8_lossy(&out.stdout);
        if text.contains("RUNNING") {
            ServiceState::Running
        } else if text.contains("STOPPED") {
            ServiceState::Stopped
        } else {
            ServiceState::Unknown
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
