// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin glue over the platform service layer.
//!
//! The core only needs to start the agent loop, receive a stop callback,
//! and (on Windows) ask the SCM for restart-on-failure hardening. The
//! implementations shell out to the platform tools; nothing here links a
//! platform API directly.

use anyhow::Context;

/// Observable service states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

/// Platform service operations consumed by the CLI entry points.
pub trait ServiceManager: Send + Sync {
    fn install(&self, server_url: &str, token: &str) -> anyhow::Result<()>;
    fn uninstall(&self) -> anyhow::Result<()>;
    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self) -> anyhow::Result<()>;
    fn status(&self) -> anyhow::Result<ServiceStatus>;
    fn is_elevated(&self) -> bool;
}

/// The platform's service manager.
pub fn platform() -> Box<dyn ServiceManager> {
    #[cfg(unix)]
    {
        Box::new(SystemdService::new("sentinel-agent"))
    }
    #[cfg(not(unix))]
    {
        Box::new(ScmService::new("sentinel-agent"))
    }
}

/// systemd-backed implementation.
#[cfg(unix)]
pub struct SystemdService {
    unit: String,
}

#[cfg(unix)]
impl SystemdService {
    pub fn new(unit: &str) -> Self {
        Self { unit: unit.to_owned() }
    }

    fn systemctl(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        std::process::Command::new("systemctl")
            .args(args)
            .output()
            .context("spawn systemctl")
    }

    fn unit_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("/etc/systemd/system/{}.service", self.unit))
    }

    fn unit_file(&self, exe: &std::path::Path) -> String {
        format!(
            "[Unit]\n\
             Description=Sentinel RMM agent\n\
             After=network-online.target\n\
             \n\
             [Service]\n\
             ExecStart={} --service\n\
             Restart=always\n\
             RestartSec=5\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            exe.display()
        )
    }
}

#[cfg(unix)]
impl ServiceManager for SystemdService {
    fn install(&self, _server_url: &str, _token: &str) -> anyhow::Result<()> {
        anyhow::ensure!(self.is_elevated(), "install requires elevation");
        let exe = std::env::current_exe()?;
        std::fs::write(self.unit_path(), self.unit_file(&exe))?;
        self.systemctl(&["daemon-reload"])?;
        let out = self.systemctl(&["enable", "--now", &self.unit])?;
        anyhow::ensure!(
            out.status.success(),
            "systemctl enable failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        Ok(())
    }

    fn uninstall(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.is_elevated(), "uninstall requires elevation");
        let _ = self.systemctl(&["disable", "--now", &self.unit]);
        let _ = std::fs::remove_file(self.unit_path());
        let _ = self.systemctl(&["daemon-reload"]);
        Ok(())
    }

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

    fn status(&self) -> anyhow::Result<ServiceStatus> {
        let out = self.systemctl(&["is-active", &self.unit])?;
        let state = String::from_utf8_lossy(&out.stdout);
        Ok(match state.trim() {
            "active" | "activating" => ServiceStatus::Running,
            "inactive" | "failed" | "deactivating" => ServiceStatus::Stopped,
            _ => ServiceStatus::Unknown,
        })
    }

    fn is_elevated(&self) -> bool {
        unix_euid().map(|uid| uid == 0).unwrap_or(false)
    }
}

/// Effective UID without linking libc: `id -u`.
#[cfg(unix)]
fn unix_euid() -> Option<u32> {
    let out = std::process::Command::new("id").arg("-u").output().ok()?;
    String::from_utf8_lossy(&out.stdout).trim().parse().ok()
}

/// Windows SCM implementation via `sc.exe`, with auto-start and
/// restart-on-failure recovery actions applied at install.
#[cfg(not(unix))]
pub struct ScmService {
    name: String,
}

#[cfg(not(unix))]
impl ScmService {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }

    fn sc(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        std::process::Command::new("sc.exe").args(args).output().context("spawn sc.exe")
    }
}

#[cfg(not(unix))]
impl ServiceManager for ScmService {
    fn install(&self, _server_url: &str, _token: &str) -> anyhow::Result<()> {
        let exe = std::env::current_exe()?;
        let bin_path = format!("{} --service", exe.display());
        let out = self.sc(&["create", &self.name, "binPath=", &bin_path, "start=", "auto"])?;
        anyhow::ensure!(out.status.success(), "sc create failed");
        // Restart-on-failure recovery actions.
        let _ = self.sc(&[
            "failure",
            &self.name,
            "reset=",
            "86400",
            "actions=",
            "restart/5000/restart/10000/restart/30000",
        ]);
        let _ = self.sc(&["start", &self.name]);
        Ok(())
    }

    fn uninstall(&self) -> anyhow::Result<()> {
        let _ = self.sc(&["stop", &self.name]);
        let _ = self.sc(&["delete", &self.name]);
        Ok(())
    }

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

    fn status(&self) -> anyhow::Result<ServiceStatus> {
        let out = self.sc(&["query", &self.name])?;
        let text = String::from_utf8_lossy(&out.stdout);
        Ok(if text.contains("RUNNING") {
            ServiceStatus::Running
        } else if text.contains("STOPPED") {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::Unknown
        })
    }

    fn is_elevated(&self) -> bool {
        // `net session` succeeds only for elevated shells.
        std::process::Command::new("net")
            .arg("session")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}
