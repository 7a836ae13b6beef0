// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The staged-swap state machine.
//!
//! verifying → draining → backing-up → swapping → starting → monitoring
//! → complete, with any failure after the backup exists routed through
//! rolling-back. Status is persisted at every transition so the agent
//! can report the outcome on its next boot; the request file is deleted
//! on every terminal outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sentinel::ipc::{self, UpdateRequest, UpdateState, UpdateStatus};
use sentinel::paths::DataDir;

use crate::monitor::{monitor_health, MonitorParams};
use crate::protect::Protection;
use crate::service::{wait_for_state, ServiceControl, ServiceState};
use crate::swap;

pub struct Orchestrator {
    dirs: DataDir,
    service: Box<dyn ServiceControl>,
    protection: Box<dyn Protection>,
    service_timeout: Duration,
    monitor: MonitorTuning,
}

/// Window/tick pair handed to [`MonitorParams::production`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorTuning {
    pub window: Duration,
    pub tick: Duration,
}

/// A phase failure, remembering whether a rollback point exists yet.
struct PhaseFailure {
    error: anyhow::Error,
    backup_made: bool,
}

impl PhaseFailure {
    fn before_backup(error: anyhow::Error) -> Self {
        Self { error, backup_made: false }
    }

    fn after_backup(error: anyhow::Error) -> Self {
        Self { error, backup_made: true }
    }
}

/// `<target>.backup`, preserving any existing extension.
pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

impl Orchestrator {
    pub fn new(
        dirs: DataDir,
        service: Box<dyn ServiceControl>,
        protection: Box<dyn Protection>,
        service_timeout: Duration,
        monitor: MonitorTuning,
    ) -> Self {
        Self { dirs, service, protection, service_timeout, monitor }
    }

    /// Drive one update to a terminal state. The caller guarantees no
    /// concurrent invocation (one update in flight per watchdog).
    pub async fn apply_update(&self, request: &UpdateRequest) -> UpdateStatus {
        let target = PathBuf::from(&request.target_path);
        let backup = backup_path(&target);

        let mut status = UpdateStatus {
            state: UpdateState::Applying,
            version: request.version.clone(),
            started_at: chrono::Utc::now(),
            completed_at: None,
            backup_path: Some(backup.to_string_lossy().into_owned()),
            error: None,
            rolled_back: false,
        };
        self.write_status(&status);
        tracing::info!(version = %request.version, "update started");

        match self.run_phases(request, &target, &backup).await {
            Ok(()) => {
                status.state = UpdateState::Complete;
                tracing::info!(version = %request.version, "update complete");
            }
            Err(failure) => {
                tracing::error!(err = %format!("{:#}", failure.error), "update failed");
                status.error = Some(format!("{:#}", failure.error));

                if failure.backup_made {
                    match self.roll_back(&target, &backup).await {
                        Ok(()) => {
                            status.state = UpdateState::RolledBack;
                            status.rolled_back = true;
                            tracing::warn!("rolled back to previous binary");
                        }
                        Err(e) => {
                            // No further automatic recourse.
                            status.state = UpdateState::Failed;
                            status.error = Some(format!(
                                "{:#}; rollback also failed: {e:#}",
                                failure.error
                            ));
                            tracing::error!(err = %format!("{e:#}"), "rollback failed");
                        }
                    }
                } else {
                    status.state = UpdateState::Failed;
                }
            }
        }

        status.completed_at = Some(chrono::Utc::now());
        self.write_status(&status);
        if let Err(e) = std::fs::remove_file(self.dirs.update_request()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(err = %e, "could not delete the consumed update request");
            }
        }
        status
    }

    async fn run_phases(
        &self,
        request: &UpdateRequest,
        target: &Path,
        backup: &Path,
    ) -> Result<(), PhaseFailure> {
        let staged = PathBuf::from(&request.staged_path);

        // Verifying.
        swap::verify_staged(&staged, request.checksum.as_deref())
            .map_err(PhaseFailure::before_backup)?;

        // Draining: directory before file, then stop the service.
        if let Some(dir) = target.parent() {
            if let Err(e) = self.protection.unprotect_dir(dir) {
                tracing::warn!(err = %e, "unprotect dir failed, continuing");
            }
        }
        if let Err(e) = self.protection.unprotect_file(target) {
            tracing::warn!(err = %e, "unprotect file failed, continuing");
        }
        self.service.stop().map_err(PhaseFailure::before_backup)?;
        wait_for_state(self.service.as_ref(), ServiceState::Stopped, self.service_timeout)
            .await
            .map_err(PhaseFailure::before_backup)?;

        // Backing up.
        swap::back_up(target, backup).map_err(PhaseFailure::before_backup)?;

        // Swapping: from here on, failure means rollback.
        swap::atomic_replace(&staged, target).map_err(PhaseFailure::after_backup)?;

        // Starting: re-protect file-first, then the directory.
        if let Err(e) = self.protection.protect_file(target) {
            tracing::warn!(err = %e, "re-protect file failed, continuing");
        }
        if let Some(dir) = target.parent() {
            if let Err(e) = self.protection.protect_dir(dir) {
                tracing::warn!(err = %e, "re-protect dir failed, continuing");
            }
        }
        self.service.start().map_err(PhaseFailure::after_backup)?;
        wait_for_state(self.service.as_ref(), ServiceState::Running, self.service_timeout)
            .await
            .map_err(PhaseFailure::after_backup)?;

        // Monitoring.
        let params = MonitorParams::production(
            &request.version,
            self.monitor.window,
            self.monitor.tick,
        );
        monitor_health(&params, self.service.as_ref(), &self.dirs)
            .await
            .map_err(|e| PhaseFailure::after_backup(e.into()))?;

        // The staged binary served its purpose.
        let _ = std::fs::remove_file(&staged);
        Ok(())
    }

    /// Stop, restore the backup bytes, restart.
    async fn roll_back(&self, target: &Path, backup: &Path) -> anyhow::Result<()> {
        anyhow::ensure!(backup.exists(), "backup {} is missing", backup.display());

        if let Err(e) = self.service.stop() {
            tracing::warn!(err = %e, "stop before rollback failed, continuing");
        }
        let _ = wait_for_state(
            self.service.as_ref(),
            ServiceState::Stopped,
            self.service_timeout,
        )
        .await;

        if let Some(dir) = target.parent() {
            if let Err(e) = self.protection.unprotect_dir(dir) {
                tracing::warn!(err = %e, "unprotect dir failed during rollback");
            }
        }
        if let Err(e) = self.protection.unprotect_file(target) {
            tracing::warn!(err = %e, "unprotect file failed during rollback");
        }

        swap::atomic_replace(backup, target)?;

        if let Err(e) = self.protection.protect_file(target) {
            tracing::warn!(err = %e, "re-protect file failed during rollback");
        }
        if let Some(dir) = target.parent() {
            if let Err(e) = self.protection.protect_dir(dir) {
                tracing::warn!(err = %e, "re-protect dir failed during rollback");
            }
        }

        self.service.start()?;
        wait_for_state(self.service.as_ref(), ServiceState::Running, self.service_timeout).await
    }

    fn write_status(&self, status: &UpdateStatus) {
        if let Err(e) = ipc::write_json(&self.dirs.update_status(), status) {
            tracing::error!(err = %e, "could not persist update status");
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
