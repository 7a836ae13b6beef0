// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interface to the platform ACL-protection layer.
//!
//! Protection of the install directory and binary is an external
//! collaborator; the orchestrator only needs the enable/disable hooks
//! around a swap. The ordering contract matters: the directory must be
//! unprotected before the file (a backup has to be creatable alongside
//! the target), and re-protection runs file-first on the way back up.

use std::path::Path;

/// Enable/disable hooks the orchestrator calls around a swap.
pub trait Protection: Send + Sync {
    fn unprotect_dir(&self, dir: &Path) -> anyhow::Result<()>;
    fn unprotect_file(&self, file: &Path) -> anyhow::Result<()>;
    fn protect_file(&self, file: &Path) -> anyhow::Result<()>;
    fn protect_dir(&self, dir: &Path) -> anyhow::Result<()>;
}

/// Default when no platform layer is wired in: protection failures must
/// never block an update, so the no-op is the safe fallback.
pub struct NoopProtection;

impl Protection for NoopProtection {
    fn unprotect_dir(&self, _dir: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn unprotect_file(&self, _file: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn protect_file(&self, _file: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    fn protect_dir(&self, _dir: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}
