// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived sub-sessions multiplexed over the control channel.
//!
//! Every session has an ID assigned by the peer, a cancellable task, and
//! a terminal event that releases its resources. Managers own sessions
//! by ID; a session holds only its own ID back, so shutdown always flows
//! top-down through the manager.

pub mod files;
pub mod pathsafe;
pub mod remote;
pub mod scan;
pub mod terminal;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Anything a manager can own: closing must be idempotent and must
/// release the session's resources (typically by cancelling its token).
pub trait Session: Send + Sync + 'static {
    fn close(&self);
}

/// ID-indexed session map under a single RW-lock (one per manager).
pub struct SessionMap<S: Session> {
    inner: RwLock<HashMap<String, Arc<S>>>,
}

impl<S: Session> Default for SessionMap<S> {
    fn default() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }
}

impl<S: Session> SessionMap<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. A duplicate ID is rejected; the existing
    /// session is left untouched.
    pub async fn insert(&self, id: &str, session: Arc<S>) -> anyhow::Result<()> {
        let mut map = self.inner.write().await;
        anyhow::ensure!(!map.contains_key(id), "session {id} already exists");
        map.insert(id.to_owned(), session);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<S>> {
        self.inner.read().await.get(id).map(Arc::clone)
    }

    /// Close and remove one session. Returns whether it existed.
    pub async fn close(&self, id: &str) -> bool {
        let removed = self.inner.write().await.remove(id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Remove without closing; for sessions that terminated themselves.
    pub async fn forget(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Close every session (peer disconnect, agent shutdown).
    pub async fn close_all(&self) {
        let drained: Vec<Arc<S>> = self.inner.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
