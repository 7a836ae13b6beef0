// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test doubles.

use std::sync::Mutex;

use crate::service::{ServiceControl, ServiceState};

/// Service whose reported states follow a script, then hold a fallback
/// that `start`/`stop` mutate.
pub struct ScriptedService {
    script: Mutex<Vec<ServiceState>>,
    fallback: Mutex<ServiceState>,
}

impl ScriptedService {
    pub fn steady(state: ServiceState) -> Self {
        Self { script: Mutex::new(Vec::new()), fallback: Mutex::new(state) }
    }

    pub fn scripted(states: Vec<ServiceState>, fallback: ServiceState) -> Self {
        let mut script = states;
        script.reverse(); // popped from the back
        Self { script: Mutex::new(script), fallback: Mutex::new(fallback) }
    }
}

impl ServiceControl for ScriptedService {
    fn start(&self) -> anyhow::Result<()> {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = ServiceState::Running;
        }
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = ServiceState::Stopped;
        }
        Ok(())
    }

    fn state(&self) -> ServiceState {
        if let Ok(mut script) = self.script.lock() {
            if let Some(state) = script.pop() {
                return state;
            }
        }
        self.fallback.lock().map(|s| *s).unwrap_or(ServiceState::Unknown)
    }
}
