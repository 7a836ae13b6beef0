// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed-message dispatch.
//!
//! A registration map from message type to handler, populated once at
//! startup. Each inbound frame runs its handler on a fresh task so a
//! slow handler can never stall the socket read loop. Handler errors are
//! surfaced to the server as a failed `response` bound to the request ID,
//! never as channel termination.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::client::Outbound;
use super::envelope::Envelope;

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<Envelope>>> + Send>>;

/// A registered message handler. Returning `Ok(Some(env))` sends `env` as
/// the reply; progress frames go out through the captured [`Outbound`].
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message type. Later registrations for the
    /// same type replace earlier ones.
    pub fn register<F, Fut>(&mut self, msg_type: &str, handler: F)
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Envelope>>> + Send + 'static,
    {
        self.handlers
            .insert(msg_type.to_owned(), Arc::new(move |env| Box::pin(handler(env))));
    }

    pub fn handles(&self, msg_type: &str) -> bool {
        self.handlers.contains_key(msg_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one inbound frame. Unknown types are logged and skipped.
    pub fn dispatch(&self, outbound: Outbound, env: Envelope) {
        let Some(handler) = self.handlers.get(&env.msg_type) else {
            tracing::warn!(msg_type = %env.msg_type, "no handler registered, frame dropped");
            return;
        };
        let handler = Arc::clone(handler);
        let msg_type = env.msg_type.clone();
        let request_id = env.request_id.clone();

        tokio::spawn(async move {
            match handler(env).await {
                Ok(Some(reply)) => {
                    if let Err(e) = outbound.send(reply) {
                        tracing::debug!(msg_type = %msg_type, err = %e, "reply dropped");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(msg_type = %msg_type, err = %e, "handler failed");
                    if let Some(rid) = request_id {
                        let _ = outbound.send(Envelope::response_err(&rid, e.to_string()));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
