//! Message bus
//!
//! Fans validated sandbox messages out to subscribed handlers. Each handler is
//! isolated: an error or panic in one is logged and the remaining handlers
//! still receive the message.

use crate::protocol::{parse_envelope, SandboxMessage};
use ember_build::describe_panic;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a handler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &SandboxMessage) -> Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&SandboxMessage) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &SandboxMessage) -> Result<(), HandlerError> {
        self(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct MessageBus {
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn MessageHandler>)>>,
    next_id: AtomicU64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: impl MessageHandler + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns whether it was subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver a message to every handler; returns how many handled it cleanly
    pub fn dispatch(&self, message: &SandboxMessage) -> usize {
        // Handlers run outside the lock so they may (un)subscribe
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(kind = %message.kind, error = %e, "message handler failed"),
                Err(panic) => warn!(
                    kind = %message.kind,
                    error = %describe_panic(panic.as_ref()),
                    "message handler panicked"
                ),
            }
        }
        delivered
    }

    /// Validate raw inbound text and dispatch it; invalid text is dropped
    pub fn receive_raw(&self, raw: &str) -> bool {
        match parse_envelope(raw) {
            Ok(message) => {
                self.dispatch(&message);
                true
            }
            Err(violation) => {
                debug!(%violation, "dropping invalid sandbox message");
                false
            }
        }
    }
}
