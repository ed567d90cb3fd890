//! Execution sandbox
//!
//! A sandbox context runs bundles in isolation from the host. The host and the
//! context share no memory: the only link is a [`SandboxConnection`], a pair of
//! string channels carrying protocol envelopes plus a shutdown hook.
//!
//! Backends:
//! - [`ProcessSandbox`]: a child process with a cleared environment and a
//!   private working directory, talking newline-delimited envelopes over stdio
//! - [`TaskSandbox`]: an in-process context driving a [`ScriptEvaluator`] on
//!   its own task
//!
//! [`SandboxManager`] owns the current context and its lifecycle.

pub mod manager;
pub mod process;
pub mod task;

pub use manager::SandboxManager;
pub use process::ProcessSandbox;
pub use task::{Console, ScriptEvaluator, TaskSandbox};

use crate::protocol::SandboxMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Sandbox errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Sandbox transport failed: {0}")]
    Transport(String),

    #[error("Failed to start sandbox: {0}")]
    Spawn(String),

    #[error("Sandbox did not become ready within {0:?}")]
    ReadyTimeout(Duration),
}

/// Creates isolated execution contexts
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Start a fresh context and connect to it
    async fn spawn(&self) -> Result<SandboxConnection, SandboxError>;
}

/// Host side of a running context
pub struct SandboxConnection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Option<mpsc::UnboundedReceiver<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    closed: Arc<AtomicBool>,
}

impl SandboxConnection {
    /// `outbound` carries host-to-context text, `inbound` the reverse.
    /// Firing `shutdown` must make the backend tear the context down.
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            outbound,
            inbound: Some(inbound),
            shutdown: Some(shutdown),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the inbound stream; only the first call returns it
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inbound.take()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    pub fn send(&self, message: &SandboxMessage) -> Result<(), SandboxError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SandboxError::Transport("context is closed".to_string()));
        }
        self.outbound
            .send(message.to_envelope())
            .map_err(|_| SandboxError::Transport("context is gone".to_string()))
    }

    /// Tear the context down; safe to call more than once
    pub fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for SandboxConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_fires_shutdown_once() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let mut connection = SandboxConnection::new(out_tx, in_rx, shutdown_tx);

        assert!(connection.is_alive());
        connection.send(&SandboxMessage::reset()).unwrap();
        assert!(out_rx.recv().await.unwrap().contains("\"reset\""));

        connection.close();
        connection.close();
        assert!(shutdown_rx.await.is_ok());
        assert!(!connection.is_alive());
        assert!(matches!(
            connection.send(&SandboxMessage::reset()),
            Err(SandboxError::Transport(_))
        ));
    }

    #[test]
    fn test_dropped_receiver_means_dead() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        let connection = SandboxConnection::new(out_tx, in_rx, shutdown_tx);

        drop(out_rx);
        assert!(!connection.is_alive());
    }
}
