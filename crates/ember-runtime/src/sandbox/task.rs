//! In-process sandbox backend
//!
//! Each context runs on its own tokio task and owns a fresh evaluator. It
//! still speaks only envelopes over channels, so the host cannot tell it
//! apart from a process context.

use super::{SandboxBackend, SandboxConnection, SandboxError};
use crate::protocol::{parse_envelope, MessageType, SandboxMessage};
use async_trait::async_trait;
use ember_build::describe_panic;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Output collected while a bundle runs
#[derive(Debug, Default)]
pub struct Console {
    messages: Vec<SandboxMessage>,
}

impl Console {
    pub fn log(&mut self, text: impl Into<String>) {
        self.messages.push(SandboxMessage::log(text));
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.messages.push(SandboxMessage::warn(text));
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.messages.push(SandboxMessage::error(text));
    }

    pub fn messages(&self) -> &[SandboxMessage] {
        &self.messages
    }

    fn drain(&mut self) -> Vec<SandboxMessage> {
        std::mem::take(&mut self.messages)
    }
}

/// Runs a bundle inside a context
///
/// An `Err` (or a panic) is reported to the host as a `runtime-error`.
pub trait ScriptEvaluator: Send {
    fn evaluate(&mut self, bundle: &str, console: &mut Console) -> Result<(), String>;
}

impl<F> ScriptEvaluator for F
where
    F: FnMut(&str, &mut Console) -> Result<(), String> + Send,
{
    fn evaluate(&mut self, bundle: &str, console: &mut Console) -> Result<(), String> {
        self(bundle, console)
    }
}

type EvaluatorFactory = Arc<dyn Fn() -> Box<dyn ScriptEvaluator> + Send + Sync>;

pub struct TaskSandbox {
    factory: EvaluatorFactory,
    announce_ready: bool,
}

impl TaskSandbox {
    /// `factory` builds a fresh evaluator for every context
    pub fn new<E, F>(factory: F) -> Self
    where
        E: ScriptEvaluator + 'static,
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move || Box::new(factory()) as Box<dyn ScriptEvaluator>),
            announce_ready: true,
        }
    }

    /// Contexts never send `ready`
    pub fn without_ready(mut self) -> Self {
        self.announce_ready = false;
        self
    }
}

#[async_trait]
impl SandboxBackend for TaskSandbox {
    async fn spawn(&self) -> Result<SandboxConnection, SandboxError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let evaluator = (self.factory)();
        tokio::spawn(run_context(
            evaluator,
            outbound_rx,
            inbound_tx,
            shutdown_rx,
            self.announce_ready,
        ));

        Ok(SandboxConnection::new(outbound_tx, inbound_rx, shutdown_tx))
    }
}

async fn run_context(
    mut evaluator: Box<dyn ScriptEvaluator>,
    mut commands: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<String>,
    mut shutdown: oneshot::Receiver<()>,
    announce_ready: bool,
) {
    if announce_ready && events.send(SandboxMessage::ready().to_envelope()).is_err() {
        return;
    }

    loop {
        let raw = tokio::select! {
            _ = &mut shutdown => break,
            raw = commands.recv() => match raw {
                Some(raw) => raw,
                None => break,
            },
        };

        let message = match parse_envelope(&raw) {
            Ok(message) => message,
            Err(violation) => {
                debug!(%violation, "context dropped invalid message");
                continue;
            }
        };

        match message.kind {
            MessageType::Execute => {
                let mut console = Console::default();
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    evaluator.evaluate(&message.payload, &mut console)
                }));
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(panic) => Some(describe_panic(panic.as_ref())),
                };

                for output in console.drain() {
                    if events.send(output.to_envelope()).is_err() {
                        return;
                    }
                }
                if let Some(failure) = failure {
                    let _ = events.send(SandboxMessage::runtime_error(failure).to_envelope());
                }
            }
            MessageType::Reset => break,
            other => debug!(kind = %other, "context ignored message"),
        }
    }
    debug!("sandbox context finished");
}
