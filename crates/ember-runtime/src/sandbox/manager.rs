//! Sandbox context management
//!
//! The manager holds at most one live context. Contexts are created lazily,
//! replaced when they die, and numbered by a generation counter: an inbound
//! pump forwards messages to the bus only while its context is current, so
//! output from a torn-down context never reaches the host.

use super::{SandboxBackend, SandboxConnection, SandboxError};
use crate::bus::MessageBus;
use crate::protocol::{parse_envelope, MessageType, SandboxMessage};
use ember_config::SandboxSettings;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

struct ActiveContext {
    generation: u64,
    connection: SandboxConnection,
    ready: Arc<AtomicBool>,
}

/// Snapshot of the current context usable without holding the manager lock
#[derive(Clone)]
struct ContextHandle {
    generation: u64,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ContextHandle {
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

pub struct SandboxManager {
    backend: Arc<dyn SandboxBackend>,
    bus: Arc<MessageBus>,
    ready_poll: Duration,
    ready_timeout: Option<Duration>,
    current: Mutex<Option<ActiveContext>>,
    generation: Arc<AtomicU64>,
}

impl SandboxManager {
    pub fn new(backend: Arc<dyn SandboxBackend>, bus: Arc<MessageBus>) -> Self {
        Self::with_settings(backend, bus, &SandboxSettings::default())
    }

    pub fn with_settings(
        backend: Arc<dyn SandboxBackend>,
        bus: Arc<MessageBus>,
        settings: &SandboxSettings,
    ) -> Self {
        Self {
            backend,
            bus,
            ready_poll: settings.ready_poll.max(Duration::from_millis(1)),
            ready_timeout: settings.ready_timeout,
            current: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Generation of the most recent context (0 before the first one)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn is_active(&self) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|context| context.connection.is_alive())
    }

    pub async fn is_ready(&self) -> bool {
        self.current.lock().await.as_ref().is_some_and(|context| {
            context.connection.is_alive() && context.ready.load(Ordering::SeqCst)
        })
    }

    /// Send `bundle` to the current context once it reports ready
    ///
    /// Creates the context if needed. Exactly one `execute` message is sent.
    pub async fn execute(&self, bundle: &str) -> Result<(), SandboxError> {
        let handle = self.ensure().await?;
        self.wait_ready(&handle).await?;

        handle
            .outbound
            .send(SandboxMessage::execute(bundle).to_envelope())
            .map_err(|_| SandboxError::Transport("context exited before execute".to_string()))?;
        debug!(generation = handle.generation, bytes = bundle.len(), "bundle sent to sandbox");
        Ok(())
    }

    /// Tear down the current context and start a fresh one
    pub async fn reset(&self) -> Result<(), SandboxError> {
        let mut current = self.current.lock().await;
        if let Some(mut context) = current.take() {
            if let Err(e) = context.connection.send(&SandboxMessage::reset()) {
                debug!(error = %e, "reset notice not delivered");
            }
            context.connection.close();
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        let context = self.start(&mut current).await?;
        info!(generation = context.generation, "sandbox reset");
        Ok(())
    }

    /// Tear down the current context without replacing it
    pub async fn destroy(&self) {
        let mut current = self.current.lock().await;
        if let Some(mut context) = current.take() {
            context.connection.close();
            debug!(generation = context.generation, "sandbox destroyed");
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn ensure(&self) -> Result<ContextHandle, SandboxError> {
        let mut current = self.current.lock().await;
        if let Some(context) = current.as_mut() {
            if context.connection.is_alive() {
                return Ok(handle_of(context));
            }
            warn!(generation = context.generation, "sandbox context died, recreating");
            context.connection.close();
            *current = None;
        }
        self.start(&mut current).await
    }

    async fn start(
        &self,
        slot: &mut Option<ActiveContext>,
    ) -> Result<ContextHandle, SandboxError> {
        let mut connection = self.backend.spawn().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ready = Arc::new(AtomicBool::new(false));

        if let Some(inbound) = connection.take_inbound() {
            tokio::spawn(pump(
                inbound,
                generation,
                Arc::clone(&self.generation),
                Arc::clone(&ready),
                connection.closed_flag(),
                Arc::clone(&self.bus),
            ));
        }

        debug!(generation, "sandbox context started");
        let context = slot.insert(ActiveContext {
            generation,
            connection,
            ready,
        });
        Ok(handle_of(context))
    }

    async fn wait_ready(&self, handle: &ContextHandle) -> Result<(), SandboxError> {
        let started = Instant::now();
        while !handle.ready.load(Ordering::SeqCst) {
            if !handle.is_alive() {
                return Err(SandboxError::Transport(
                    "context exited before becoming ready".to_string(),
                ));
            }
            if self.generation() != handle.generation {
                return Err(SandboxError::Transport(
                    "context was replaced while waiting".to_string(),
                ));
            }
            if let Some(limit) = self.ready_timeout {
                if started.elapsed() >= limit {
                    return Err(SandboxError::ReadyTimeout(limit));
                }
            }
            tokio::time::sleep(self.ready_poll).await;
        }
        Ok(())
    }
}

fn handle_of(context: &ActiveContext) -> ContextHandle {
    ContextHandle {
        generation: context.generation,
        ready: Arc::clone(&context.ready),
        closed: context.connection.closed_flag(),
        outbound: context.connection.sender(),
    }
}

async fn pump(
    mut inbound: mpsc::UnboundedReceiver<String>,
    generation: u64,
    current: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    bus: Arc<MessageBus>,
) {
    while let Some(raw) = inbound.recv().await {
        let message = match parse_envelope(&raw) {
            Ok(message) => message,
            Err(violation) => {
                debug!(generation, %violation, "dropping invalid sandbox message");
                continue;
            }
        };

        if current.load(Ordering::SeqCst) != generation {
            debug!(generation, kind = %message.kind, "dropping message from stale context");
            continue;
        }

        if message.kind == MessageType::Ready {
            ready.store(true, Ordering::SeqCst);
        }
        bus.dispatch(&message);
    }

    closed.store(true, Ordering::SeqCst);
    debug!(generation, "sandbox context disconnected");
}
