//! Ember runtime
//!
//! Executes bundles produced by `ember-build` in an isolated sandbox and
//! drives the run lifecycle:
//! - Wire protocol and allow-list validation of sandbox envelopes
//! - Message bus with per-handler fault isolation
//! - Sandbox backends (child process, in-process task) and the context manager
//! - Host state mapping and the run/restart/stop controller
//! - Logging setup

pub mod bus;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod protocol;
pub mod sandbox;

// Re-export main types
pub use bus::{HandlerError, MessageBus, MessageHandler, SubscriptionId};
pub use host::{BuildStatus, HostBridge, HostMessageHandler, HostState, LogEntry, LogLevel};
pub use lifecycle::{LifecycleController, LifecycleError};
pub use logging::{init_logging, LoggingConfig};
pub use protocol::{parse_envelope, MessageType, ProtocolViolation, SandboxMessage, ENVELOPE_MARKER};
pub use sandbox::{
    Console, ProcessSandbox, SandboxBackend, SandboxConnection, SandboxError, SandboxManager,
    ScriptEvaluator, TaskSandbox,
};
