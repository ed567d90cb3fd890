//! Host-side state and the sandbox message mapping

use crate::bus::{HandlerError, MessageHandler};
use crate::protocol::{MessageType, SandboxMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Run status shown to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Idle,
    Running,
    Error,
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Everything the host displays about the current run
#[derive(Debug, Clone, Default)]
pub struct HostState {
    pub status: BuildStatus,
    pub error: Option<String>,
    pub logs: Vec<LogEntry>,
    /// Incremented whenever a run starts or is stopped
    pub epoch: u64,
}

impl HostState {
    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry::new(level, message));
    }

    /// Record an error; a running run picks it up when it finishes
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        if self.status != BuildStatus::Running {
            self.status = BuildStatus::Error;
        }
    }

    pub(crate) fn begin(&mut self) -> u64 {
        self.status = BuildStatus::Running;
        self.error = None;
        self.logs.clear();
        self.epoch += 1;
        self.epoch
    }
}

/// Embedding-side resource tied to the sandbox (a preview frame, a window)
pub trait HostBridge: Send + Sync {
    fn destroy(&self);
}

/// Applies sandbox messages to the shared [`HostState`]
pub struct HostMessageHandler {
    state: Arc<Mutex<HostState>>,
}

impl HostMessageHandler {
    pub fn new(state: Arc<Mutex<HostState>>) -> Self {
        Self { state }
    }
}

impl MessageHandler for HostMessageHandler {
    fn handle(&self, message: &SandboxMessage) -> Result<(), HandlerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HandlerError::new("host state lock poisoned"))?;
        let payload = message.payload.as_str();

        match message.kind {
            MessageType::Log => state.push_log(LogLevel::Info, payload),
            MessageType::Warn => state.push_log(LogLevel::Warn, format!("[warn] {}", payload)),
            MessageType::Error | MessageType::RuntimeError => {
                state.record_error(payload);
                state.push_log(LogLevel::Error, payload);
            }
            MessageType::Ready => state.push_log(LogLevel::Info, "Sandbox ready"),
            MessageType::Execute | MessageType::Reset => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn apply(state: &Arc<Mutex<HostState>>, message: SandboxMessage) {
        HostMessageHandler::new(Arc::clone(state)).handle(&message).unwrap();
    }

    fn messages(state: &Arc<Mutex<HostState>>) -> Vec<String> {
        state.lock().unwrap().logs.iter().map(|e| e.message.clone()).collect()
    }

    #[rstest]
    #[case(SandboxMessage::log("hello"), "hello", LogLevel::Info)]
    #[case(SandboxMessage::warn("slow"), "[warn] slow", LogLevel::Warn)]
    #[case(SandboxMessage::ready(), "Sandbox ready", LogLevel::Info)]
    fn test_log_mapping(
        #[case] message: SandboxMessage,
        #[case] expected: &str,
        #[case] level: LogLevel,
    ) {
        let state = Arc::new(Mutex::new(HostState::default()));
        apply(&state, message);

        let state = state.lock().unwrap();
        assert_eq!(state.logs.len(), 1);
        assert_eq!(state.logs[0].message, expected);
        assert_eq!(state.logs[0].level, level);
        assert_eq!(state.status, BuildStatus::Idle);
    }

    #[rstest]
    #[case(SandboxMessage::error("bad"))]
    #[case(SandboxMessage::runtime_error("bad"))]
    fn test_errors_set_error_state(#[case] message: SandboxMessage) {
        let state = Arc::new(Mutex::new(HostState::default()));
        apply(&state, message);

        assert_eq!(messages(&state), vec!["bad".to_string()]);
        let state = state.lock().unwrap();
        assert_eq!(state.status, BuildStatus::Error);
        assert_eq!(state.error.as_deref(), Some("bad"));
    }

    #[test]
    fn test_error_while_running_keeps_status() {
        let state = Arc::new(Mutex::new(HostState::default()));
        state.lock().unwrap().begin();
        apply(&state, SandboxMessage::runtime_error("late"));

        let state = state.lock().unwrap();
        assert_eq!(state.status, BuildStatus::Running);
        assert_eq!(state.error.as_deref(), Some("late"));
    }

    #[test]
    fn test_inbound_commands_are_ignored() {
        let state = Arc::new(Mutex::new(HostState::default()));
        apply(&state, SandboxMessage::execute("code"));
        apply(&state, SandboxMessage::reset());
        assert!(messages(&state).is_empty());
    }
}
