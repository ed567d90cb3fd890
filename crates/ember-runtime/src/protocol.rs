//! Sandbox wire protocol
//!
//! Every message crossing the sandbox boundary is a JSON envelope:
//!
//! ```json
//! {"__emberSandbox": true, "type": "log", "payload": "hello"}
//! ```
//!
//! Inbound text is validated against an explicit allow-list before anything
//! acts on it. Text that fails validation is a [`ProtocolViolation`] and is
//! dropped by the receiver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Field marking a JSON object as a sandbox envelope
pub const ENVELOPE_MARKER: &str = "__emberSandbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Log,
    Warn,
    Error,
    RuntimeError,
    Ready,
    Execute,
    Reset,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        Self::Log,
        Self::Warn,
        Self::Error,
        Self::RuntimeError,
        Self::Ready,
        Self::Execute,
        Self::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::RuntimeError => "runtime-error",
            Self::Ready => "ready",
            Self::Execute => "execute",
            Self::Reset => "reset",
        }
    }

    /// Exact, case-sensitive match against the wire names
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxMessage {
    pub kind: MessageType,
    pub payload: String,
}

impl SandboxMessage {
    pub fn new(kind: MessageType, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn log(payload: impl Into<String>) -> Self {
        Self::new(MessageType::Log, payload)
    }

    pub fn warn(payload: impl Into<String>) -> Self {
        Self::new(MessageType::Warn, payload)
    }

    pub fn error(payload: impl Into<String>) -> Self {
        Self::new(MessageType::Error, payload)
    }

    pub fn runtime_error(payload: impl Into<String>) -> Self {
        Self::new(MessageType::RuntimeError, payload)
    }

    pub fn ready() -> Self {
        Self::new(MessageType::Ready, "")
    }

    pub fn execute(bundle: impl Into<String>) -> Self {
        Self::new(MessageType::Execute, bundle)
    }

    pub fn reset() -> Self {
        Self::new(MessageType::Reset, "")
    }

    /// Serialize as a single-line wire envelope
    pub fn to_envelope(&self) -> String {
        let mut object = Map::new();
        object.insert(ENVELOPE_MARKER.to_string(), Value::Bool(true));
        object.insert("type".to_string(), Value::String(self.kind.as_str().to_string()));
        object.insert("payload".to_string(), Value::String(self.payload.clone()));
        Value::Object(object).to_string()
    }
}

/// Why an inbound text was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("not valid JSON: {0}")]
    NotJson(String),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("missing or false envelope marker")]
    MissingMarker,

    #[error("missing message type")]
    MissingType,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("payload is missing or not a string")]
    InvalidPayload,
}

/// Validate inbound text into a message
pub fn parse_envelope(raw: &str) -> Result<SandboxMessage, ProtocolViolation> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolViolation::NotJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ProtocolViolation::NotAnObject);
    };

    if object.get(ENVELOPE_MARKER) != Some(&Value::Bool(true)) {
        return Err(ProtocolViolation::MissingMarker);
    }

    let kind = match object.get("type") {
        Some(Value::String(name)) => {
            MessageType::parse(name).ok_or_else(|| ProtocolViolation::UnknownType(name.clone()))?
        }
        Some(other) => return Err(ProtocolViolation::UnknownType(other.to_string())),
        None => return Err(ProtocolViolation::MissingType),
    };

    let Some(Value::String(payload)) = object.get("payload") else {
        return Err(ProtocolViolation::InvalidPayload);
    };

    Ok(SandboxMessage::new(kind, payload.clone()))
}
