/// Build pipeline error types
use thiserror::Error;

pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{path}: {message}")]
    Transform { path: String, message: String },

    #[error("Entry file not found: {entry}")]
    EntryNotFound { entry: String },

    #[error("Module not found: {module}")]
    ModuleNotFound { module: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Unsupported file type: {path}")]
    UnsupportedFile { path: String },

    #[error("Build produced an empty bundle")]
    EmptyBundle,

    #[error("Compiler initialization failed: {0}")]
    CompilerInit(String),

    #[error("File store error at {path}: {message}")]
    Store { path: String, message: String },

    #[error("Build failed: {0}")]
    BuildFailed(String),
}

impl BuildError {
    /// Create a transform error annotated with the offending file
    pub fn transform(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Transform {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a module not found error
    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module: module.into(),
        }
    }

    /// Create a file store error
    pub fn store(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Store {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Best-effort text of a caught panic payload
pub fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
