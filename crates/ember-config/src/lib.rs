//! Ember Configuration System
//!
//! Provides configuration management for the Ember build pipeline:
//! - Project configuration (ember.toml)
//! - Global user configuration (~/.ember/config.toml)
//! - Environment variable overrides (EMBER_*)
//! - Typed merging and resolution into concrete settings
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.ember/config.toml)
//! 2. Project config (./ember.toml)
//! 3. Environment variables (EMBER_*)
//!
//! Scalars are last-write-wins. Lists (`build.ignore`, `classify.*`,
//! `sandbox.command`) are replaced wholesale, never concatenated.
//!
//! # Example
//!
//! ```no_run
//! use ember_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! let settings = config.settings();
//! println!("hashing with {:?}", settings.build.hash);
//! ```

pub mod global;
pub mod loader;
pub mod project;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the project configuration file
pub const PROJECT_CONFIG_FILE: &str = "ember.toml";

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};
pub use project::{
    BuildSection, ClassifySection, HashAlgorithm, LoggingSection, ProjectConfig, SandboxSection,
};
pub use settings::{
    BuildSettings, ClassifySettings, LoggingSettings, SandboxSettings, Settings,
};
