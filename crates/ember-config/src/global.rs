//! Global Configuration (~/.ember/config.toml)
//!
//! Handles user-level defaults stored in `~/.ember/config.toml`. The global
//! file shares section types with `ember.toml` but carries no project-specific
//! `[classify]` table.

use crate::project::{
    validate_build, validate_logging, validate_sandbox, BuildSection, LoggingSection,
    ProjectConfig, SandboxSection,
};
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.ember/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Build defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    /// Sandbox defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSection>,

    /// Logging defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(build) = &self.build {
            validate_build(build)?;
            if build.entry.is_some() {
                return Err(ConfigError::InvalidValue {
                    field: "build.entry".to_string(),
                    reason: "entry is project-specific and cannot be set globally".to_string(),
                });
            }
        }
        if let Some(sandbox) = &self.sandbox {
            validate_sandbox(sandbox)?;
        }
        if let Some(logging) = &self.logging {
            validate_logging(logging)?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.ember/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ember").join("config.toml"))
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        let mut layered = self.as_project();
        layered.merge(&other.as_project());
        self.build = layered.build;
        self.sandbox = layered.sandbox;
        self.logging = layered.logging;
    }

    /// View the global defaults as the lowest project configuration layer
    pub fn as_project(&self) -> ProjectConfig {
        ProjectConfig {
            build: self.build.clone(),
            classify: None,
            sandbox: self.sandbox.clone(),
            logging: self.logging.clone(),
        }
    }
}
