//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{
    is_valid_level, BuildSection, HashAlgorithm, LoggingSection, ProjectConfig, SandboxSection,
};
use crate::settings::Settings;
use crate::{ConfigError, ConfigResult, PROJECT_CONFIG_FILE};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.ember/config.toml) - lowest priority
/// 2. Project config (./ember.toml) - overrides global
/// 3. Environment variables (EMBER_*) - overrides project
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Effective configuration (global, project, and env layers merged)
    pub project: ProjectConfig,

    /// Global configuration as loaded
    pub global: GlobalConfig,

    /// Project root directory (where ember.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config path instead of ~/.ember/config.toml
    pub fn with_global_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find ember.toml, then layers it over
    /// the global config (if any) and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config()?;
        self.layer(global_config, project_config, project_root)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config()?;
        let project_root = config_path.parent().map(|p| p.to_path_buf());
        self.layer(global_config, project_config, project_root)
    }

    fn layer(
        &self,
        global: GlobalConfig,
        project: ProjectConfig,
        project_root: Option<PathBuf>,
    ) -> ConfigResult<Config> {
        let mut effective = global.as_project();
        effective.merge(&project);
        let effective = self.apply_env_overrides(effective)?;

        Ok(Config {
            project: effective,
            global,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config); a missing file yields defaults
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                debug!(path = %config_path.display(), "loading project config");
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration; a missing file or home directory yields defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        if self.global_config_path.is_none() {
            match GlobalConfig::global_config_path() {
                Ok(path) => self.global_config_path = Some(path),
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            }
        }

        let Some(path) = self.global_config_path.as_ref() else {
            return Ok(GlobalConfig::default());
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        debug!(path = %path.display(), "loading global config");
        GlobalConfig::load_from_file(path)
    }

    /// Apply environment variable overrides
    ///
    /// Recognized: EMBER_ENTRY, EMBER_HASH, EMBER_CONCURRENCY,
    /// EMBER_READY_TIMEOUT_MS, EMBER_LOG_LEVEL, EMBER_LOG_JSON
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        let mut build = BuildSection::default();
        let mut sandbox = SandboxSection::default();
        let mut logging = LoggingSection::default();

        if let Ok(entry) = env::var("EMBER_ENTRY") {
            build.entry = Some(PathBuf::from(entry));
        }

        if let Ok(hash) = env::var("EMBER_HASH") {
            build.hash = Some(HashAlgorithm::parse(&hash).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "EMBER_HASH".to_string(),
                    reason: format!("unknown hash algorithm '{}'", hash),
                }
            })?);
        }

        if let Ok(concurrency) = env::var("EMBER_CONCURRENCY") {
            build.concurrency = Some(parse_number("EMBER_CONCURRENCY", &concurrency)?);
        }

        if let Ok(timeout) = env::var("EMBER_READY_TIMEOUT_MS") {
            sandbox.ready_timeout_ms = Some(parse_number("EMBER_READY_TIMEOUT_MS", &timeout)?);
        }

        if let Ok(level) = env::var("EMBER_LOG_LEVEL") {
            if !is_valid_level(&level) {
                return Err(ConfigError::InvalidValue {
                    field: "EMBER_LOG_LEVEL".to_string(),
                    reason: format!("unknown level '{}'", level),
                });
            }
            logging.level = Some(level);
        }

        if let Ok(json) = env::var("EMBER_LOG_JSON") {
            logging.json = Some(matches!(json.to_lowercase().as_str(), "true" | "1" | "yes"));
        }

        config.merge(&ProjectConfig {
            build: (build != BuildSection::default()).then_some(build),
            classify: None,
            sandbox: (sandbox != SandboxSection::default()).then_some(sandbox),
            logging: (logging != LoggingSection::default()).then_some(logging),
        });
        config.validate()?;

        Ok(config)
    }

    /// Get the global configuration directory (~/.ember)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ember"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("expected a number, got '{}'", value),
    })
}

impl Config {
    /// Resolve the effective configuration into concrete settings
    pub fn settings(&self) -> Settings {
        Settings::resolve(&self.project)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Get the configured entry file
    pub fn entry(&self) -> Option<&Path> {
        self.project.entry()
    }

    /// Check if this is a project (has ember.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let config_path = dir.join(PROJECT_CONFIG_FILE);
        fs::write(&config_path, content).unwrap();
        config_path
    }

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new().with_global_path(dir.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_load_project_config() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[build]
entry = "src/main.ts"
"#,
        );

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.entry(), Some(Path::new("src/main.ts")));
        assert!(config.is_project());
    }

    #[test]
    #[serial]
    fn test_find_config_in_parent() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[build]
entry = "game/main.js"
"#,
        );

        let sub_dir = temp_dir.path().join("subdir");
        fs::create_dir(&sub_dir).unwrap();

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(&sub_dir).unwrap();

        assert_eq!(config.entry(), Some(Path::new("game/main.js")));
        assert_eq!(config.project_root(), Some(temp_dir.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_concurrency() {
        let temp_dir = TempDir::new().unwrap();
        create_config_file(
            temp_dir.path(),
            r#"
[build]
concurrency = 2
"#,
        );

        env::set_var("EMBER_CONCURRENCY", "12");
        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path());
        env::remove_var("EMBER_CONCURRENCY");

        assert_eq!(config.unwrap().settings().build.concurrency, 12);
    }

    #[test]
    #[serial]
    fn test_env_override_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();

        env::set_var("EMBER_HASH", "crc");
        let mut loader = isolated_loader(&temp_dir);
        let result = loader.load_from_directory(temp_dir.path());
        env::remove_var("EMBER_HASH");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_load_from_specific_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = create_config_file(
            temp_dir.path(),
            r#"
[logging]
level = "debug"
"#,
        );

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_file(&config_path).unwrap();

        assert_eq!(config.settings().logging.level, "debug");
    }
}
