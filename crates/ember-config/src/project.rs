//! Project Configuration (ember.toml)
//!
//! Handles project-level configuration stored in `ember.toml` at the project root.
//! Every field is optional; unset fields fall back to lower-precedence layers
//! and finally to the defaults in [`crate::settings`].

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Project configuration from ember.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Build pipeline configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    /// File classification overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classify: Option<ClassifySection>,

    /// Sandbox configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxSection>,

    /// Logging configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

/// Content hash used for fingerprinting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 32-bit rolling hash. Change detection only.
    #[default]
    Rolling,
    /// SHA-256 digest
    Sha256,
}

impl HashAlgorithm {
    /// Parse a hash algorithm name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rolling" => Some(Self::Rolling),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::Sha256 => "sha256",
        }
    }
}

/// `[build]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Default entry file (repo-relative)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<PathBuf>,

    /// Fingerprint hash algorithm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<HashAlgorithm>,

    /// Maximum number of files transformed concurrently
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Minimum delay between two builds in milliseconds (0 disables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,

    /// Emit source maps alongside transformed modules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_maps: Option<bool>,

    /// Directory names skipped when snapshotting a project on disk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,
}

/// `[classify]` section: file extensions per change class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ClassifySection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Vec<String>>,
}

/// `[sandbox]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SandboxSection {
    /// Program and arguments for the process sandbox
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Interval between readiness checks in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_poll_ms: Option<u64>,

    /// Maximum time to wait for readiness in milliseconds (0 waits forever)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_timeout_ms: Option<u64>,

    /// Delay after tearing down a sandbox on restart, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Minimum level: trace, debug, info, warn, error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Emit JSON lines instead of human-readable output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

/// Take `other`'s value when it is set.
fn overlay<T: Clone>(target: &mut Option<T>, other: &Option<T>) {
    if other.is_some() {
        target.clone_from(other);
    }
}

/// Merge a whole optional section, field by field.
fn overlay_section<T: Clone>(
    target: &mut Option<T>,
    other: &Option<T>,
    merge: impl FnOnce(&mut T, &T),
) {
    match (target.as_mut(), other) {
        (Some(current), Some(incoming)) => merge(current, incoming),
        (None, Some(incoming)) => *target = Some(incoming.clone()),
        _ => {}
    }
}

impl BuildSection {
    /// Merge another section into this one (other wins for set fields)
    pub fn merge(&mut self, other: &BuildSection) {
        overlay(&mut self.entry, &other.entry);
        overlay(&mut self.hash, &other.hash);
        overlay(&mut self.concurrency, &other.concurrency);
        overlay(&mut self.cooldown_ms, &other.cooldown_ms);
        overlay(&mut self.source_maps, &other.source_maps);
        overlay(&mut self.ignore, &other.ignore);
    }
}

impl ClassifySection {
    /// Merge another section into this one. Lists replace wholesale.
    pub fn merge(&mut self, other: &ClassifySection) {
        overlay(&mut self.code, &other.code);
        overlay(&mut self.asset, &other.asset);
        overlay(&mut self.scene, &other.scene);
        overlay(&mut self.config, &other.config);
    }

    /// Iterate over the configured lists with their class name
    pub fn lists(&self) -> impl Iterator<Item = (&'static str, &Vec<String>)> {
        [
            ("code", self.code.as_ref()),
            ("asset", self.asset.as_ref()),
            ("scene", self.scene.as_ref()),
            ("config", self.config.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, list)| list.map(|l| (name, l)))
    }
}

impl SandboxSection {
    /// Merge another section into this one (other wins for set fields)
    pub fn merge(&mut self, other: &SandboxSection) {
        overlay(&mut self.command, &other.command);
        overlay(&mut self.ready_poll_ms, &other.ready_poll_ms);
        overlay(&mut self.ready_timeout_ms, &other.ready_timeout_ms);
        overlay(&mut self.settle_ms, &other.settle_ms);
    }
}

impl LoggingSection {
    /// Merge another section into this one (other wins for set fields)
    pub fn merge(&mut self, other: &LoggingSection) {
        overlay(&mut self.level, &other.level);
        overlay(&mut self.json, &other.json);
    }
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(build) = &self.build {
            validate_build(build)?;
        }
        if let Some(classify) = &self.classify {
            validate_classify(classify)?;
        }
        if let Some(sandbox) = &self.sandbox {
            validate_sandbox(sandbox)?;
        }
        if let Some(logging) = &self.logging {
            validate_logging(logging)?;
        }
        Ok(())
    }

    /// Get the configured entry file, if present
    pub fn entry(&self) -> Option<&Path> {
        self.build.as_ref().and_then(|b| b.entry.as_deref())
    }

    /// Merge another project config into this one.
    ///
    /// Sections merge field by field; the other config wins for every field
    /// it sets. List-valued fields are replaced, not extended.
    pub fn merge(&mut self, other: &ProjectConfig) {
        overlay_section(&mut self.build, &other.build, BuildSection::merge);
        overlay_section(&mut self.classify, &other.classify, ClassifySection::merge);
        overlay_section(&mut self.sandbox, &other.sandbox, SandboxSection::merge);
        overlay_section(&mut self.logging, &other.logging, LoggingSection::merge);
    }
}

pub(crate) fn validate_build(build: &BuildSection) -> ConfigResult<()> {
    if build.concurrency == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "build.concurrency".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    if let Some(entry) = &build.entry {
        if entry.is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "build.entry".to_string(),
                reason: format!("must be repo-relative, got '{}'", entry.display()),
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_classify(classify: &ClassifySection) -> ConfigResult<()> {
    let mut owners: HashMap<String, &'static str> = HashMap::new();
    for (class, extensions) in classify.lists() {
        for ext in extensions {
            let normalized = ext.trim_start_matches('.').to_ascii_lowercase();
            if normalized.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("classify.{}", class),
                    reason: "extensions cannot be empty".to_string(),
                });
            }
            if let Some(previous) = owners.insert(normalized.clone(), class) {
                if previous != class {
                    return Err(ConfigError::InvalidValue {
                        field: format!("classify.{}", class),
                        reason: format!(
                            "extension '{}' is already classified as {}",
                            normalized, previous
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn validate_sandbox(sandbox: &SandboxSection) -> ConfigResult<()> {
    if let Some(command) = &sandbox.command {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "sandbox.command".to_string(),
                reason: "must name a program".to_string(),
            });
        }
    }
    if sandbox.ready_poll_ms == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: "sandbox.ready_poll_ms".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn validate_logging(logging: &LoggingSection) -> ConfigResult<()> {
    if let Some(level) = &logging.level {
        if !is_valid_level(level) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!(
                    "must be one of trace, debug, info, warn, error; got '{}'",
                    level
                ),
            });
        }
    }
    Ok(())
}

/// Check if a log level name is valid
pub(crate) fn is_valid_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_project_config() {
        let toml = r#"
[build]
entry = "src/main.ts"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.entry(), Some(Path::new("src/main.ts")));
        assert!(config.sandbox.is_none());
    }

    #[test]
    fn test_parse_full_project_config() {
        let toml = r#"
[build]
entry = "src/main.ts"
hash = "sha256"
concurrency = 4
cooldown_ms = 1000
source_maps = true
ignore = [".git"]

[classify]
code = ["ts", "lua"]
asset = ["png"]

[sandbox]
command = ["node", "runner.js"]
ready_poll_ms = 25
ready_timeout_ms = 0
settle_ms = 50

[logging]
level = "debug"
json = true
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());

        let build = config.build.as_ref().unwrap();
        assert_eq!(build.hash, Some(HashAlgorithm::Sha256));
        assert_eq!(build.concurrency, Some(4));
        assert_eq!(
            config.classify.as_ref().unwrap().code,
            Some(vec!["ts".to_string(), "lua".to_string()])
        );
        assert_eq!(config.sandbox.as_ref().unwrap().ready_timeout_ms, Some(0));
    }

    #[test]
    fn test_unknown_hash_is_rejected() {
        let toml = r#"
[build]
hash = "md5"
"#;
        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let toml = r#"
[build]
entrypoint = "src/main.ts"
"#;
        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let config = ProjectConfig {
            build: Some(BuildSection {
                concurrency: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extension_in_two_classes_is_invalid() {
        let config = ProjectConfig {
            classify: Some(ClassifySection {
                code: Some(vec!["json".to_string()]),
                config: Some(vec![".JSON".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("json"));
    }

    #[test]
    fn test_empty_sandbox_command_is_invalid() {
        let config = ProjectConfig {
            sandbox: Some(SandboxSection {
                command: Some(vec![]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let config = ProjectConfig {
            logging: Some(LoggingSection {
                level: Some("loud".to_string()),
                json: None,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_scalars_last_write_wins() {
        let mut base: ProjectConfig = toml::from_str(
            r#"
[build]
entry = "src/main.ts"
concurrency = 2
"#,
        )
        .unwrap();
        let other: ProjectConfig = toml::from_str(
            r#"
[build]
concurrency = 16
"#,
        )
        .unwrap();

        base.merge(&other);
        let build = base.build.unwrap();
        assert_eq!(build.entry, Some(PathBuf::from("src/main.ts")));
        assert_eq!(build.concurrency, Some(16));
    }

    #[test]
    fn test_merge_replaces_arrays_wholesale() {
        let mut base: ProjectConfig = toml::from_str(
            r#"
[classify]
code = ["ts", "js"]
asset = ["png"]
"#,
        )
        .unwrap();
        let other: ProjectConfig = toml::from_str(
            r#"
[classify]
code = ["lua"]
"#,
        )
        .unwrap();

        base.merge(&other);
        let classify = base.classify.unwrap();
        assert_eq!(classify.code, Some(vec!["lua".to_string()]));
        assert_eq!(classify.asset, Some(vec!["png".to_string()]));
    }

    #[test]
    fn test_hash_algorithm_parse() {
        assert_eq!(HashAlgorithm::parse("SHA256"), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::parse("rolling"), Some(HashAlgorithm::Rolling));
        assert_eq!(HashAlgorithm::parse("crc32"), None);
        assert_eq!(HashAlgorithm::Sha256.name(), "sha256");
    }
}
