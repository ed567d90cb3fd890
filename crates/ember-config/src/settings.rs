//! Resolved settings
//!
//! [`ProjectConfig`] keeps every field optional so layers can be merged.
//! [`Settings`] is the final, fully-populated view consumed by the build
//! and runtime crates.

use crate::project::{HashAlgorithm, ProjectConfig};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_READY_POLL_MS: u64 = 50;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SETTLE_MS: u64 = 100;

/// Fully resolved configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    pub build: BuildSettings,
    pub classify: ClassifySettings,
    pub sandbox: SandboxSettings,
    pub logging: LoggingSettings,
}

/// Build pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    pub entry: Option<PathBuf>,
    pub hash: HashAlgorithm,
    pub concurrency: usize,
    /// Zero disables the cooldown
    pub cooldown: Duration,
    pub source_maps: bool,
    pub ignore: Vec<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            entry: None,
            hash: HashAlgorithm::Rolling,
            concurrency: DEFAULT_CONCURRENCY,
            cooldown: Duration::ZERO,
            source_maps: false,
            ignore: strings(&[".git", "node_modules", "target"]),
        }
    }
}

/// Extension lists per change class, lowercase and without leading dots
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifySettings {
    pub code: Vec<String>,
    pub asset: Vec<String>,
    pub scene: Vec<String>,
    pub config: Vec<String>,
}

impl Default for ClassifySettings {
    fn default() -> Self {
        Self {
            code: strings(&["cs", "js", "ts", "tsx", "jsx", "mjs", "cjs"]),
            asset: strings(&["png", "jpg", "jpeg", "gif", "prefab", "mat", "shader"]),
            scene: strings(&["unity"]),
            config: strings(&["json", "yaml", "yml"]),
        }
    }
}

/// Sandbox settings
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub command: Vec<String>,
    pub ready_poll: Duration,
    /// `None` waits for readiness indefinitely
    pub ready_timeout: Option<Duration>,
    pub settle: Duration,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            command: strings(&["node", "sandbox-runner.js"]),
            ready_poll: Duration::from_millis(DEFAULT_READY_POLL_MS),
            ready_timeout: Some(Duration::from_millis(DEFAULT_READY_TIMEOUT_MS)),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Resolve a (merged) project configuration against the defaults
    pub fn resolve(config: &ProjectConfig) -> Self {
        let mut settings = Settings::default();

        if let Some(build) = &config.build {
            let target = &mut settings.build;
            if let Some(entry) = &build.entry {
                target.entry = Some(entry.clone());
            }
            if let Some(hash) = build.hash {
                target.hash = hash;
            }
            if let Some(concurrency) = build.concurrency {
                target.concurrency = concurrency.max(1);
            }
            if let Some(cooldown) = build.cooldown_ms {
                target.cooldown = Duration::from_millis(cooldown);
            }
            if let Some(source_maps) = build.source_maps {
                target.source_maps = source_maps;
            }
            if let Some(ignore) = &build.ignore {
                target.ignore = ignore.clone();
            }
        }

        if let Some(classify) = &config.classify {
            let target = &mut settings.classify;
            if let Some(code) = &classify.code {
                target.code = normalize_extensions(code);
            }
            if let Some(asset) = &classify.asset {
                target.asset = normalize_extensions(asset);
            }
            if let Some(scene) = &classify.scene {
                target.scene = normalize_extensions(scene);
            }
            if let Some(config) = &classify.config {
                target.config = normalize_extensions(config);
            }
        }

        if let Some(sandbox) = &config.sandbox {
            let target = &mut settings.sandbox;
            if let Some(command) = &sandbox.command {
                target.command = command.clone();
            }
            if let Some(poll) = sandbox.ready_poll_ms {
                target.ready_poll = Duration::from_millis(poll.max(1));
            }
            if let Some(timeout) = sandbox.ready_timeout_ms {
                target.ready_timeout = (timeout > 0).then(|| Duration::from_millis(timeout));
            }
            if let Some(settle) = sandbox.settle_ms {
                target.settle = Duration::from_millis(settle);
            }
        }

        if let Some(logging) = &config.logging {
            if let Some(level) = &logging.level {
                settings.logging.level = level.to_ascii_lowercase();
            }
            if let Some(json) = logging.json {
                settings.logging.json = json;
            }
        }

        settings
    }
}

fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
