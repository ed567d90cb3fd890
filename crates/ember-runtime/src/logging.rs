//! Structured logging setup
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` (so `RUST_LOG`
//! still wins) and either a human-readable or a JSON fmt layer. Only the
//! first initialization takes effect.
//!
//! ```no_run
//! use ember_runtime::logging::{init_logging, LoggingConfig};
//!
//! init_logging(LoggingConfig::default());
//! tracing::info!(entry = "src/main.ts", "starting build");
//! ```

use ember_config::LoggingSettings;
use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates whose events the configured level applies to
const EMBER_TARGETS: [&str; 3] = ["ember_build", "ember_config", "ember_runtime"];

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for Ember's own targets
    pub level: Level,

    /// Emit JSON lines instead of pretty console output
    pub use_json: bool,

    /// Include the module target in each event
    pub include_target: bool,

    /// Include file and line number
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            level: parse_level(&settings.level),
            use_json: settings.json,
            include_location: settings.json,
            ..Default::default()
        }
    }

    fn directives(&self) -> Vec<Directive> {
        EMBER_TARGETS
            .iter()
            .filter_map(|target| {
                format!("{}={}", target, LevelFilter::from_level(self.level))
                    .parse()
                    .ok()
            })
            .collect()
    }
}

/// Parse a level name, case-insensitively; unknown names fall back to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        for directive in config.directives() {
            filter = filter.add_directive(directive);
        }
        if env::var("RUST_LOG").is_err() {
            if let Ok(directive) = "warn".parse::<Directive>() {
                filter = filter.add_directive(directive);
            }
        }

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Initialize from resolved `[logging]` settings
pub fn init_from_settings(settings: &LoggingSettings) {
    init_logging(LoggingConfig::from_settings(settings));
}
