//! Configuration loading and precedence tests

use ember_config::{ConfigLoader, HashAlgorithm, PROJECT_CONFIG_FILE};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// Layering
// ============================================================================

#[test]
#[serial]
fn test_project_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    let global = write(
        temp_dir.path(),
        "global.toml",
        r#"
[build]
hash = "sha256"
concurrency = 3

[sandbox]
settle_ms = 500
"#,
    );
    write(
        temp_dir.path(),
        PROJECT_CONFIG_FILE,
        r#"
[build]
concurrency = 6
"#,
    );

    let mut loader = ConfigLoader::new().with_global_path(global);
    let settings = loader
        .load_from_directory(temp_dir.path())
        .unwrap()
        .settings();

    assert_eq!(settings.build.hash, HashAlgorithm::Sha256);
    assert_eq!(settings.build.concurrency, 6);
    assert_eq!(settings.sandbox.settle, Duration::from_millis(500));
}

#[test]
#[serial]
fn test_env_overrides_project() {
    let temp_dir = TempDir::new().unwrap();
    write(
        temp_dir.path(),
        PROJECT_CONFIG_FILE,
        r#"
[build]
entry = "src/main.ts"

[logging]
level = "info"
"#,
    );

    env::set_var("EMBER_ENTRY", "src/other.ts");
    env::set_var("EMBER_LOG_LEVEL", "trace");
    let mut loader = ConfigLoader::new().with_global_path(temp_dir.path().join("none.toml"));
    let config = loader.load_from_directory(temp_dir.path());
    env::remove_var("EMBER_ENTRY");
    env::remove_var("EMBER_LOG_LEVEL");

    let settings = config.unwrap().settings();
    assert_eq!(settings.build.entry, Some(PathBuf::from("src/other.ts")));
    assert_eq!(settings.logging.level, "trace");
}

#[test]
#[serial]
fn test_project_list_replaces_global_list() {
    let temp_dir = TempDir::new().unwrap();
    let global = write(
        temp_dir.path(),
        "global.toml",
        r#"
[sandbox]
command = ["deno", "run", "runner.ts"]
"#,
    );
    write(
        temp_dir.path(),
        PROJECT_CONFIG_FILE,
        r#"
[sandbox]
command = ["node"]
"#,
    );

    let mut loader = ConfigLoader::new().with_global_path(global);
    let settings = loader
        .load_from_directory(temp_dir.path())
        .unwrap()
        .settings();

    assert_eq!(settings.sandbox.command, vec!["node".to_string()]);
}

#[test]
#[serial]
fn test_no_config_anywhere_gives_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let mut loader = ConfigLoader::new().with_global_path(temp_dir.path().join("none.toml"));
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(!config.is_project());
    assert_eq!(config.settings(), ember_config::Settings::default());
}

// ============================================================================
// Invalid files
// ============================================================================

#[rstest]
#[case("[build]\nconcurrency = 0\n")]
#[case("[build]\nhash = \"md5\"\n")]
#[case("[sandbox]\ncommand = []\n")]
#[case("[logging]\nlevel = \"chatty\"\n")]
#[case("[classify]\ncode = [\"json\"]\nconfig = [\"json\"]\n")]
#[case("[unknown]\nkey = 1\n")]
#[serial]
fn test_invalid_project_config_is_rejected(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), PROJECT_CONFIG_FILE, content);

    let mut loader = ConfigLoader::new().with_global_path(temp_dir.path().join("none.toml"));
    assert!(loader.load_from_directory(temp_dir.path()).is_err());
}
