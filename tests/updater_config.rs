//! Loading updater settings from a file layered under environment variables.

use hotswap_flags::prelude::*;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

// Each test owns its prefix so parallel tests never see each other's variables.
fn clear_prefix(prefix: &str) {
    for (key, _) in env::vars() {
        if key.starts_with(prefix) {
            unsafe {
                env::remove_var(&key);
            }
        }
    }
}

#[test]
fn test_env_overrides_file() {
    let prefix = "HSFLAGS_OVERRIDE";
    clear_prefix(prefix);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("updater.yaml");
    fs::write(
        &path,
        "resync_delay_ms: 300\nretry_base_delay_ms: 40\nrollback_enabled: false\n",
    )
    .unwrap();

    unsafe {
        env::set_var("HSFLAGS_OVERRIDE_RESYNC_DELAY_MS", "750");
        env::set_var("HSFLAGS_OVERRIDE_ALLOW_NON_DYNAMIC_ON_INIT", "true");
    }

    let config = UpdaterConfig::load(Some(&path), Some(prefix)).unwrap();
    assert_eq!(config.resync_delay(), Duration::from_millis(750));
    assert!(config.allow_non_dynamic_on_init);
    // Keys absent from the environment keep the file's values.
    assert_eq!(config.retry_base_delay_ms, 40);
    assert!(!config.rollback_enabled);
    assert_eq!(config.retry_jitter_ms, 500);

    clear_prefix(prefix);
}

#[test]
fn test_file_wins_without_prefix() {
    let prefix = "HSFLAGS_IGNORED";
    clear_prefix(prefix);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("updater.toml");
    fs::write(&path, "resync_delay_ms = 300\n").unwrap();

    unsafe {
        env::set_var("HSFLAGS_IGNORED_RESYNC_DELAY_MS", "750");
    }

    let config = UpdaterConfig::load(Some(&path), None).unwrap();
    assert_eq!(config.resync_delay_ms, 300);

    clear_prefix(prefix);
}

#[test]
fn test_unparsable_env_value_is_config_error() {
    let prefix = "HSFLAGS_BROKEN";
    clear_prefix(prefix);

    unsafe {
        env::set_var("HSFLAGS_BROKEN_RETRY_JITTER_MS", "lots");
    }

    let err = UpdaterConfig::load(None, Some(prefix)).unwrap_err();
    assert!(matches!(err, FlagError::Config(_)));

    clear_prefix(prefix);
}
