//! Updater tuning knobs.

use crate::error::{FlagError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings for the watch-and-apply engine.
///
/// Every field has a default, so an empty file or no file at all is valid.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::updater::UpdaterConfig;
///
/// let config = UpdaterConfig::default();
/// assert_eq!(config.resync_delay_ms, 200);
/// assert!(config.rollback_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Pause before re-reading everything after the cursor expired
    pub resync_delay_ms: u64,
    /// Fixed part of the delay after a retryable watch error
    pub retry_base_delay_ms: u64,
    /// Upper bound of the random part of that delay
    pub retry_jitter_ms: u64,
    /// Let `initialize` set flags that are not dynamic
    pub allow_non_dynamic_on_init: bool,
    /// Undo rejected writes in the source when it supports conditional writes
    pub rollback_enabled: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            resync_delay_ms: 200,
            retry_base_delay_ms: 1000,
            retry_jitter_ms: 500,
            allow_non_dynamic_on_init: false,
            rollback_enabled: true,
        }
    }
}

impl UpdaterConfig {
    /// Load settings from an optional file, then apply environment overrides.
    ///
    /// The file format follows its extension (`.yaml`, `.yml`, `.toml`,
    /// `.json`); a missing file is not an error. With `env_prefix` set to
    /// `"FLAGZ"`, `FLAGZ_RESYNC_DELAY_MS=500` overrides `resync_delay_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Config`] if the file cannot be parsed or a value
    /// has the wrong type.
    pub fn load(path: Option<&Path>, env_prefix: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        if let Some(prefix) = env_prefix {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .try_parsing(true),
            );
        }

        builder
            .build()
            .map_err(|e| FlagError::Config(format!("failed to load updater settings: {}", e)))?
            .try_deserialize::<Self>()
            .map_err(|e| FlagError::Config(format!("invalid updater settings: {}", e)))
    }

    /// Pause before resyncing.
    pub fn resync_delay(&self) -> Duration {
        Duration::from_millis(self.resync_delay_ms)
    }
}
