//! Builder for [`Updater`].

use crate::registry::FlagSet;
use crate::sources::WatchSource;
use crate::updater::{Telemetry, Updater, UpdaterConfig};

#[cfg(feature = "metrics")]
use crate::metrics::UpdaterMetrics;

/// Fluent construction of an [`Updater`].
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::prelude::*;
///
/// let flags = FlagSet::new();
/// let config = UpdaterConfig {
///     retry_base_delay_ms: 250,
///     ..UpdaterConfig::default()
/// };
///
/// let updater = Updater::builder(MemorySource::new(MemoryStore::new(), "/flagz"))
///     .with_flags(flags)
///     .with_config(config)
///     .build();
/// assert_eq!(updater.config().retry_base_delay_ms, 250);
/// ```
pub struct UpdaterBuilder<S: WatchSource> {
    source: S,
    flags: FlagSet,
    config: UpdaterConfig,
    telemetry: Telemetry,
}

impl<S: WatchSource> UpdaterBuilder<S> {
    /// Start from `source`, an empty registry and default settings.
    pub fn new(source: S) -> Self {
        Self {
            source,
            flags: FlagSet::new(),
            config: UpdaterConfig::default(),
            telemetry: Telemetry::default(),
        }
    }

    /// The registry to keep in sync.
    pub fn with_flags(mut self, flags: FlagSet) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the engine settings.
    pub fn with_config(mut self, config: UpdaterConfig) -> Self {
        self.config = config;
        self
    }

    /// Record OpenTelemetry metrics for this updater.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: UpdaterMetrics) -> Self {
        self.telemetry = Telemetry::with_metrics(metrics);
        self
    }

    /// Build the updater. It still has to be initialized.
    pub fn build(self) -> Updater<S> {
        Updater::from_parts(self.source, self.flags, self.config, self.telemetry)
    }
}
