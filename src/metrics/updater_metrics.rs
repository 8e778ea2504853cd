//! Updater metrics using OpenTelemetry.

use crate::updater::RollbackOutcome;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for the watch-and-apply engine.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_flags::metrics::UpdaterMetrics;
/// use opentelemetry::global;
///
/// let metrics = UpdaterMetrics::new(global::meter("hotswap-flags"));
/// let timer = metrics.start_initialize();
/// // ... bulk read and apply ...
/// metrics.record_initialize(timer);
/// ```
#[derive(Clone)]
pub struct UpdaterMetrics {
    updates_applied: Counter<u64>,
    updates_rejected: Counter<u64>,
    updates_ignored: Counter<u64>,
    rollbacks: Counter<u64>,
    resyncs: Counter<u64>,
    backend_errors: Counter<u64>,
    initialize_duration: Histogram<f64>,
    flags_age_seconds: Gauge<i64>,
    last_update: Arc<parking_lot::Mutex<Instant>>,
}

impl UpdaterMetrics {
    /// Create a collector registering its instruments on `meter`.
    pub fn new(meter: Meter) -> Self {
        let updates_applied = meter
            .u64_counter("hotswap_flags.updates.applied")
            .with_description("Flag updates applied from the watched source")
            .build();

        let updates_rejected = meter
            .u64_counter("hotswap_flags.updates.rejected")
            .with_description("Flag updates that failed to parse or validate")
            .build();

        let updates_ignored = meter
            .u64_counter("hotswap_flags.updates.ignored")
            .with_description("Observed changes for unknown, static, deleted or directory keys")
            .build();

        let rollbacks = meter
            .u64_counter("hotswap_flags.rollbacks")
            .with_description("Rollbacks issued against the watched source, by outcome")
            .build();

        let resyncs = meter
            .u64_counter("hotswap_flags.resyncs")
            .with_description("Full re-reads after the watch cursor expired")
            .build();

        let backend_errors = meter
            .u64_counter("hotswap_flags.backend_errors")
            .with_description("Retryable watch errors")
            .build();

        let initialize_duration = meter
            .f64_histogram("hotswap_flags.initialize.duration")
            .with_description("Duration of the initial bulk read and apply in seconds")
            .with_unit("s")
            .build();

        let flags_age_seconds = meter
            .i64_gauge("hotswap_flags.age")
            .with_description("Time since the last applied flag update in seconds")
            .with_unit("s")
            .build();

        Self {
            updates_applied,
            updates_rejected,
            updates_ignored,
            rollbacks,
            resyncs,
            backend_errors,
            initialize_duration,
            flags_age_seconds,
            last_update: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    /// Start timing `initialize`.
    pub fn start_initialize(&self) -> Instant {
        Instant::now()
    }

    /// Record how long `initialize` took.
    pub fn record_initialize(&self, start: Instant) {
        self.initialize_duration
            .record(start.elapsed().as_secs_f64(), &[]);
    }

    pub(crate) fn record_applied(&self) {
        self.updates_applied.add(1, &[]);
        *self.last_update.lock() = Instant::now();
    }

    pub(crate) fn record_rejected(&self) {
        self.updates_rejected.add(1, &[]);
    }

    pub(crate) fn record_ignored(&self) {
        self.updates_ignored.add(1, &[]);
    }

    pub(crate) fn record_rollback(&self, outcome: RollbackOutcome) {
        self.rollbacks
            .add(1, &[KeyValue::new("outcome", outcome.as_str())]);
    }

    pub(crate) fn record_resync(&self) {
        self.resyncs.add(1, &[]);
    }

    pub(crate) fn record_backend_error(&self) {
        self.backend_errors.add(1, &[]);
    }

    /// Publish the time since the last applied update.
    pub fn update_flags_age(&self) {
        let age_secs = self.last_update.lock().elapsed().as_secs() as i64;
        self.flags_age_seconds.record(age_secs, &[]);
    }
}

impl std::fmt::Debug for UpdaterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterMetrics").finish_non_exhaustive()
    }
}
