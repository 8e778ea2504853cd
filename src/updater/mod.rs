//! The watch-and-apply engine.
//!
//! An [`Updater`] binds a [`FlagSet`] to a [`WatchSource`]. `initialize` reads
//! everything under the watched root and applies it; `start` launches one
//! background task that applies each observed change, rolls back rejected
//! writes in the source, resyncs when the cursor falls out of the source's
//! history, and backs off on transient errors; `stop` cancels that task.
//!
//! # Examples
//!
//! ```rust
//! use hotswap_flags::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> hotswap_flags::error::Result<()> {
//! let flags = FlagSet::new();
//! let limit = flags.dyn_int64("rate_limit", 100, "requests per second")?;
//!
//! let store = MemoryStore::new();
//! store.set("/flagz/rate_limit", "250").unwrap();
//!
//! let updater = Updater::new(flags, MemorySource::new(store.clone(), "/flagz"));
//! updater.initialize().await?;
//! assert_eq!(limit.value(), 250);
//!
//! updater.start()?;
//! // ... later changes to /flagz/rate_limit are applied in the background ...
//! updater.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod builder;
mod config;
mod rollback;

pub use builder::UpdaterBuilder;
pub use config::UpdaterConfig;
pub use rollback::RollbackOutcome;

use crate::error::{FlagError, Result};
use crate::registry::{FlagSet, flag_name_from_key};
use crate::sources::{ChangeValue, ObservedChange, Snapshot, WatchCursor, WatchError, WatchSource};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use crate::metrics::UpdaterMetrics;

/// Keeps flags in a [`FlagSet`] in sync with a [`WatchSource`].
///
/// Lifecycle: `initialize` once, then `start`/`stop` the background watch as
/// often as needed. Misuse (starting twice, stopping while idle, ...) returns
/// an error and changes nothing. Dropping a watching updater cancels its task.
pub struct Updater<S: WatchSource> {
    shared: Arc<Shared<S>>,
    lifecycle: Mutex<Lifecycle>,
}

enum Lifecycle {
    Unconfigured,
    Initializing,
    Initialized,
    Watching {
        cancel: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped {
        task: Option<JoinHandle<()>>,
    },
}

/// Returns the lifecycle to `Unconfigured` unless initialization completed.
struct InitializeGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    armed: bool,
}

impl<'a> InitializeGuard<'a> {
    fn new(lifecycle: &'a Mutex<Lifecycle>) -> Self {
        Self {
            lifecycle,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InitializeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut lifecycle = self.lifecycle.lock();
        if matches!(*lifecycle, Lifecycle::Initializing) {
            *lifecycle = Lifecycle::Unconfigured;
        }
    }
}

struct Shared<S> {
    source: S,
    flags: FlagSet,
    config: UpdaterConfig,
    cursor: AtomicU64,
    telemetry: Telemetry,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    Initialize,
    Resync,
}

impl<S: WatchSource> Updater<S> {
    /// Start building an updater for `source`.
    pub fn builder(source: S) -> UpdaterBuilder<S> {
        UpdaterBuilder::new(source)
    }

    /// An updater for `flags` and `source` with default settings.
    pub fn new(flags: FlagSet, source: S) -> Self {
        Self::builder(source).with_flags(flags).build()
    }

    fn from_parts(source: S, flags: FlagSet, config: UpdaterConfig, telemetry: Telemetry) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                flags,
                config,
                cursor: AtomicU64::new(0),
                telemetry,
            }),
            lifecycle: Mutex::new(Lifecycle::Unconfigured),
        }
    }

    /// The registry being updated.
    pub fn flags(&self) -> &FlagSet {
        &self.shared.flags
    }

    /// The watched source.
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// Active settings.
    pub fn config(&self) -> &UpdaterConfig {
        &self.shared.config
    }

    /// The position watching resumes from.
    pub fn cursor(&self) -> WatchCursor {
        self.shared.cursor()
    }

    /// Whether the background task is running.
    pub fn is_watching(&self) -> bool {
        matches!(&*self.lifecycle.lock(), Lifecycle::Watching { task, .. } if !task.is_finished())
    }

    /// Read everything under the watched root and apply it.
    ///
    /// Every key is attempted. Keys whose value applies cleanly take effect
    /// even when others fail; subdirectories and empty values are skipped.
    ///
    /// # Errors
    ///
    /// - [`FlagError::AlreadyInitialized`] on a second call.
    /// - [`FlagError::Source`] if the bulk read fails; the updater can then be
    ///   initialized again. The same holds if the returned future is dropped
    ///   before the read completes.
    /// - [`FlagError::Aggregate`] listing every key without a matching flag,
    ///   every static flag (unless `allow_non_dynamic_on_init`), and every value
    ///   that failed to parse or validate. The updater is still initialized.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Unconfigured) {
                return Err(FlagError::AlreadyInitialized);
            }
            *lifecycle = Lifecycle::Initializing;
        }

        // Dropping the future mid-read must not strand the updater in Initializing.
        let guard = InitializeGuard::new(&self.lifecycle);

        let started = self.shared.telemetry.start_initialize();
        let snapshot = self
            .shared
            .source
            .bulk_read()
            .await
            .map_err(FlagError::Source)?;

        let (applied, errors) = self.shared.apply_snapshot(&snapshot, ApplyMode::Initialize);
        self.shared.advance(snapshot.cursor);
        *self.lifecycle.lock() = Lifecycle::Initialized;
        guard.disarm();
        self.shared.telemetry.record_initialize(started);

        info!(
            source = %self.shared.source.name(),
            cursor = %snapshot.cursor,
            applied,
            errors = errors.len(),
            "initialized flags from source"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(FlagError::Aggregate(errors))
        }
    }

    /// Launch the background watch task.
    ///
    /// A stopped updater may be started again; it resumes from its cursor.
    ///
    /// # Errors
    ///
    /// [`FlagError::NotInitialized`], [`FlagError::AlreadyWatching`], or
    /// [`FlagError::NoRuntime`] when called outside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match &mut *lifecycle {
            Lifecycle::Unconfigured | Lifecycle::Initializing => {
                return Err(FlagError::NotInitialized);
            }
            Lifecycle::Watching { .. } => return Err(FlagError::AlreadyWatching),
            Lifecycle::Initialized => {}
            Lifecycle::Stopped { task } => {
                if let Some(previous) = task.take() {
                    previous.abort();
                }
            }
        }

        let handle = tokio::runtime::Handle::try_current().map_err(|_| FlagError::NoRuntime)?;
        let cancel = CancellationToken::new();
        let task = handle.spawn(watch_loop(Arc::clone(&self.shared), cancel.clone()));
        *lifecycle = Lifecycle::Watching { cancel, task };
        Ok(())
    }

    /// Ask the background task to stop and return immediately.
    ///
    /// The task exits at its next suspension point. Use
    /// [`shutdown`](Self::shutdown) to also wait for it.
    ///
    /// # Errors
    ///
    /// [`FlagError::NotWatching`] if no task is running.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped { task: None }) {
            Lifecycle::Watching { cancel, task } => {
                cancel.cancel();
                *lifecycle = Lifecycle::Stopped { task: Some(task) };
                Ok(())
            }
            other => {
                *lifecycle = other;
                Err(FlagError::NotWatching)
            }
        }
    }

    /// Stop watching, if watching, and wait for the task to finish.
    pub async fn shutdown(&self) {
        let _ = self.stop();
        let task = match &mut *self.lifecycle.lock() {
            Lifecycle::Stopped { task } => task.take(),
            _ => None,
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "watch task panicked");
                }
            }
        }
    }
}

impl<S: WatchSource> Drop for Updater<S> {
    fn drop(&mut self) {
        if let Lifecycle::Watching { cancel, .. } = &*self.lifecycle.lock() {
            cancel.cancel();
        }
    }
}

impl<S: WatchSource> std::fmt::Debug for Updater<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("source", &self.shared.source.name())
            .field("cursor", &self.cursor())
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl<S: WatchSource> Shared<S> {
    fn cursor(&self) -> WatchCursor {
        WatchCursor(self.cursor.load(Ordering::Acquire))
    }

    fn advance(&self, cursor: WatchCursor) {
        self.cursor.fetch_max(cursor.index(), Ordering::AcqRel);
    }

    /// Apply every leaf of a bulk read; returns the number applied and the failures.
    fn apply_snapshot(&self, snapshot: &Snapshot, mode: ApplyMode) -> (usize, Vec<FlagError>) {
        let mut applied = 0;
        let mut errors = Vec::new();

        for entry in &snapshot.entries {
            if entry.is_dir {
                debug!(key = %entry.key, "ignoring subdirectory");
                continue;
            }
            let name = match flag_name_from_key(&entry.key) {
                Ok(name) => name,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let Some(flag) = self.flags.lookup(name) else {
                errors.push(FlagError::NotFound(name.to_string()));
                continue;
            };
            if !flag.is_dynamic() {
                let permitted =
                    mode == ApplyMode::Initialize && self.config.allow_non_dynamic_on_init;
                if !permitted {
                    if mode == ApplyMode::Initialize {
                        errors.push(FlagError::NotDynamic(name.to_string()));
                    } else {
                        debug!(flag = %name, "resync skipping non-dynamic flag");
                    }
                    continue;
                }
            }
            if entry.value.is_empty() {
                debug!(flag = %name, "ignoring empty value");
                continue;
            }
            match self.flags.set(name, &entry.value) {
                Ok(()) => applied += 1,
                Err(e) => errors.push(e),
            }
        }
        (applied, errors)
    }

    async fn resync(&self) -> std::result::Result<(), WatchError> {
        let snapshot = self.source.bulk_read().await?;
        let (applied, errors) = self.apply_snapshot(&snapshot, ApplyMode::Resync);
        self.advance(snapshot.cursor);
        self.telemetry.record_resync();

        info!(cursor = %snapshot.cursor, applied, "re-read flags from source");
        if !errors.is_empty() {
            warn!(error = %FlagError::Aggregate(errors), "resync yielded errors");
        }
        Ok(())
    }

    async fn handle_change(&self, change: ObservedChange) {
        let cursor = change.cursor;
        self.apply_change(&change).await;
        self.advance(cursor);
    }

    async fn apply_change(&self, change: &ObservedChange) {
        let value = match &change.value {
            ChangeValue::Directory => {
                debug!(key = %change.key, cursor = %change.cursor, "ignoring directory");
                self.telemetry.record_ignored();
                return;
            }
            ChangeValue::Deleted => {
                debug!(key = %change.key, cursor = %change.cursor, "ignoring deletion");
                self.telemetry.record_ignored();
                return;
            }
            ChangeValue::Value(value) if value.is_empty() => {
                debug!(key = %change.key, cursor = %change.cursor, "ignoring empty value");
                self.telemetry.record_ignored();
                return;
            }
            ChangeValue::Value(value) => value,
        };

        let name = match flag_name_from_key(&change.key) {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "ignoring change");
                self.telemetry.record_ignored();
                return;
            }
        };
        match self.flags.lookup(name) {
            None => {
                warn!(flag = %name, "ignoring change to unknown flag");
                self.telemetry.record_ignored();
                return;
            }
            Some(flag) if !flag.is_dynamic() => {
                warn!(flag = %name, "ignoring change to non-dynamic flag");
                self.telemetry.record_ignored();
                return;
            }
            Some(_) => {}
        }

        match self.flags.set(name, value) {
            Ok(()) => {
                self.telemetry.record_applied();
                info!(flag = %name, value = %value, cursor = %change.cursor, "updated flag");
            }
            Err(e) => {
                self.telemetry.record_rejected();
                warn!(flag = %name, error = %e, cursor = %change.cursor, "failed updating flag");
                if self.config.rollback_enabled {
                    let outcome = rollback::roll_back(&self.source, name, change, &e).await;
                    self.telemetry.record_rollback(outcome);
                }
            }
        }
    }
}

async fn watch_loop<S: WatchSource>(shared: Arc<Shared<S>>, cancel: CancellationToken) {
    info!(source = %shared.source.name(), cursor = %shared.cursor(), "starting watch");

    while !cancel.is_cancelled() {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.source.watch_next(shared.cursor(), &cancel) => result,
        };

        match result {
            Ok(change) => shared.handle_change(change).await,
            Err(WatchError::Cancelled) => break,
            Err(WatchError::DeadlineExceeded) => continue,
            Err(WatchError::ResyncRequired(reason)) => {
                info!(reason = %reason, "watch cursor expired, re-reading everything");
                if !pause(shared.config.resync_delay(), &cancel).await {
                    break;
                }
                if let Err(e) = shared.resync().await {
                    shared.telemetry.record_backend_error();
                    let delay = backoff::retry_delay(&shared.config);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "resync failed, retrying after backoff");
                    if !pause(delay, &cancel).await {
                        break;
                    }
                }
            }
            Err(e) => {
                shared.telemetry.record_backend_error();
                let delay = backoff::retry_delay(&shared.config);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "watch failed, retrying after backoff");
                if !pause(delay, &cancel).await {
                    break;
                }
            }
        }
    }

    info!(source = %shared.source.name(), cursor = %shared.cursor(), "stopped watching");
}

/// Sleep unless cancelled first; returns false on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Metric hooks that compile to nothing without the `metrics` feature.
#[derive(Clone, Default)]
pub(crate) struct Telemetry {
    #[cfg(feature = "metrics")]
    metrics: Option<UpdaterMetrics>,
}

impl Telemetry {
    #[cfg(feature = "metrics")]
    pub(crate) fn with_metrics(metrics: UpdaterMetrics) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    #[cfg(feature = "metrics")]
    fn each(&self, record: impl FnOnce(&UpdaterMetrics)) {
        if let Some(metrics) = &self.metrics {
            record(metrics);
        }
    }

    fn start_initialize(&self) -> Instant {
        Instant::now()
    }

    fn record_initialize(&self, started: Instant) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_initialize(started));
        #[cfg(not(feature = "metrics"))]
        let _ = started;
    }

    fn record_applied(&self) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_applied());
    }

    fn record_rejected(&self) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_rejected());
    }

    fn record_ignored(&self) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_ignored());
    }

    fn record_rollback(&self, outcome: RollbackOutcome) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_rollback(outcome));
        #[cfg(not(feature = "metrics"))]
        let _ = outcome;
    }

    fn record_resync(&self) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_resync());
    }

    fn record_backend_error(&self) {
        #[cfg(feature = "metrics")]
        self.each(|m| m.record_backend_error());
    }
}
