//! OpenTelemetry instrumentation for the updater.
//!
//! Counters cover applied, rejected and ignored updates, rollbacks by outcome,
//! resyncs and backend errors. A histogram tracks how long `initialize` takes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotswap_flags::prelude::*;
//! use opentelemetry::global;
//!
//! # fn example() {
//! let metrics = UpdaterMetrics::new(global::meter("my-app"));
//! let store = MemoryStore::new();
//! let updater = Updater::builder(MemorySource::new(store, "/flagz"))
//!     .with_flags(FlagSet::new())
//!     .with_metrics(metrics)
//!     .build();
//! # let _ = updater;
//! # }
//! ```

mod updater_metrics;

pub use updater_metrics::UpdaterMetrics;
