//! # hotswap-flags
//!
//! Lock-free dynamic flags, kept in sync with a watched key-value store or a
//! mounted directory.
//!
//! ## Overview
//!
//! `hotswap-flags` combines two pieces:
//! - A typed flag model: each [`DynamicFlag`](core::DynamicFlag) holds an
//!   immutable value behind an `arc-swap` cell, so reads never block and never
//!   observe a half-written value. Writes parse text, run an optional validator
//!   and notify an optional callback off-thread.
//! - A watch-and-apply engine: an [`Updater`](updater::Updater) reads every key
//!   under a root, applies it to a [`FlagSet`](registry::FlagSet), then follows
//!   changes from a resumable cursor. Rejected writes are rolled back in the
//!   store with conditional writes; an expired cursor triggers a full re-read.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hotswap_flags::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> hotswap_flags::error::Result<()> {
//! let flags = FlagSet::new();
//! let ratio = flags
//!     .dyn_float64("sample_ratio", 12.0, "sampling ratio")?
//!     .with_validator(in_range(10.0, 14.0));
//! let timeout = flags.dyn_duration("rpc_timeout", Duration::from_secs(1), "RPC deadline")?;
//!
//! // Any `WatchSource` works here: etcd, a mounted directory, or the
//! // in-process store used below.
//! let store = MemoryStore::new();
//! store.set("/flagz/my_service/sample_ratio", "13.5")?;
//! let source = MemorySource::new(store.clone(), "/flagz/my_service");
//!
//! let updater = Updater::new(flags.clone(), source);
//! updater.initialize().await?;
//! updater.start()?;
//!
//! // Reads are plain atomic loads.
//! println!("ratio={} timeout={:?}", ratio.value(), timeout.value());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `file-watch` (default): [`DirectorySource`](sources::DirectorySource) for
//!   mounted directories such as Kubernetes ConfigMaps.
//! - `etcd`: [`EtcdSource`](sources::EtcdSource) over the etcd v2 keys API.
//! - `metrics`: OpenTelemetry counters for the updater.

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod notify;
pub mod registry;
pub mod sources;
pub mod updater;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{
        DynDuration, DynFloat64, DynInt64, DynJson, DynString, DynStringSet, DynStringSlice,
        DynamicFlag, FlagValue, Json, Validator, in_range, matches_regex, min_elements,
    };
    pub use crate::error::{FlagError, Result, ValidationError};
    pub use crate::registry::{FlagKind, FlagSet, StatusFilter};
    pub use crate::sources::{MemorySource, MemoryStore, WatchCursor, WatchError, WatchSource};
    pub use crate::updater::{Updater, UpdaterConfig};

    #[cfg(feature = "file-watch")]
    pub use crate::sources::DirectorySource;

    #[cfg(feature = "etcd")]
    pub use crate::sources::EtcdSource;

    #[cfg(feature = "metrics")]
    pub use crate::metrics::UpdaterMetrics;
}
