//! Watched stores that feed flag updates.
//!
//! Every backend implements [`WatchSource`]: a bulk read of the watched root
//! plus an incremental, resumable watch. [`MemorySource`] is always available;
//! [`EtcdSource`] and [`DirectorySource`] sit behind the `etcd` and
//! `file-watch` features.

mod memory;
mod watch_source;

#[cfg(feature = "file-watch")]
mod directory;

#[cfg(feature = "etcd")]
mod etcd;

pub use memory::{DEFAULT_RETENTION, MemorySource, MemoryStore};
pub use watch_source::{
    ChangeValue, ObservedChange, Snapshot, SnapshotEntry, WatchCursor, WatchError, WatchSource,
};

#[cfg(feature = "file-watch")]
pub use directory::DirectorySource;

#[cfg(feature = "etcd")]
pub use etcd::{EtcdSource, EtcdSourceBuilder};
