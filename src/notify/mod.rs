//! Change notification plumbing.
//!
//! [`Notifier`] delivers accepted value transitions to user callbacks. With the
//! `file-watch` feature, [`DirectoryWatcher`] turns filesystem events into a
//! stream consumed by the directory backend.

pub mod notifier;

#[cfg(feature = "file-watch")]
pub mod watcher;

pub use notifier::Notifier;
pub(crate) use notifier::{BoxedNotifier, dispatch};

#[cfg(feature = "file-watch")]
pub use watcher::DirectoryWatcher;
