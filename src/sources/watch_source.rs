//! The contract between the updater and a watched store.

use async_trait::async_trait;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Store-defined resume point for incremental watching.
///
/// Cursors are totally ordered and only ever move forward: watching resumes
/// with the first change strictly after the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchCursor(pub u64);

impl WatchCursor {
    /// The cursor before any observation.
    pub const ZERO: WatchCursor = WatchCursor(0);

    /// Raw index value.
    pub fn index(self) -> u64 {
        self.0
    }

    /// Return whichever of the two cursors is further along.
    pub fn advance(self, other: WatchCursor) -> WatchCursor {
        self.max(other)
    }
}

impl fmt::Display for WatchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One key returned by a bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Full key path as reported by the store
    pub key: String,
    /// Current value; empty for directories
    pub value: String,
    /// Whether the key is a directory rather than a leaf
    pub is_dir: bool,
}

impl SnapshotEntry {
    /// A leaf entry.
    pub fn leaf(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_dir: false,
        }
    }

    /// A directory entry.
    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            is_dir: true,
        }
    }
}

/// Full view of the watched root paired with the cursor it is valid at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Watching from this cursor observes every change after the snapshot
    pub cursor: WatchCursor,
    /// Immediate children of the root, in key order
    pub entries: Vec<SnapshotEntry>,
}

/// What a change did to its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeValue {
    /// The key now holds this value
    Value(String),
    /// The key was removed or expired
    Deleted,
    /// The key is a directory
    Directory,
}

/// A single change reported by [`WatchSource::watch_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedChange {
    /// Full key path
    pub key: String,
    /// The new state of the key
    pub value: ChangeValue,
    /// The value the key held before this change, when the store knows it
    pub previous: Option<String>,
    /// Position of this change; also the key's modification index
    pub cursor: WatchCursor,
}

/// Errors reported by a [`WatchSource`].
///
/// The updater classifies these to decide between resyncing, retrying after a
/// backoff, and giving up on a rollback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The cursor has fallen out of the store's retention window, or the
    /// store's contents were replaced wholesale. Re-read everything.
    #[error("resync required: {0}")]
    ResyncRequired(String),

    /// The store dropped the watch or is temporarily unavailable.
    #[error("transient source error: {0}")]
    Transient(String),

    /// No change arrived before the per-call deadline.
    #[error("watch deadline exceeded")]
    DeadlineExceeded,

    /// The call was cancelled.
    #[error("watch cancelled")]
    Cancelled,

    /// A compare-and-swap or compare-and-delete precondition did not hold.
    #[error("precondition failed")]
    PreconditionFailed,

    /// The source does not support this operation.
    #[error("operation not supported by this source")]
    Unsupported,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl WatchError {
    /// Whether retrying the same watch later can succeed without a resync.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::DeadlineExceeded | Self::Backend(_)
        )
    }
}

/// A keyed store that can be read in bulk and watched incrementally.
///
/// Keys are full paths; the flag name is the final `/`-separated segment.
/// Implementations must report changes in cursor order and must not report a
/// change at or before the `after` cursor.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    /// Read every immediate child of the watched root.
    async fn bulk_read(&self) -> Result<Snapshot, WatchError>;

    /// Wait for the first change strictly after `after`.
    ///
    /// Returns [`WatchError::Cancelled`] promptly once `cancel` fires and
    /// [`WatchError::DeadlineExceeded`] if the source's own deadline elapses
    /// first.
    async fn watch_next(
        &self,
        after: WatchCursor,
        cancel: &CancellationToken,
    ) -> Result<ObservedChange, WatchError>;

    /// Write `value` to `key` only if the key was last modified at `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        expected: WatchCursor,
    ) -> Result<WatchCursor, WatchError> {
        let _ = (key, value, expected);
        Err(WatchError::Unsupported)
    }

    /// Delete `key` only if it was last modified at `expected`.
    async fn compare_and_delete(
        &self,
        key: &str,
        expected: WatchCursor,
    ) -> Result<WatchCursor, WatchError> {
        let _ = (key, expected);
        Err(WatchError::Unsupported)
    }

    /// Human-readable name for logs.
    fn name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_never_regresses() {
        let cursor = WatchCursor(10);
        assert_eq!(cursor.advance(WatchCursor(4)), WatchCursor(10));
        assert_eq!(cursor.advance(WatchCursor(12)), WatchCursor(12));
        assert_eq!(WatchCursor::ZERO.to_string(), "0");
    }

    #[test]
    fn test_error_classification() {
        assert!(WatchError::Transient("watcher cleared".into()).is_retryable());
        assert!(WatchError::DeadlineExceeded.is_retryable());
        assert!(!WatchError::ResyncRequired("index cleared".into()).is_retryable());
        assert!(!WatchError::Cancelled.is_retryable());
        assert!(!WatchError::PreconditionFailed.is_retryable());
    }
}
