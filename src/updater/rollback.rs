//! Compensating writes for rejected remote values.

use crate::sources::{ObservedChange, WatchError, WatchSource};
use crate::error::FlagError;
use tracing::{info, warn};

/// How a rollback attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The previous value was written back.
    Restored,
    /// The key did not exist before the rejected write and was deleted.
    Removed,
    /// Someone changed the key after the rejected write; nothing was done.
    Superseded,
    /// The source cannot do conditional writes.
    Unsupported,
    /// The source failed; the bad value stays in the store.
    Failed,
}

impl RollbackOutcome {
    /// Stable lowercase label, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restored => "restored",
            Self::Removed => "removed",
            Self::Superseded => "superseded",
            Self::Unsupported => "unsupported",
            Self::Failed => "failed",
        }
    }
}

/// Undo `change` in the source after the local flag rejected it.
///
/// The write is conditional on the key still being at the rejected change's
/// own modification index, so a newer external write is never overwritten.
pub(crate) async fn roll_back<S: WatchSource + ?Sized>(
    source: &S,
    flag: &str,
    change: &ObservedChange,
    reason: &FlagError,
) -> RollbackOutcome {
    let result = match &change.previous {
        Some(previous) => source
            .compare_and_swap(&change.key, previous, change.cursor)
            .await
            .map(|_| RollbackOutcome::Restored),
        None => source
            .compare_and_delete(&change.key, change.cursor)
            .await
            .map(|_| RollbackOutcome::Removed),
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(WatchError::PreconditionFailed) => RollbackOutcome::Superseded,
        Err(WatchError::Unsupported) => RollbackOutcome::Unsupported,
        Err(e) => {
            warn!(flag = %flag, key = %change.key, error = %e, "rolling back flag failed");
            return RollbackOutcome::Failed;
        }
    };

    match outcome {
        RollbackOutcome::Restored => info!(
            flag = %flag,
            reason = %reason,
            "rolled back flag to its previous value"
        ),
        RollbackOutcome::Removed => info!(
            flag = %flag,
            reason = %reason,
            "deleted invalid flag value that had no predecessor"
        ),
        RollbackOutcome::Superseded => info!(
            flag = %flag,
            "flag was changed by someone else before rollback, leaving it"
        ),
        RollbackOutcome::Unsupported => warn!(
            flag = %flag,
            source = %source.name(),
            "source does not support rollback, invalid value stays in place"
        ),
        RollbackOutcome::Failed => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ChangeValue, MemorySource, MemoryStore, WatchCursor};

    fn rejected() -> FlagError {
        FlagError::NotFound("irrelevant".to_string())
    }

    fn change_at(store: &MemoryStore, key: &str) -> ObservedChange {
        let snapshot = store.snapshot("/flagz");
        let entry = snapshot.entries.iter().find(|e| e.key == key).unwrap();
        ObservedChange {
            key: key.to_string(),
            value: ChangeValue::Value(entry.value.clone()),
            previous: None,
            cursor: WatchCursor(store.modified_index(key).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_restores_previous_value() {
        let store = MemoryStore::new();
        store.set("/flagz/some_int", "2015").unwrap();
        store.set("/flagz/some_int", "randombleh").unwrap();
        let source = MemorySource::new(store.clone(), "/flagz");

        let mut change = change_at(&store, "/flagz/some_int");
        change.previous = Some("2015".to_string());
        let outcome = roll_back(&source, "some_int", &change, &rejected()).await;
        assert_eq!(outcome, RollbackOutcome::Restored);
        assert_eq!(store.get("/flagz/some_int").as_deref(), Some("2015"));
    }

    #[tokio::test]
    async fn test_deletes_created_value() {
        let store = MemoryStore::new();
        store.set("/flagz/some_int", "randombleh").unwrap();
        let source = MemorySource::new(store.clone(), "/flagz");

        let change = change_at(&store, "/flagz/some_int");
        let outcome = roll_back(&source, "some_int", &change, &rejected()).await;
        assert_eq!(outcome, RollbackOutcome::Removed);
        assert_eq!(store.get("/flagz/some_int"), None);
    }

    #[tokio::test]
    async fn test_newer_write_wins() {
        let store = MemoryStore::new();
        store.set("/flagz/some_int", "2015").unwrap();
        store.set("/flagz/some_int", "randombleh").unwrap();
        let source = MemorySource::new(store.clone(), "/flagz");
        let mut change = change_at(&store, "/flagz/some_int");
        change.previous = Some("2015".to_string());

        store.set("/flagz/some_int", "2017").unwrap();
        let outcome = roll_back(&source, "some_int", &change, &rejected()).await;
        assert_eq!(outcome, RollbackOutcome::Superseded);
        assert_eq!(store.get("/flagz/some_int").as_deref(), Some("2017"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(RollbackOutcome::Restored.as_str(), "restored");
        assert_eq!(RollbackOutcome::Failed.as_str(), "failed");
    }
}
