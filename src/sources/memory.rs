//! In-process indexed key-value store.
//!
//! [`MemoryStore`] behaves like a small etcd v2 keyspace: every mutation bumps a
//! global index, each key remembers the index it was last modified at, a bounded
//! event history backs resumable watches, and writes can be made conditional on
//! a key's modification index. [`MemorySource`] exposes one subtree of a store
//! as a [`WatchSource`].

use crate::sources::{
    ChangeValue, ObservedChange, Snapshot, SnapshotEntry, WatchCursor, WatchError, WatchSource,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Number of events kept for resuming watches, matching etcd v2.
pub const DEFAULT_RETENTION: usize = 1000;

/// A shared, in-process key-value store with indexed history.
///
/// Clones share the same keyspace.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::sources::MemoryStore;
///
/// let store = MemoryStore::new();
/// let first = store.set("/flagz/some_int", "2015").unwrap();
/// let second = store.set("/flagz/some_int", "2016").unwrap();
/// assert!(second > first);
/// assert_eq!(store.get("/flagz/some_int").as_deref(), Some("2016"));
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    index_tx: watch::Sender<u64>,
}

struct StoreState {
    index: u64,
    nodes: BTreeMap<String, Node>,
    history: VecDeque<Event>,
    retention: usize,
    /// Events at or below this index are no longer available.
    horizon: u64,
    faults: VecDeque<WatchError>,
}

struct Node {
    /// `None` for directories.
    value: Option<String>,
    modified: u64,
}

#[derive(Clone)]
struct Event {
    index: u64,
    key: String,
    value: ChangeValue,
    previous: Option<String>,
}

impl MemoryStore {
    /// Create an empty store keeping [`DEFAULT_RETENTION`] events.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create an empty store keeping at most `retention` events of history.
    pub fn with_retention(retention: usize) -> Self {
        let (index_tx, _) = watch::channel(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                value: None,
                modified: 0,
            },
        );
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    index: 0,
                    nodes,
                    history: VecDeque::new(),
                    retention: retention.max(1),
                    horizon: 0,
                    faults: VecDeque::new(),
                }),
                index_tx,
            }),
        }
    }

    /// The index of the most recent mutation.
    pub fn index(&self) -> u64 {
        self.inner.state.lock().index
    }

    /// Current value of a leaf key.
    pub fn get(&self, key: &str) -> Option<String> {
        let key = normalize(key);
        self.inner
            .state
            .lock()
            .nodes
            .get(&key)
            .and_then(|node| node.value.clone())
    }

    /// Index at which `key` was last modified.
    pub fn modified_index(&self, key: &str) -> Option<u64> {
        let key = normalize(key);
        self.inner.state.lock().nodes.get(&key).map(|n| n.modified)
    }

    /// Write a leaf value, creating missing parent directories.
    ///
    /// # Errors
    ///
    /// Fails if `key` is a directory or one of its parents is a leaf.
    pub fn set(&self, key: &str, value: &str) -> Result<u64, WatchError> {
        let key = normalize(key);
        let index = {
            let mut state = self.inner.state.lock();
            state.put(&key, value, None)?
        };
        self.publish(index);
        Ok(index)
    }

    /// Create a directory, creating missing parents.
    ///
    /// # Errors
    ///
    /// Fails if `key` already exists or one of its parents is a leaf.
    pub fn mkdir(&self, key: &str) -> Result<u64, WatchError> {
        let key = normalize(key);
        let index = {
            let mut state = self.inner.state.lock();
            if state.nodes.contains_key(&key) {
                return Err(WatchError::Backend(format!("key already exists: {}", key)));
            }
            state.ensure_parents(&key)?;
            let index = state.next_index();
            state.nodes.insert(
                key.clone(),
                Node {
                    value: None,
                    modified: index,
                },
            );
            state.record(Event {
                index,
                key,
                value: ChangeValue::Directory,
                previous: None,
            });
            index
        };
        self.publish(index);
        Ok(index)
    }

    /// Delete a leaf key.
    ///
    /// # Errors
    ///
    /// Fails if `key` does not exist or is a directory.
    pub fn delete(&self, key: &str) -> Result<u64, WatchError> {
        let key = normalize(key);
        let index = {
            let mut state = self.inner.state.lock();
            state.remove(&key, None)?
        };
        self.publish(index);
        Ok(index)
    }

    /// Write `value` only if `key` was last modified at `prev_index`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PreconditionFailed`] if the key is missing or was
    /// modified since.
    pub fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        prev_index: u64,
    ) -> Result<u64, WatchError> {
        let key = normalize(key);
        let index = {
            let mut state = self.inner.state.lock();
            state.put(&key, value, Some(prev_index))?
        };
        self.publish(index);
        Ok(index)
    }

    /// Delete `key` only if it was last modified at `prev_index`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PreconditionFailed`] if the key is missing or was
    /// modified since.
    pub fn compare_and_delete(&self, key: &str, prev_index: u64) -> Result<u64, WatchError> {
        let key = normalize(key);
        let index = {
            let mut state = self.inner.state.lock();
            state.remove(&key, Some(prev_index))?
        };
        self.publish(index);
        Ok(index)
    }

    /// Drop all retained history. Watches resuming from an earlier index will
    /// be told to resync.
    pub fn compact(&self) {
        let mut state = self.inner.state.lock();
        state.horizon = state.index;
        state.history.clear();
        debug!(horizon = state.horizon, "compacted memory store history");
    }

    /// Make the next watch call fail with `error`. Faults queue up in order.
    pub fn fail_next_watch(&self, error: WatchError) {
        self.inner.state.lock().faults.push_back(error);
        // Wake waiters so a pending watch observes the fault.
        let index = self.index();
        self.publish(index);
    }

    /// Immediate children of `prefix` together with the current index.
    pub fn snapshot(&self, prefix: &str) -> Snapshot {
        let prefix = normalize(prefix);
        let state = self.inner.state.lock();
        let is_dir = matches!(state.nodes.get(&prefix), Some(node) if node.value.is_none());
        let entries = if is_dir {
            state
                .nodes
                .iter()
                .filter(|(key, _)| key.as_str() != "/" && parent(key) == prefix)
                .map(|(key, node)| match &node.value {
                    Some(value) => SnapshotEntry::leaf(key.clone(), value.clone()),
                    None => SnapshotEntry::dir(key.clone()),
                })
                .collect()
        } else {
            Vec::new()
        };
        Snapshot {
            cursor: WatchCursor(state.index),
            entries,
        }
    }

    /// Wait for the first change under `prefix` with an index greater than
    /// `after`.
    ///
    /// # Errors
    ///
    /// [`WatchError::ResyncRequired`] if `after` predates the retained history,
    /// [`WatchError::DeadlineExceeded`] when `timeout` elapses,
    /// [`WatchError::Cancelled`] when `cancel` fires, or any injected fault.
    pub async fn wait(
        &self,
        prefix: &str,
        after: u64,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ObservedChange, WatchError> {
        let prefix = normalize(prefix);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut rx = self.inner.index_tx.subscribe();

        loop {
            let found = self.inner.state.lock().next_event(&prefix, after);
            if let Some(found) = found {
                return found;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                _ = sleep_until(deadline) => return Err(WatchError::DeadlineExceeded),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(WatchError::Backend("store dropped".to_string()));
                    }
                }
            }
        }
    }

    fn publish(&self, index: u64) {
        self.inner.index_tx.send_replace(index);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MemoryStore")
            .field("index", &state.index)
            .field("keys", &state.nodes.len())
            .field("history", &state.history.len())
            .finish()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl StoreState {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn record(&mut self, event: Event) {
        self.history.push_back(event);
        while self.history.len() > self.retention {
            if let Some(dropped) = self.history.pop_front() {
                self.horizon = dropped.index;
            }
        }
    }

    fn ensure_parents(&mut self, key: &str) -> Result<(), WatchError> {
        let mut ancestors = Vec::new();
        let mut current = parent(key);
        while current != "/" {
            ancestors.push(current.clone());
            current = parent(&current);
        }
        for dir in ancestors.into_iter().rev() {
            match self.nodes.get(&dir) {
                Some(node) if node.value.is_some() => {
                    return Err(WatchError::Backend(format!("not a directory: {}", dir)));
                }
                Some(_) => {}
                None => {
                    let modified = self.index;
                    self.nodes.insert(
                        dir,
                        Node {
                            value: None,
                            modified,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn put(&mut self, key: &str, value: &str, prev_index: Option<u64>) -> Result<u64, WatchError> {
        if key == "/" {
            return Err(WatchError::Backend("root is read only".to_string()));
        }
        let previous = match (self.nodes.get(key), prev_index) {
            (Some(node), _) if node.value.is_none() => {
                return Err(WatchError::Backend(format!("not a file: {}", key)));
            }
            (Some(node), Some(expected)) if node.modified != expected => {
                return Err(WatchError::PreconditionFailed);
            }
            (None, Some(_)) => return Err(WatchError::PreconditionFailed),
            (Some(node), _) => node.value.clone(),
            (None, None) => None,
        };
        self.ensure_parents(key)?;
        let index = self.next_index();
        self.nodes.insert(
            key.to_string(),
            Node {
                value: Some(value.to_string()),
                modified: index,
            },
        );
        self.record(Event {
            index,
            key: key.to_string(),
            value: ChangeValue::Value(value.to_string()),
            previous,
        });
        Ok(index)
    }

    fn remove(&mut self, key: &str, prev_index: Option<u64>) -> Result<u64, WatchError> {
        let previous = match (self.nodes.get(key), prev_index) {
            (None, Some(_)) => return Err(WatchError::PreconditionFailed),
            (None, None) => {
                return Err(WatchError::Backend(format!("key not found: {}", key)));
            }
            (Some(node), _) if node.value.is_none() => {
                return Err(WatchError::Backend(format!("not a file: {}", key)));
            }
            (Some(node), Some(expected)) if node.modified != expected => {
                return Err(WatchError::PreconditionFailed);
            }
            (Some(node), _) => node.value.clone(),
        };
        self.nodes.remove(key);
        let index = self.next_index();
        self.record(Event {
            index,
            key: key.to_string(),
            value: ChangeValue::Deleted,
            previous,
        });
        Ok(index)
    }

    fn next_event(&mut self, prefix: &str, after: u64) -> Option<Result<ObservedChange, WatchError>> {
        if let Some(fault) = self.faults.pop_front() {
            return Some(Err(fault));
        }
        if after < self.horizon {
            return Some(Err(WatchError::ResyncRequired(format!(
                "the requested history has been cleared [{}/{}]",
                self.horizon + 1,
                after + 1
            ))));
        }
        self.history
            .iter()
            .find(|event| event.index > after && is_under(&event.key, prefix))
            .map(|event| {
                Ok(ObservedChange {
                    key: event.key.clone(),
                    value: event.value.clone(),
                    previous: event.previous.clone(),
                    cursor: WatchCursor(event.index),
                })
            })
    }
}

/// Canonical form: leading `/`, no trailing or repeated separators.
fn normalize(key: &str) -> String {
    let joined = key
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{}", joined)
}

fn parent(key: &str) -> String {
    match key.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => key[..pos].to_string(),
    }
}

fn is_under(key: &str, prefix: &str) -> bool {
    prefix == "/"
        || key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// A [`MemoryStore`] subtree exposed as a [`WatchSource`].
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::sources::{MemorySource, MemoryStore};
/// use std::time::Duration;
///
/// let store = MemoryStore::new();
/// let source = MemorySource::new(store.clone(), "/flagz")
///     .with_watch_timeout(Duration::from_secs(30));
/// assert_eq!(source.root(), "/flagz");
/// ```
#[derive(Debug, Clone)]
pub struct MemorySource {
    store: MemoryStore,
    root: String,
    watch_timeout: Option<Duration>,
}

impl MemorySource {
    /// Watch the subtree of `store` rooted at `root`.
    pub fn new(store: MemoryStore, root: impl AsRef<str>) -> Self {
        Self {
            store,
            root: normalize(root.as_ref()),
            watch_timeout: None,
        }
    }

    /// Bound each watch call; the updater simply re-issues the watch.
    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = Some(timeout);
        self
    }

    /// The watched root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The backing store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl WatchSource for MemorySource {
    async fn bulk_read(&self) -> Result<Snapshot, WatchError> {
        Ok(self.store.snapshot(&self.root))
    }

    async fn watch_next(
        &self,
        after: WatchCursor,
        cancel: &CancellationToken,
    ) -> Result<ObservedChange, WatchError> {
        self.store
            .wait(&self.root, after.index(), self.watch_timeout, cancel)
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        expected: WatchCursor,
    ) -> Result<WatchCursor, WatchError> {
        self.store
            .compare_and_swap(key, value, expected.index())
            .map(WatchCursor)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: WatchCursor,
    ) -> Result<WatchCursor, WatchError> {
        self.store
            .compare_and_delete(key, expected.index())
            .map(WatchCursor)
    }

    fn name(&self) -> String {
        format!("memory:{}", self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_and_parent() {
        assert_eq!(normalize("flagz//a/"), "/flagz/a");
        assert_eq!(normalize(""), "/");
        assert_eq!(parent("/flagz/a"), "/flagz");
        assert_eq!(parent("/flagz"), "/");
        assert!(is_under("/flagz/a", "/flagz"));
        assert!(!is_under("/flagzz/a", "/flagz"));
    }

    #[test]
    fn test_snapshot_lists_children() {
        let store = MemoryStore::new();
        store.set("/flagz/a", "1").unwrap();
        store.set("/flagz/b", "2").unwrap();
        store.set("/flagz/sub/c", "3").unwrap();
        store.set("/other/d", "4").unwrap();

        let snap = store.snapshot("/flagz");
        assert_eq!(snap.cursor, WatchCursor(store.index()));
        assert_eq!(
            snap.entries,
            vec![
                SnapshotEntry::leaf("/flagz/a", "1"),
                SnapshotEntry::leaf("/flagz/b", "2"),
                SnapshotEntry::dir("/flagz/sub"),
            ]
        );
        assert!(store.snapshot("/missing").entries.is_empty());
    }

    #[test]
    fn test_leaf_parent_rejected() {
        let store = MemoryStore::new();
        store.set("/flagz/a", "1").unwrap();
        assert!(matches!(
            store.set("/flagz/a/b", "1"),
            Err(WatchError::Backend(_))
        ));
        assert!(store.set("/flagz", "x").is_err());
    }

    #[test]
    fn test_compare_and_swap() {
        let store = MemoryStore::new();
        let first = store.set("/flagz/a", "1").unwrap();
        let second = store.set("/flagz/a", "2").unwrap();

        assert_eq!(
            store.compare_and_swap("/flagz/a", "x", first),
            Err(WatchError::PreconditionFailed)
        );
        store.compare_and_swap("/flagz/a", "1", second).unwrap();
        assert_eq!(store.get("/flagz/a").as_deref(), Some("1"));
        assert_eq!(
            store.compare_and_swap("/flagz/missing", "1", second),
            Err(WatchError::PreconditionFailed)
        );
    }

    #[test]
    fn test_compare_and_delete() {
        let store = MemoryStore::new();
        let created = store.set("/flagz/a", "1").unwrap();
        assert_eq!(
            store.compare_and_delete("/flagz/a", created + 5),
            Err(WatchError::PreconditionFailed)
        );
        store.compare_and_delete("/flagz/a", created).unwrap();
        assert_eq!(store.get("/flagz/a"), None);
    }

    #[tokio::test]
    async fn test_wait_returns_history_in_order() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let start = store.index();
        let first = store.set("/flagz/a", "1").unwrap();
        store.set("/elsewhere/x", "1").unwrap();
        let third = store.set("/flagz/a", "2").unwrap();

        let change = store.wait("/flagz", start, None, &cancel).await.unwrap();
        assert_eq!(change.cursor, WatchCursor(first));
        assert_eq!(change.previous, None);

        let change = store.wait("/flagz", first, None, &cancel).await.unwrap();
        assert_eq!(change.cursor, WatchCursor(third));
        assert_eq!(change.value, ChangeValue::Value("2".to_string()));
        assert_eq!(change.previous.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_write() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set("/flagz/a", "late").unwrap();
        });
        let change = store
            .wait("/flagz", 0, Some(Duration::from_secs(5)), &cancel)
            .await
            .unwrap();
        assert_eq!(change.key, "/flagz/a");
    }

    #[tokio::test]
    async fn test_wait_deadline_and_cancel() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let err = store
            .wait("/flagz", 0, Some(Duration::from_millis(10)), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, WatchError::DeadlineExceeded);

        cancel.cancel();
        let err = store.wait("/flagz", 0, None, &cancel).await.unwrap_err();
        assert_eq!(err, WatchError::Cancelled);
    }

    #[tokio::test]
    async fn test_retention_and_compaction_force_resync() {
        let store = MemoryStore::with_retention(2);
        let cancel = CancellationToken::new();
        for i in 0..5 {
            store.set("/flagz/a", &i.to_string()).unwrap();
        }
        let err = store.wait("/flagz", 0, None, &cancel).await.unwrap_err();
        assert!(matches!(err, WatchError::ResyncRequired(_)));

        let recent = store.wait("/flagz", 3, None, &cancel).await.unwrap();
        assert_eq!(recent.cursor, WatchCursor(4));

        store.compact();
        let err = store.wait("/flagz", 3, None, &cancel).await.unwrap_err();
        assert!(matches!(err, WatchError::ResyncRequired(_)));
    }

    #[tokio::test]
    async fn test_injected_fault_is_consumed_once() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        store.set("/flagz/a", "1").unwrap();
        store.fail_next_watch(WatchError::Transient("watcher cleared".to_string()));
        let err = store.wait("/flagz", 0, None, &cancel).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.wait("/flagz", 0, None, &cancel).await.is_ok());
    }
}
