//! Filesystem event stream for a mounted flag directory.

use crate::sources::WatchError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watches a directory and its parent, forwarding raw events over a channel.
///
/// The parent is watched as well because mounted directories (Kubernetes
/// ConfigMaps in particular) are often symlinks that get swapped wholesale.
/// Events are not debounced: every write must reach the consumer.
///
/// The watch stops when the `DirectoryWatcher` is dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_flags::notify::DirectoryWatcher;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (watcher, mut events) = DirectoryWatcher::new("/etc/flagz")?;
/// while let Some(event) = events.recv().await {
///     println!("{:?} {:?}", event.kind, event.paths);
/// }
/// # drop(watcher);
/// # Ok(())
/// # }
/// ```
pub struct DirectoryWatcher {
    watcher: Mutex<RecommendedWatcher>,
    watched_paths: Mutex<Vec<PathBuf>>,
}

impl DirectoryWatcher {
    /// Start watching `dir` (and its parent, when it has one).
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Backend`] if the watcher cannot be created or
    /// `dir` itself cannot be watched. Failing to watch the parent is logged
    /// and tolerated.
    pub fn new(
        dir: impl AsRef<Path>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Event>), WatchError> {
        let dir = dir.as_ref().to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel::<Event>();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event.kind) {
                    let _ = tx.send(event);
                }
            }
            Err(e) => warn!(error = %e, "filesystem watch error"),
        })
        .map_err(|e| WatchError::Backend(format!("failed to create file watcher: {}", e)))?;

        let this = Self {
            watcher: Mutex::new(watcher),
            watched_paths: Mutex::new(Vec::new()),
        };

        if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = this.watch(parent) {
                warn!(path = %parent.display(), error = %e, "cannot watch parent directory");
            }
        }
        this.watch(&dir)?;

        Ok((this, rx))
    }

    /// Add another path to the watch set.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Backend`] if the path cannot be watched.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref().to_path_buf();
        self.watcher
            .lock()
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                WatchError::Backend(format!("failed to watch {}: {}", path.display(), e))
            })?;
        debug!(path = %path.display(), "watching path");

        let mut paths = self.watched_paths.lock();
        if !paths.contains(&path) {
            paths.push(path);
        }
        Ok(())
    }

    /// Paths currently being watched.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watched_paths.lock().clone()
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("watched_paths", &*self.watched_paths.lock())
            .finish()
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_watches_dir_and_parent() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("flagz");
        fs::create_dir(&dir).unwrap();

        let (watcher, _rx) = DirectoryWatcher::new(&dir).unwrap();
        let paths = watcher.watched_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&dir));
    }

    #[tokio::test]
    async fn test_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let result = DirectoryWatcher::new(temp_dir.path().join("missing"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_produces_event() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let (_watcher, mut rx) = DirectoryWatcher::new(&dir).unwrap();

        let target = dir.join("some_int");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            fs::write(&target, "2016").unwrap();
        });

        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(event.is_some());
    }
}
