//! Mounted-directory backend.
//!
//! Each regular file in the directory holds one flag: the file name is the flag
//! name and the file content is its value. Entries whose names begin with `..`
//! are mount internals (Kubernetes ConfigMap `..data` and timestamped
//! directories) and are never treated as flags.

use crate::notify::DirectoryWatcher;
use crate::sources::{
    ChangeValue, ObservedChange, Snapshot, SnapshotEntry, WatchCursor, WatchError, WatchSource,
};
use async_trait::async_trait;
use notify::event::{EventKind, ModifyKind};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INTERNALS_PREFIX: &str = "..";
const DATA_SYMLINK: &str = "..data";

/// A directory of flag files exposed as a [`WatchSource`].
///
/// The cursor is a local generation counter, so conditional writes and
/// therefore rollback are not supported: a rejected file simply stays on disk
/// while the flag keeps its previous value.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_flags::registry::FlagSet;
/// use hotswap_flags::sources::DirectorySource;
/// use hotswap_flags::updater::Updater;
///
/// # async fn example() -> hotswap_flags::error::Result<()> {
/// let flags = FlagSet::new();
/// let source = DirectorySource::new("/etc/flagz")?;
/// let updater = Updater::builder(source).with_flags(flags).build();
/// updater.initialize().await?;
/// updater.start()?;
/// # Ok(())
/// # }
/// ```
pub struct DirectorySource {
    root: PathBuf,
    canonical: Option<PathBuf>,
    generation: AtomicU64,
    stream: Mutex<Option<EventStream>>,
}

struct EventStream {
    watcher: DirectoryWatcher,
    events: mpsc::UnboundedReceiver<notify::Event>,
    pending: VecDeque<ObservedChange>,
}

impl DirectorySource {
    /// Serve flags from `dir`. Relative paths are resolved against the current
    /// directory; symlinks are kept so a swapped mount is still followed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the current directory cannot be determined.
    pub fn new(dir: impl AsRef<Path>) -> crate::error::Result<Self> {
        let root = std::path::absolute(dir.as_ref())?;
        let canonical = root.canonicalize().ok().filter(|c| c != &root);
        Ok(Self {
            root,
            canonical,
            generation: AtomicU64::new(0),
            stream: Mutex::new(None),
        })
    }

    /// The watched directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.root.to_string_lossy().trim_end_matches('/'),
            name
        )
    }

    fn bump(&self) -> WatchCursor {
        WatchCursor(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn is_root(&self, path: &Path) -> bool {
        path == self.root || self.canonical.as_deref() == Some(path)
    }

    /// File name of `path` if it sits directly inside the watched directory.
    fn child_name<'a>(&self, path: &'a Path) -> Option<&'a str> {
        let parent = path.parent()?;
        if !self.is_root(parent) {
            return None;
        }
        path.file_name()?.to_str()
    }

    /// Re-register the root after a swap. A failure is logged and the stream
    /// keeps running on whatever it still watches.
    fn rewatch_root(&self, watcher: &DirectoryWatcher) -> bool {
        match watcher.watch(&self.root) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "cannot re-watch flag directory");
                false
            }
        }
    }

    /// Translate one filesystem event into zero or more changes.
    fn translate(&self, event: &notify::Event) -> Result<Vec<ObservedChange>, WatchError> {
        let mut changes = Vec::new();
        for path in &event.paths {
            let swapped = self.is_root(path) || self.child_name(path) == Some(DATA_SYMLINK);
            if swapped {
                if matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
                ) {
                    return Err(WatchError::ResyncRequired(format!(
                        "directory {} was replaced",
                        self.root.display()
                    )));
                }
                continue;
            }

            let Some(name) = self.child_name(path) else {
                continue;
            };
            if name.starts_with(INTERNALS_PREFIX) {
                continue;
            }

            match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => {
                    if path.is_dir() {
                        changes.push(ObservedChange {
                            key: self.key_for(name),
                            value: ChangeValue::Directory,
                            previous: None,
                            cursor: self.bump(),
                        });
                        continue;
                    }
                    // A rename source no longer exists; its target arrives as its own path.
                    let Ok(content) = fs::read_to_string(path) else {
                        continue;
                    };
                    changes.push(ObservedChange {
                        key: self.key_for(name),
                        value: ChangeValue::Value(content),
                        previous: None,
                        cursor: self.bump(),
                    });
                }
                EventKind::Remove(_) => changes.push(ObservedChange {
                    key: self.key_for(name),
                    value: ChangeValue::Deleted,
                    previous: None,
                    cursor: self.bump(),
                }),
                _ => {}
            }
        }
        Ok(changes)
    }
}

#[async_trait]
impl WatchSource for DirectorySource {
    async fn bulk_read(&self) -> Result<Snapshot, WatchError> {
        let read_err = |e: std::io::Error| {
            WatchError::Backend(format!("cannot read {}: {}", self.root.display(), e))
        };
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(INTERNALS_PREFIX) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                entries.push(SnapshotEntry::dir(self.key_for(&name)));
                continue;
            }
            let value = fs::read_to_string(&path).map_err(|e| {
                WatchError::Backend(format!("cannot read {}: {}", path.display(), e))
            })?;
            entries.push(SnapshotEntry::leaf(self.key_for(&name), value));
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Snapshot {
            cursor: WatchCursor(self.generation.load(Ordering::SeqCst)),
            entries,
        })
    }

    async fn watch_next(
        &self,
        _after: WatchCursor,
        cancel: &CancellationToken,
    ) -> Result<ObservedChange, WatchError> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let (watcher, events) = DirectoryWatcher::new(&self.root)?;
            info!(path = %self.root.display(), "watching flag directory");
            *guard = Some(EventStream {
                watcher,
                events,
                pending: VecDeque::new(),
            });
        }
        let Some(stream) = guard.as_mut() else {
            return Err(WatchError::Backend("event stream unavailable".to_string()));
        };

        loop {
            if let Some(change) = stream.pending.pop_front() {
                return Ok(change);
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                event = stream.events.recv() => event,
            };
            let Some(event) = event else {
                *guard = None;
                return Err(WatchError::Backend("directory watcher stopped".to_string()));
            };
            debug!(kind = ?event.kind, paths = ?event.paths, "directory event");

            match self.translate(&event) {
                Ok(changes) => stream.pending.extend(changes),
                Err(resync) => {
                    stream.pending.clear();
                    // The swapped-in directory is a new inode; watch it again.
                    self.rewatch_root(&stream.watcher);
                    return Err(resync);
                }
            }
        }
    }

    fn name(&self) -> String {
        format!("directory:{}", self.root.display())
    }
}

impl std::fmt::Debug for DirectorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorySource")
            .field("root", &self.root)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}
