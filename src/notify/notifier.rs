//! Change notifications for dynamic values.

use std::sync::Arc;
use tracing::warn;

/// Callback invoked with `(old, new)` after a value is replaced.
///
/// Notifiers run off the caller's thread: on the Tokio blocking pool when a
/// runtime is active, otherwise on a short-lived dedicated thread. A slow or
/// panicking notifier never affects the published value or the caller of `set`.
///
/// Any closure of the form `Fn(Arc<T>, Arc<T>)` is a notifier.
pub trait Notifier<T>: Send + Sync {
    /// Handle a transition from `old` to `new`.
    fn notify(&self, old: Arc<T>, new: Arc<T>);
}

impl<T, F> Notifier<T> for F
where
    F: Fn(Arc<T>, Arc<T>) + Send + Sync,
{
    fn notify(&self, old: Arc<T>, new: Arc<T>) {
        self(old, new)
    }
}

/// Notifier slot content; boxed so it can live in an `ArcSwapOption`.
pub(crate) type BoxedNotifier<T> = Box<dyn Notifier<T>>;

/// Schedule `notifier` with the given transition and return immediately.
pub(crate) fn dispatch<T>(notifier: Arc<BoxedNotifier<T>>, old: Arc<T>, new: Arc<T>)
where
    T: Send + Sync + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || notifier.notify(old, new));
        }
        Err(_) => {
            let spawned = std::thread::Builder::new()
                .name("flag-notifier".to_string())
                .spawn(move || notifier.notify(old, new));
            if let Err(e) = spawned {
                warn!(error = %e, "failed to spawn notifier thread, dropping notification");
            }
        }
    }
}
