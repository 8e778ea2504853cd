//! Lock-free holder for an immutable, atomically replaceable value.

use crate::core::Validator;
use crate::error::ValidationError;
use crate::notify::{BoxedNotifier, Notifier, dispatch};
use arc_swap::{ArcSwap, ArcSwapOption, Guard};
use std::fmt;
use std::sync::Arc;

type BoxedValidator<T> = Box<dyn Validator<T>>;

/// A value that many readers can load while a writer replaces it.
///
/// Values are never mutated in place: each successful [`store`](Self::store)
/// publishes a new `Arc<T>` with a single atomic swap, so readers observe
/// either the old or the new value and never a mix of the two.
///
/// An optional validator gates every store, and an optional notifier is told
/// about every accepted transition. Attach both before the value is shared;
/// re-attaching later is memory safe but may race with an in-flight store.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::core::{in_range, AtomicValue};
///
/// let value = AtomicValue::new(12.0);
/// value.set_validator(in_range(10.0, 14.0));
///
/// assert!(value.store(13.41).is_ok());
/// assert_eq!(*value.get(), 13.41);
///
/// assert!(value.store(14.001).is_err());
/// assert_eq!(*value.get(), 13.41);
/// ```
pub struct AtomicValue<T> {
    current: ArcSwap<T>,
    validator: ArcSwapOption<BoxedValidator<T>>,
    notifier: ArcSwapOption<BoxedNotifier<T>>,
}

impl<T> AtomicValue<T>
where
    T: Send + Sync + 'static,
{
    /// Create a holder publishing `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            validator: ArcSwapOption::empty(),
            notifier: ArcSwapOption::empty(),
        }
    }

    /// Get a reference-counted handle to the current value.
    ///
    /// Lock-free; never blocks on a concurrent store.
    pub fn get(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Borrow the current value without touching the reference count.
    ///
    /// Cheaper than [`get`](Self::get) for short reads; do not hold the guard
    /// for long.
    pub fn load(&self) -> Guard<Arc<T>> {
        self.current.load()
    }

    /// Attach a validator, replacing any previous one.
    pub fn set_validator<V>(&self, validator: V)
    where
        V: Validator<T> + 'static,
    {
        let boxed: BoxedValidator<T> = Box::new(validator);
        self.validator.store(Some(Arc::new(boxed)));
    }

    /// Attach a change notifier, replacing any previous one.
    pub fn set_notifier<N>(&self, notifier: N)
    where
        N: Notifier<T> + 'static,
    {
        let boxed: BoxedNotifier<T> = Box::new(notifier);
        self.notifier.store(Some(Arc::new(boxed)));
    }

    /// Run the attached validator, if any, against a candidate.
    ///
    /// # Errors
    ///
    /// Returns the validator's rejection.
    pub fn validate(&self, candidate: &T) -> Result<(), ValidationError> {
        match &*self.validator.load() {
            Some(validator) => validator.validate(candidate),
            None => Ok(()),
        }
    }

    /// Validate and publish a new value, returning the value it replaced.
    ///
    /// The previous value is captured by the same swap that publishes the new
    /// one. If a notifier is attached it is scheduled with `(old, new)` and
    /// this call returns without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns the validator's rejection; the published value is untouched.
    pub fn store(&self, candidate: T) -> Result<Arc<T>, ValidationError> {
        self.validate(&candidate)?;

        let new = Arc::new(candidate);
        let old = self.current.swap(Arc::clone(&new));

        if let Some(notifier) = self.notifier.load_full() {
            dispatch(notifier, Arc::clone(&old), new);
        }
        Ok(old)
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicValue")
            .field("current", &**self.current.load())
            .field("has_validator", &self.validator.load().is_some())
            .field("has_notifier", &self.notifier.load().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        left: u64,
        right: u64,
    }

    #[test]
    fn test_store_returns_previous() {
        let value = AtomicValue::new(1i64);
        let old = value.store(2).unwrap();
        assert_eq!(*old, 1);
        assert_eq!(*value.get(), 2);
        assert_eq!(**value.load(), 2);
    }

    #[test]
    fn test_validator_gate() {
        let value = AtomicValue::new(5i64);
        value.set_validator(|v: &i64| {
            if *v < 0 {
                Err(ValidationError::custom("negative"))
            } else {
                Ok(())
            }
        });
        assert!(value.store(-1).is_err());
        assert_eq!(*value.get(), 5);
        assert!(value.store(7).is_ok());
        assert_eq!(*value.get(), 7);
    }

    #[test]
    fn test_validator_replacement() {
        let value = AtomicValue::new(0i64);
        value.set_validator(|_: &i64| -> Result<(), ValidationError> {
            Err(ValidationError::custom("never"))
        });
        assert!(value.store(1).is_err());
        value.set_validator(|_: &i64| -> Result<(), ValidationError> { Ok(()) });
        assert!(value.store(1).is_ok());
    }

    #[test]
    fn test_notifier_sees_exact_transition() {
        let (tx, rx) = std::sync::mpsc::channel();
        let value = AtomicValue::new(10i64);
        value.set_notifier(move |old: Arc<i64>, new: Arc<i64>| {
            let _ = tx.send((*old, *new));
        });

        value.store(11).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), (10, 11));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_readers_never_see_torn_values() {
        let value = Arc::new(AtomicValue::new(Pair { left: 0, right: 0 }));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let value = Arc::clone(&value);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let pair = value.get();
                        assert_eq!(pair.left, pair.right);
                    }
                })
            })
            .collect();

        for i in 0..10_000u64 {
            value.store(Pair { left: i, right: i }).unwrap();
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
