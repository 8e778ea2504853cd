//! Named flags backed by an [`AtomicValue`].

use crate::core::{AtomicValue, FlagValue, Json, Validator};
use crate::error::Result;
use crate::notify::Notifier;
use arc_swap::Guard;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A named flag whose value can change while the process runs.
///
/// Handles are cheap to clone and all clones share one value. Reads are
/// lock-free. Writes parse the textual input, run the validator, publish the new
/// value atomically, and schedule the notifier.
///
/// Flags created through [`FlagSet`](crate::registry::FlagSet) should be
/// updated through [`FlagSet::set`](crate::registry::FlagSet::set), which also
/// records that the flag was explicitly set.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::core::{in_range, DynFloat64};
///
/// let ratio = DynFloat64::new("sample_ratio", 12.0).with_validator(in_range(10.0, 14.0));
///
/// ratio.set("13.41").unwrap();
/// assert_eq!(ratio.value(), 13.41);
///
/// assert!(ratio.set("14.001").is_err());
/// assert_eq!(ratio.value(), 13.41);
/// ```
pub struct DynamicFlag<T> {
    inner: Arc<FlagInner<T>>,
}

struct FlagInner<T> {
    name: String,
    dynamic: bool,
    value: AtomicValue<T>,
}

/// Dynamic `i64` flag.
pub type DynInt64 = DynamicFlag<i64>;
/// Dynamic `f64` flag.
pub type DynFloat64 = DynamicFlag<f64>;
/// Dynamic `String` flag.
pub type DynString = DynamicFlag<String>;
/// Dynamic ordered list of strings, set from one CSV record.
pub type DynStringSlice = DynamicFlag<Vec<String>>;
/// Dynamic set of strings, set from one CSV record.
pub type DynStringSet = DynamicFlag<BTreeSet<String>>;
/// Dynamic `Duration` flag, set from literals such as `1m30s`.
pub type DynDuration = DynamicFlag<Duration>;
/// Dynamic structured flag decoded from a JSON document.
pub type DynJson<T> = DynamicFlag<Json<T>>;

impl<T: FlagValue> DynamicFlag<T> {
    /// Create a standalone dynamic flag that is not bound to any registry.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self::with_mode(name, initial, true)
    }

    pub(crate) fn with_mode(name: impl Into<String>, initial: T, dynamic: bool) -> Self {
        Self {
            inner: Arc::new(FlagInner {
                name: name.into(),
                dynamic,
                value: AtomicValue::new(initial),
            }),
        }
    }

    /// The flag's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the flag carries the dynamic marker.
    pub fn is_dynamic(&self) -> bool {
        self.inner.dynamic
    }

    /// Get the current value. Never blocks.
    pub fn get(&self) -> Arc<T> {
        self.inner.value.get()
    }

    /// Borrow the current value without touching the reference count.
    pub fn load(&self) -> Guard<Arc<T>> {
        self.inner.value.load()
    }

    /// Parse `input` and publish it.
    ///
    /// # Errors
    ///
    /// Returns a parse error naming the offending text, or the validator's
    /// rejection. In both cases the published value is unchanged.
    pub fn set(&self, input: &str) -> Result<()> {
        let candidate = T::parse_flag(input)?;
        self.set_value(candidate)
    }

    /// Validate and publish an already-typed value.
    ///
    /// # Errors
    ///
    /// Returns the validator's rejection; the published value is unchanged.
    pub fn set_value(&self, candidate: T) -> Result<()> {
        self.inner.value.store(candidate)?;
        debug!(flag = %self.inner.name, "published new flag value");
        Ok(())
    }

    /// Attach a validator, replacing any previous one.
    ///
    /// Attach validators before the flag is shared; replacing one while a `set`
    /// is in flight is not supported.
    pub fn with_validator<V>(self, validator: V) -> Self
    where
        V: Validator<T> + 'static,
    {
        self.inner.value.set_validator(validator);
        self
    }

    /// Attach a change notifier, replacing any previous one.
    ///
    /// The notifier receives `(old, new)` after every accepted change and runs
    /// off the caller's thread.
    pub fn with_notifier<N>(self, notifier: N) -> Self
    where
        N: Notifier<T> + 'static,
    {
        self.inner.value.set_notifier(notifier);
        self
    }

    /// The current value in canonical textual form.
    pub fn value_string(&self) -> String {
        self.inner.value.load().format_flag()
    }
}

impl<T: FlagValue + Copy> DynamicFlag<T> {
    /// Copy out the current value.
    pub fn value(&self) -> T {
        **self.inner.value.load()
    }
}

impl<T> Clone for DynamicFlag<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: FlagValue + fmt::Debug> fmt::Debug for DynamicFlag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicFlag")
            .field("name", &self.inner.name)
            .field("dynamic", &self.inner.dynamic)
            .field("value", &self.inner.value)
            .finish()
    }
}
