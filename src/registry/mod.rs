//! Named flag registry.
//!
//! A [`FlagSet`] owns every flag a process defines. It is the only place that
//! records whether a flag was explicitly set, so the updater always goes
//! through [`FlagSet::set`] rather than touching a [`DynamicFlag`] directly.

mod checksum;
mod status;

pub use checksum::{checksum, checksum_hex};
pub use status::{FlagKind, FlagListing, FlagStatus, StatusFilter};

use crate::core::{
    DynDuration, DynFloat64, DynInt64, DynJson, DynString, DynStringSet, DynStringSlice,
    DynamicFlag, FlagValue, Json,
};
use crate::error::{FlagError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Type-erased view of a flag's value used by the registry.
pub trait FlagSlot: Send + Sync {
    /// Parse and publish a new value.
    fn set_from_str(&self, input: &str) -> Result<()>;

    /// Current value in canonical textual form.
    fn value_string(&self) -> String;

    /// Short type name, e.g. `"int64"`.
    fn type_name(&self) -> &'static str;
}

impl<T: FlagValue> FlagSlot for DynamicFlag<T> {
    fn set_from_str(&self, input: &str) -> Result<()> {
        self.set(input)
    }

    fn value_string(&self) -> String {
        DynamicFlag::value_string(self)
    }

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }
}

struct RegistryEntry {
    name: String,
    usage: String,
    default_value: String,
    dynamic: bool,
    changed: AtomicBool,
    slot: Box<dyn FlagSlot>,
}

/// Read-only handle to a registered flag.
#[derive(Clone)]
pub struct FlagHandle {
    entry: Arc<RegistryEntry>,
}

impl FlagHandle {
    /// The flag's name.
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Help text given at definition.
    pub fn usage(&self) -> &str {
        &self.entry.usage
    }

    /// Short type name.
    pub fn type_name(&self) -> &'static str {
        self.entry.slot.type_name()
    }

    /// Default value in canonical textual form.
    pub fn default_value(&self) -> &str {
        &self.entry.default_value
    }

    /// Current value in canonical textual form.
    pub fn value(&self) -> String {
        self.entry.slot.value_string()
    }

    /// Whether the flag has been set through [`FlagSet::set`].
    pub fn is_changed(&self) -> bool {
        self.entry.changed.load(Ordering::Acquire)
    }

    /// Whether the flag may be updated while the process runs.
    pub fn is_dynamic(&self) -> bool {
        self.entry.dynamic
    }
}

impl fmt::Debug for FlagHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagHandle")
            .field("name", &self.entry.name)
            .field("type", &self.type_name())
            .field("value", &self.value())
            .field("changed", &self.is_changed())
            .field("dynamic", &self.entry.dynamic)
            .finish()
    }
}

/// A registry of named flags. Clones share the same registry.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::registry::FlagSet;
///
/// let flags = FlagSet::new();
/// let port = flags.define_static("port", 8080i64, "listening port").unwrap();
/// let limit = flags.dyn_int64("rate_limit", 100, "requests per second").unwrap();
///
/// flags.set("rate_limit", "250").unwrap();
/// assert_eq!(limit.value(), 250);
/// assert!(flags.lookup("rate_limit").unwrap().is_changed());
/// assert!(!flags.is_dynamic("port"));
/// # let _ = port;
/// ```
#[derive(Clone, Default)]
pub struct FlagSet {
    entries: Arc<RwLock<BTreeMap<String, Arc<RegistryEntry>>>>,
}

impl FlagSet {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag that may change at runtime.
    ///
    /// # Errors
    ///
    /// [`FlagError::AlreadyRegistered`] for duplicate names and
    /// [`FlagError::InvalidKey`] for names that are empty or contain `/`.
    pub fn define_dynamic<T: FlagValue>(
        &self,
        name: &str,
        default: T,
        usage: &str,
    ) -> Result<DynamicFlag<T>> {
        self.define(name, default, usage, true)
    }

    /// Register a flag that is only meant to be set at startup.
    ///
    /// Static flags can still be set through [`FlagSet::set`], but the updater
    /// refuses to change them while watching.
    ///
    /// # Errors
    ///
    /// Same as [`define_dynamic`](Self::define_dynamic).
    pub fn define_static<T: FlagValue>(
        &self,
        name: &str,
        default: T,
        usage: &str,
    ) -> Result<DynamicFlag<T>> {
        self.define(name, default, usage, false)
    }

    fn define<T: FlagValue>(
        &self,
        name: &str,
        default: T,
        usage: &str,
        dynamic: bool,
    ) -> Result<DynamicFlag<T>> {
        if name.is_empty() || name.contains('/') {
            return Err(FlagError::InvalidKey(name.to_string()));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(FlagError::AlreadyRegistered(name.to_string()));
        }
        let default_value = default.format_flag();
        let flag = DynamicFlag::with_mode(name, default, dynamic);
        entries.insert(
            name.to_string(),
            Arc::new(RegistryEntry {
                name: name.to_string(),
                usage: usage.to_string(),
                default_value,
                dynamic,
                changed: AtomicBool::new(false),
                slot: Box::new(flag.clone()),
            }),
        );
        debug!(flag = %name, dynamic, "defined flag");
        Ok(flag)
    }

    /// Register a dynamic `i64` flag.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_int64(&self, name: &str, default: i64, usage: &str) -> Result<DynInt64> {
        self.define_dynamic(name, default, usage)
    }

    /// Register a dynamic `f64` flag.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_float64(&self, name: &str, default: f64, usage: &str) -> Result<DynFloat64> {
        self.define_dynamic(name, default, usage)
    }

    /// Register a dynamic string flag.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_string(&self, name: &str, default: &str, usage: &str) -> Result<DynString> {
        self.define_dynamic(name, default.to_string(), usage)
    }

    /// Register a dynamic ordered string list flag.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_string_slice(
        &self,
        name: &str,
        default: &[&str],
        usage: &str,
    ) -> Result<DynStringSlice> {
        let default = default.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        self.define_dynamic(name, default, usage)
    }

    /// Register a dynamic string set flag.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_string_set(&self, name: &str, default: &[&str], usage: &str) -> Result<DynStringSet> {
        let default = default.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        self.define_dynamic(name, default, usage)
    }

    /// Register a dynamic duration flag.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_duration(&self, name: &str, default: Duration, usage: &str) -> Result<DynDuration> {
        self.define_dynamic(name, default, usage)
    }

    /// Register a dynamic structured flag decoded from JSON.
    ///
    /// # Errors
    ///
    /// See [`define_dynamic`](Self::define_dynamic).
    pub fn dyn_json<T>(&self, name: &str, default: T, usage: &str) -> Result<DynJson<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.define_dynamic(name, Json(default), usage)
    }

    /// Find a flag by name.
    pub fn lookup(&self, name: &str) -> Option<FlagHandle> {
        self.entries
            .read()
            .get(name)
            .map(|entry| FlagHandle {
                entry: Arc::clone(entry),
            })
    }

    /// Whether `name` is registered as dynamic. Unknown names are not dynamic.
    pub fn is_dynamic(&self, name: &str) -> bool {
        self.entries
            .read()
            .get(name)
            .is_some_and(|entry| entry.dynamic)
    }

    /// Parse and publish a value for `name`, then mark the flag as changed.
    ///
    /// # Errors
    ///
    /// [`FlagError::NotFound`] for unknown names; otherwise the parse or
    /// validation failure wrapped in [`FlagError::Rejected`]. A failed set
    /// leaves both the value and the changed bit untouched.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let entry = self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FlagError::NotFound(name.to_string()))?;

        entry
            .slot
            .set_from_str(value)
            .map_err(|source| FlagError::Rejected {
                name: name.to_string(),
                source: Box::new(source),
            })?;
        entry.changed.store(true, Ordering::Release);
        Ok(())
    }

    /// Visit every flag in name order.
    pub fn visit_all(&self, mut visit: impl FnMut(&FlagHandle)) {
        for handle in self.handles() {
            visit(&handle);
        }
    }

    /// Visit every flag that has been set, in name order.
    pub fn visit_changed(&self, visit: impl FnMut(&FlagHandle)) {
        self.visit_filtered(FlagHandle::is_changed, visit);
    }

    /// Visit, in name order, every flag accepted by `filter`.
    ///
    /// ```
    /// use hotswap_flags::registry::FlagSet;
    ///
    /// let flags = FlagSet::new();
    /// flags.dyn_int64("workers", 4, "").unwrap();
    /// flags.define_static("port", 8080i64, "").unwrap();
    ///
    /// let mut dynamic = Vec::new();
    /// flags.visit_filtered(|h| h.is_dynamic(), |h| dynamic.push(h.name().to_string()));
    /// assert_eq!(dynamic, ["workers"]);
    /// ```
    pub fn visit_filtered(
        &self,
        mut filter: impl FnMut(&FlagHandle) -> bool,
        mut visit: impl FnMut(&FlagHandle),
    ) {
        for handle in self.handles() {
            if filter(&handle) {
                visit(&handle);
            }
        }
    }

    /// Number of registered flags.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no flags are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered names in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Snapshot of handles so callbacks run without the registry lock held.
    fn handles(&self) -> Vec<FlagHandle> {
        self.entries
            .read()
            .values()
            .map(|entry| FlagHandle {
                entry: Arc::clone(entry),
            })
            .collect()
    }
}

impl fmt::Debug for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagSet")
            .field("flags", &self.names())
            .finish()
    }
}

/// Extract the flag name from a store key: its final `/`-separated segment.
///
/// # Errors
///
/// [`FlagError::InvalidKey`] if the key has no `/` or ends with one.
pub fn flag_name_from_key(key: &str) -> Result<&str> {
    match key.rsplit_once('/') {
        Some((_, name)) if !name.is_empty() => Ok(name),
        _ => Err(FlagError::InvalidKey(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::in_range;

    #[test]
    fn test_define_and_lookup() {
        let flags = FlagSet::new();
        flags.dyn_int64("some_int_1", 13371337, "some int usage").unwrap();
        flags.define_static("static_int", 5i64, "static").unwrap();

        let handle = flags.lookup("some_int_1").unwrap();
        assert_eq!(handle.type_name(), "int64");
        assert_eq!(handle.default_value(), "13371337");
        assert_eq!(handle.usage(), "some int usage");
        assert!(handle.is_dynamic());
        assert!(!handle.is_changed());

        assert!(flags.is_dynamic("some_int_1"));
        assert!(!flags.is_dynamic("static_int"));
        assert!(!flags.is_dynamic("missing"));
        assert_eq!(flags.names(), vec!["some_int_1", "static_int"]);
    }

    #[test]
    fn test_duplicate_and_invalid_names() {
        let flags = FlagSet::new();
        flags.dyn_string("a", "x", "").unwrap();
        assert!(matches!(
            flags.dyn_string("a", "y", ""),
            Err(FlagError::AlreadyRegistered(_))
        ));
        assert!(matches!(
            flags.dyn_string("a/b", "y", ""),
            Err(FlagError::InvalidKey(_))
        ));
        assert!(matches!(flags.dyn_string("", "y", ""), Err(FlagError::InvalidKey(_))));
    }

    #[test]
    fn test_set_marks_changed() {
        let flags = FlagSet::new();
        let flag = flags.dyn_int64("some_int_1", 1, "").unwrap();
        flags.set("some_int_1", "2").unwrap();
        assert_eq!(flag.value(), 2);
        assert!(flags.lookup("some_int_1").unwrap().is_changed());
    }

    #[test]
    fn test_failed_set_leaves_changed_bit() {
        let flags = FlagSet::new();
        let flag = flags
            .dyn_int64("bounded", 5, "")
            .unwrap()
            .with_validator(in_range(0, 10));

        let err = flags.set("bounded", "11").unwrap_err();
        assert!(matches!(&err, FlagError::Rejected { name, .. } if name == "bounded"));
        assert!(err.is_rejection());
        assert!(!flags.lookup("bounded").unwrap().is_changed());
        assert_eq!(flag.value(), 5);

        assert!(matches!(flags.set("nope", "1"), Err(FlagError::NotFound(_))));
    }

    #[test]
    fn test_validator_attached_after_define_is_seen_by_registry() {
        let flags = FlagSet::new();
        let _flag = flags
            .dyn_float64("ratio", 12.0, "")
            .unwrap()
            .with_validator(in_range(10.0, 14.0));
        assert!(flags.set("ratio", "13.41").is_ok());
        assert!(flags.set("ratio", "14.001").is_err());
        assert_eq!(flags.lookup("ratio").unwrap().value(), "13.41");
    }

    #[test]
    fn test_visit_changed_only() {
        let flags = FlagSet::new();
        flags.dyn_int64("a", 1, "").unwrap();
        flags.dyn_int64("b", 1, "").unwrap();
        flags.set("b", "3").unwrap();

        let mut all = Vec::new();
        flags.visit_all(|f| all.push(f.name().to_string()));
        assert_eq!(all, vec!["a", "b"]);

        let mut changed = Vec::new();
        flags.visit_changed(|f| changed.push(f.name().to_string()));
        assert_eq!(changed, vec!["b"]);
    }

    #[test]
    fn test_visit_filtered_by_kind_and_type() {
        let flags = FlagSet::new();
        flags.dyn_int64("workers", 4, "").unwrap();
        flags.dyn_string("region", "us-east-1", "").unwrap();
        flags.define_static("port", 8080i64, "").unwrap();

        let mut dynamic = Vec::new();
        flags.visit_filtered(FlagHandle::is_dynamic, |f| dynamic.push(f.name().to_string()));
        assert_eq!(dynamic, vec!["region", "workers"]);

        let mut ints = Vec::new();
        flags.visit_filtered(
            |f| f.type_name() == "int64",
            |f| ints.push(f.name().to_string()),
        );
        assert_eq!(ints, vec!["port", "workers"]);

        let mut none = 0;
        flags.visit_filtered(|_| false, |_| none += 1);
        assert_eq!(none, 0);
    }

    #[test]
    fn test_flag_name_from_key() {
        assert_eq!(flag_name_from_key("/flagz/some_int").unwrap(), "some_int");
        assert_eq!(flag_name_from_key("/some_int").unwrap(), "some_int");
        assert!(flag_name_from_key("some_int").is_err());
        assert!(flag_name_from_key("/flagz/").is_err());
    }
}
