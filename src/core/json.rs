//! Structured (JSON document) flag values.

use crate::core::FlagValue;
use crate::error::{FlagError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ops::Deref;

/// A flag value decoded from a JSON document into `T`.
///
/// Every `set` decodes a brand-new `T`: fields absent from the new document take
/// their serde defaults (or fail to decode), never the previous value's fields.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::core::{FlagValue, Json};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
/// struct Limits {
///     #[serde(default)]
///     burst: u32,
///     rate: f64,
/// }
///
/// let limits = Json::<Limits>::parse_flag(r#"{"rate": 2.5}"#).unwrap();
/// assert_eq!(limits.rate, 2.5);
/// assert_eq!(limits.burst, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwrap the decoded document.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Serialize> Json<T> {
    /// Indented rendering, used by the status surface.
    pub fn pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| "ERR".to_string())
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Json<T> {
    fn from(value: T) -> Self {
        Json(value)
    }
}

impl<T> FlagValue for Json<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    const TYPE_NAME: &'static str = "json";

    fn parse_flag(input: &str) -> Result<Self> {
        serde_json::from_str::<T>(input)
            .map(Json)
            .map_err(|e| FlagError::parse(input, Self::TYPE_NAME, e))
    }

    fn format_flag(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "ERR".to_string())
    }
}

/// Re-indent a compact JSON document; returns the input unchanged if it is not JSON.
pub(crate) fn prettify(input: &str) -> String {
    serde_json::from_str::<serde_json::Value>(input)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| input.to_string())
}
