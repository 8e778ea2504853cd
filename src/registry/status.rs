//! Introspection rendering of registry state.

use crate::core::prettify;
use crate::registry::{FlagHandle, FlagSet};
use serde::Serialize;
use std::fmt;

/// Which flags a listing includes, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlagKind {
    /// Every flag
    #[default]
    All,
    /// Only dynamic flags
    Dynamic,
    /// Only static flags
    Static,
}

/// Selection criteria for [`FlagSet::status`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFilter {
    /// Include only flags that have been explicitly set
    pub only_changed: bool,
    /// Include only flags of this kind
    pub kind: FlagKind,
}

impl StatusFilter {
    /// Only flags that have been explicitly set.
    pub fn changed() -> Self {
        Self {
            only_changed: true,
            kind: FlagKind::All,
        }
    }

    /// Restrict to one kind of flag.
    pub fn with_kind(mut self, kind: FlagKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether `flag` passes this filter.
    pub fn matches(&self, flag: &FlagHandle) -> bool {
        if self.only_changed && !flag.is_changed() {
            return false;
        }
        match self.kind {
            FlagKind::All => true,
            FlagKind::Dynamic => flag.is_dynamic(),
            FlagKind::Static => !flag.is_dynamic(),
        }
    }
}

/// One row of a [`FlagListing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagStatus {
    /// Flag name
    pub name: String,
    /// Usage text
    pub description: String,
    /// Current value, pretty-printed for JSON flags
    pub current_value: String,
    /// Default value, pretty-printed for JSON flags
    pub default_value: String,
    /// Whether the flag has been explicitly set
    pub is_changed: bool,
    /// Whether the flag may change at runtime
    pub is_dynamic: bool,
}

impl FlagStatus {
    fn from_handle(flag: &FlagHandle) -> Self {
        let mut current_value = flag.value();
        let mut default_value = flag.default_value().to_string();
        if flag.type_name().contains("json") {
            current_value = prettify(&current_value);
            default_value = prettify(&default_value);
        }
        Self {
            name: flag.name().to_string(),
            description: flag.usage().to_string(),
            current_value,
            default_value,
            is_changed: flag.is_changed(),
            is_dynamic: flag.is_dynamic(),
        }
    }
}

/// A rendered view of the registry, in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlagListing {
    /// Selected flags
    pub flags: Vec<FlagStatus>,
}

impl FlagListing {
    /// Indented JSON: `{"flags": [{"name": ..., "description": ..., ...}]}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Plain-text rendering, one block per flag.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FlagListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in &self.flags {
            write!(f, "{}", flag.name)?;
            if flag.is_changed {
                write!(f, " [changed]")?;
            }
            writeln!(
                f,
                " [{}]",
                if flag.is_dynamic { "dynamic" } else { "static" }
            )?;
            if !flag.description.is_empty() {
                writeln!(f, "  description: {}", flag.description)?;
            }
            writeln!(f, "  default: {}", indent(&flag.default_value))?;
            writeln!(f, "  current: {}", indent(&flag.current_value))?;
        }
        Ok(())
    }
}

/// Continuation lines of multi-line values line up under the label.
fn indent(value: &str) -> String {
    value.replace('\n', "\n    ")
}

impl FlagSet {
    /// Render the flags selected by `filter`.
    pub fn status(&self, filter: StatusFilter) -> FlagListing {
        let mut flags = Vec::new();
        self.visit_filtered(
            |flag| filter.matches(flag),
            |flag| flags.push(FlagStatus::from_handle(flag)),
        );
        FlagListing { flags }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Backend {
        host: String,
    }

    fn sample() -> FlagSet {
        let flags = FlagSet::new();
        flags.dyn_int64("some_int", 1, "an int").unwrap();
        flags.define_static("port", 8080i64, "port").unwrap();
        flags
            .dyn_json(
                "backend",
                Backend {
                    host: "a".to_string(),
                },
                "",
            )
            .unwrap();
        flags.set("some_int", "2").unwrap();
        flags
    }

    #[test]
    fn test_filters() {
        let flags = sample();
        let names = |listing: FlagListing| {
            listing
                .flags
                .into_iter()
                .map(|f| f.name)
                .collect::<Vec<_>>()
        };
        assert_eq!(
            names(flags.status(StatusFilter::default())),
            vec!["backend", "port", "some_int"]
        );
        assert_eq!(names(flags.status(StatusFilter::changed())), vec!["some_int"]);
        assert_eq!(
            names(flags.status(StatusFilter::default().with_kind(FlagKind::Static))),
            vec!["port"]
        );
        assert_eq!(
            names(flags.status(StatusFilter::default().with_kind(FlagKind::Dynamic))),
            vec!["backend", "some_int"]
        );
    }

    #[test]
    fn test_json_rendering() {
        let flags = sample();
        let listing = flags.status(StatusFilter::changed());
        let value: serde_json::Value = serde_json::from_str(&listing.to_json()).unwrap();
        let row = &value["flags"][0];
        assert_eq!(row["name"], "some_int");
        assert_eq!(row["description"], "an int");
        assert_eq!(row["current_value"], "2");
        assert_eq!(row["default_value"], "1");
        assert_eq!(row["is_changed"], true);
        assert_eq!(row["is_dynamic"], true);
    }

    #[test]
    fn test_json_flags_are_prettified() {
        let flags = sample();
        let listing = flags.status(StatusFilter::default());
        let backend = &listing.flags[0];
        assert_eq!(backend.current_value, "{\n  \"host\": \"a\"\n}");
        assert!(listing.to_text().contains("backend [dynamic]"));
        assert!(listing.to_text().contains("some_int [changed] [dynamic]"));
    }
}
