//! Dynamic value model: the atomic holder, per-type grammars, validators and
//! the named flag handle built from them.

mod atomic_value;
mod csv;
mod duration;
mod dynamic_flag;
mod json;
mod validation;
mod value;

pub use atomic_value::AtomicValue;
pub use dynamic_flag::{
    DynDuration, DynFloat64, DynInt64, DynJson, DynString, DynStringSet, DynStringSlice,
    DynamicFlag,
};
pub use json::Json;
pub use validation::{InRange, MatchesRegex, MinElements, Validator, in_range, matches_regex, min_elements};
pub use value::FlagValue;

pub(crate) use json::prettify;
