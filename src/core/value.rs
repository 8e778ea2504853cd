//! Textual grammar for each supported flag type.

use crate::core::{csv, duration};
use crate::error::{FlagError, Result};
use std::collections::BTreeSet;
use std::time::Duration;

/// A type that can back a flag.
///
/// Implementations define the canonical textual grammar used by `set` and the
/// canonical rendering used by status pages and checksums. Formatting a parsed
/// value and parsing it again must reproduce an equal value.
pub trait FlagValue: Send + Sync + Sized + 'static {
    /// Short type name shown in diagnostics, e.g. `"int64"`.
    const TYPE_NAME: &'static str;

    /// Parse a fresh value from its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Parse`] naming the offending input.
    fn parse_flag(input: &str) -> Result<Self>;

    /// Render the value in its canonical textual form.
    fn format_flag(&self) -> String;
}

impl FlagValue for i64 {
    const TYPE_NAME: &'static str = "int64";

    fn parse_flag(input: &str) -> Result<Self> {
        parse_int(input).map_err(|reason| FlagError::parse(input, Self::TYPE_NAME, reason))
    }

    fn format_flag(&self) -> String {
        self.to_string()
    }
}

/// Integer literal with optional sign, `0x`/`0o`/`0b` prefix and `_` separators.
fn parse_int(input: &str) -> std::result::Result<i64, String> {
    let (negative, unsigned) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    let (radix, digits) = match unsigned.get(..2) {
        Some("0x") | Some("0X") => (16, &unsigned[2..]),
        Some("0o") | Some("0O") => (8, &unsigned[2..]),
        Some("0b") | Some("0B") => (2, &unsigned[2..]),
        _ => (10, unsigned),
    };
    if digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err("misplaced digit separator".to_string());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() || cleaned.starts_with(['+', '-']) {
        return Err("missing digits".to_string());
    }
    let signed = if negative {
        format!("-{}", cleaned)
    } else {
        cleaned
    };
    i64::from_str_radix(&signed, radix).map_err(|e| e.to_string())
}

impl FlagValue for f64 {
    const TYPE_NAME: &'static str = "float64";

    fn parse_flag(input: &str) -> Result<Self> {
        input
            .parse::<f64>()
            .map_err(|e| FlagError::parse(input, Self::TYPE_NAME, e))
    }

    fn format_flag(&self) -> String {
        self.to_string()
    }
}

impl FlagValue for String {
    const TYPE_NAME: &'static str = "string";

    fn parse_flag(input: &str) -> Result<Self> {
        Ok(input.to_string())
    }

    fn format_flag(&self) -> String {
        self.clone()
    }
}

impl FlagValue for Vec<String> {
    const TYPE_NAME: &'static str = "string_slice";

    fn parse_flag(input: &str) -> Result<Self> {
        csv::parse_record(input).map_err(|reason| FlagError::parse(input, Self::TYPE_NAME, reason))
    }

    fn format_flag(&self) -> String {
        csv::format_record(self.iter().map(String::as_str))
    }
}

impl FlagValue for BTreeSet<String> {
    const TYPE_NAME: &'static str = "string_set";

    fn parse_flag(input: &str) -> Result<Self> {
        csv::parse_record(input)
            .map(|fields| fields.into_iter().collect())
            .map_err(|reason| FlagError::parse(input, Self::TYPE_NAME, reason))
    }

    fn format_flag(&self) -> String {
        csv::format_record(self.iter().map(String::as_str))
    }
}

impl FlagValue for Duration {
    const TYPE_NAME: &'static str = "duration";

    fn parse_flag(input: &str) -> Result<Self> {
        duration::parse(input).map_err(|reason| FlagError::parse(input, Self::TYPE_NAME, reason))
    }

    fn format_flag(&self) -> String {
        duration::format(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_literals() {
        assert_eq!(i64::parse_flag("2015").unwrap(), 2015);
        assert_eq!(i64::parse_flag("-42").unwrap(), -42);
        assert_eq!(i64::parse_flag("+7").unwrap(), 7);
        assert_eq!(i64::parse_flag("0x1F").unwrap(), 31);
        assert_eq!(i64::parse_flag("0o17").unwrap(), 15);
        assert_eq!(i64::parse_flag("-0b101").unwrap(), -5);
        assert_eq!(i64::parse_flag("1_000_000").unwrap(), 1_000_000);
        assert_eq!(i64::parse_flag("-9223372036854775808").unwrap(), i64::MIN);
    }

    #[test]
    fn test_int_rejects_garbage() {
        for bad in ["", "randombleh", "12.5", "0x", "--1", "+-1", "_1", "1__0", "9223372036854775808"] {
            let err = i64::parse_flag(bad).unwrap_err();
            assert!(
                matches!(&err, FlagError::Parse { input, type_name: "int64", .. } if input == bad),
                "unexpected error for {:?}: {}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_float_format_is_shortest() {
        let v = f64::parse_flag("13.41").unwrap();
        assert_eq!(v, 13.41);
        assert_eq!(v.format_flag(), "13.41");
        assert!(f64::parse_flag("thirteen").is_err());
    }

    #[test]
    fn test_string_slice_preserves_order() {
        let v = Vec::<String>::parse_flag("car,bar").unwrap();
        assert_eq!(v, vec!["car", "bar"]);
        assert_eq!(v.format_flag(), "car,bar");
    }

    #[test]
    fn test_string_set_dedupes_and_sorts() {
        let v = BTreeSet::<String>::parse_flag("b,a,b").unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v.format_flag(), "a,b");
    }

    #[test]
    fn test_duration_value() {
        let d = Duration::parse_flag("1m30s").unwrap();
        assert_eq!(d, Duration::from_secs(90));
        assert_eq!(d.format_flag(), "1m30s");
        assert!(Duration::parse_flag("soon").is_err());
    }
}
