//! Flag value validation support.

use crate::error::ValidationError;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Display;

/// A check run against a candidate value before it is published.
///
/// Validators execute synchronously on the caller of `set`. Any closure of the
/// form `Fn(&T) -> Result<(), ValidationError>` is a validator.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::core::Validator;
/// use hotswap_flags::error::ValidationError;
///
/// struct EvenOnly;
///
/// impl Validator<i64> for EvenOnly {
///     fn validate(&self, value: &i64) -> Result<(), ValidationError> {
///         if value % 2 != 0 {
///             return Err(ValidationError::custom(format!("{} is odd", value)));
///         }
///         Ok(())
///     }
/// }
///
/// assert!(EvenOnly.validate(&4).is_ok());
/// assert!(EvenOnly.validate(&3).is_err());
/// ```
pub trait Validator<T: ?Sized>: Send + Sync {
    /// Validate a candidate value.
    ///
    /// # Errors
    ///
    /// Should return a `ValidationError` describing why the value is unacceptable.
    fn validate(&self, value: &T) -> Result<(), ValidationError>;
}

impl<T: ?Sized, F> Validator<T> for F
where
    F: Fn(&T) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, value: &T) -> Result<(), ValidationError> {
        self(value)
    }
}

/// Inclusive range check for scalar flags.
#[derive(Debug, Clone)]
pub struct InRange<T> {
    low: T,
    high: T,
}

/// Returns a validator accepting values in `[low, high]`.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::core::{in_range, Validator};
///
/// let check = in_range(10.0, 14.0);
/// assert!(check.validate(&13.41).is_ok());
/// assert!(check.validate(&14.001).is_err());
/// ```
pub fn in_range<T>(low: T, high: T) -> InRange<T>
where
    T: PartialOrd + Display + Send + Sync,
{
    InRange { low, high }
}

impl<T> Validator<T> for InRange<T>
where
    T: PartialOrd + Display + Send + Sync,
{
    fn validate(&self, value: &T) -> Result<(), ValidationError> {
        // NaN compares false both ways, so spell the check positively.
        if *value >= self.low && *value <= self.high {
            return Ok(());
        }
        Err(ValidationError::OutOfRange {
            value: value.to_string(),
            low: self.low.to_string(),
            high: self.high.to_string(),
        })
    }
}

/// Minimum cardinality check for slice and set flags.
#[derive(Debug, Clone, Copy)]
pub struct MinElements {
    minimum: usize,
}

/// Returns a validator rejecting collections with fewer than `minimum` elements.
pub fn min_elements(minimum: usize) -> MinElements {
    MinElements { minimum }
}

impl MinElements {
    fn check(&self, actual: usize) -> Result<(), ValidationError> {
        if actual < self.minimum {
            return Err(ValidationError::TooFewElements {
                actual,
                minimum: self.minimum,
            });
        }
        Ok(())
    }
}

impl Validator<Vec<String>> for MinElements {
    fn validate(&self, value: &Vec<String>) -> Result<(), ValidationError> {
        self.check(value.len())
    }
}

impl Validator<BTreeSet<String>> for MinElements {
    fn validate(&self, value: &BTreeSet<String>) -> Result<(), ValidationError> {
        self.check(value.len())
    }
}

/// Regular expression check for string flags.
#[derive(Debug, Clone)]
pub struct MatchesRegex {
    matcher: Regex,
}

/// Returns a validator requiring string values to match `matcher`.
pub fn matches_regex(matcher: Regex) -> MatchesRegex {
    MatchesRegex { matcher }
}

impl Validator<String> for MatchesRegex {
    fn validate(&self, value: &String) -> Result<(), ValidationError> {
        if !self.matcher.is_match(value) {
            return Err(ValidationError::custom(format!(
                "value {} must match regex {}",
                value, self.matcher
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_is_inclusive() {
        let check = in_range(0i64, 2000);
        assert!(check.validate(&0).is_ok());
        assert!(check.validate(&2000).is_ok());
        assert!(check.validate(&2001).is_err());
        assert!(check.validate(&-1).is_err());
    }

    #[test]
    fn test_in_range_rejects_nan() {
        let check = in_range(10.0, 14.0);
        assert!(check.validate(&f64::NAN).is_err());
    }

    #[test]
    fn test_min_elements() {
        let check = min_elements(2);
        let two = vec!["car".to_string(), "far".to_string()];
        let one = vec!["car".to_string()];
        assert!(check.validate(&two).is_ok());
        assert!(matches!(
            check.validate(&one),
            Err(ValidationError::TooFewElements { actual: 1, minimum: 2 })
        ));

        let set: BTreeSet<String> = two.into_iter().collect();
        assert!(check.validate(&set).is_ok());
    }

    #[test]
    fn test_matches_regex() {
        let check = matches_regex(Regex::new("^[a-z]+$").unwrap());
        assert!(check.validate(&"foo".to_string()).is_ok());
        let err = check.validate(&"Foo1".to_string()).unwrap_err();
        assert!(err.to_string().contains("must match regex"));
    }

    #[test]
    fn test_closure_validator() {
        let check = |v: &i64| {
            if *v == 42 {
                Err(ValidationError::custom("not the answer"))
            } else {
                Ok(())
            }
        };
        assert!(Validator::validate(&check, &1).is_ok());
        assert!(Validator::validate(&check, &42).is_err());
    }
}
