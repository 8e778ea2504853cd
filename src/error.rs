//! Error types for hotswap-flags.

use crate::sources::WatchError;
use std::fmt;

/// Result type alias for hotswap-flags operations.
pub type Result<T> = std::result::Result<T, FlagError>;

/// Errors that can occur when defining, setting, or synchronizing flags.
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    /// The textual input could not be parsed into the flag's type.
    #[error("invalid {type_name} value {input:?}: {reason}")]
    Parse {
        /// The offending input text
        input: String,
        /// Canonical name of the target type
        type_name: &'static str,
        /// Why parsing failed
        reason: String,
    },

    /// A validator rejected the parsed candidate value.
    #[error("value rejected: {0}")]
    Validation(#[from] ValidationError),

    /// No flag with this name exists in the registry.
    #[error("flag not found: {0}")]
    NotFound(String),

    /// The flag exists but was not registered as dynamic.
    #[error("flag is not dynamic: {0}")]
    NotDynamic(String),

    /// A flag with this name was already registered.
    #[error("flag already registered: {0}")]
    AlreadyRegistered(String),

    /// Setting a named flag failed.
    #[error("flag {name}: {source}")]
    Rejected {
        /// Name of the flag being set
        name: String,
        /// The underlying parse or validation failure
        #[source]
        source: Box<FlagError>,
    },

    /// A source key could not be mapped to a flag name.
    #[error("cannot extract flag name from key {0:?}")]
    InvalidKey(String),

    /// Several independent failures, reported together.
    #[error("encountered {} errors while applying flags:\n  {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<FlagError>),

    /// `initialize` was called more than once.
    #[error("updater already initialized")]
    AlreadyInitialized,

    /// `start` was called before `initialize`.
    #[error("updater not initialized")]
    NotInitialized,

    /// `start` was called while the watch task is running.
    #[error("updater already watching")]
    AlreadyWatching,

    /// `stop` was called while no watch task is running.
    #[error("updater not watching")]
    NotWatching,

    /// The watch task needs a Tokio runtime and none is active.
    #[error("no Tokio runtime available to run the watch task")]
    NoRuntime,

    /// The watched source failed.
    #[error("source error: {0}")]
    Source(#[from] WatchError),

    /// Updater configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlagError {
    pub(crate) fn parse(
        input: impl Into<String>,
        type_name: &'static str,
        reason: impl ToString,
    ) -> Self {
        Self::Parse {
            input: input.into(),
            type_name,
            reason: reason.to_string(),
        }
    }

    /// Returns true for parse and validator failures, the only errors that are
    /// local to a single `set` call.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Parse { .. } | Self::Validation(_) => true,
            Self::Rejected { source, .. } => source.is_rejection(),
            _ => false,
        }
    }
}

fn join_errors(errors: &[FlagError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n  ")
}

/// Validation error returned by flag validators.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// A scalar fell outside an inclusive range.
    OutOfRange {
        /// The rejected value, formatted
        value: String,
        /// Lower bound, formatted
        low: String,
        /// Upper bound, formatted
        high: String,
    },

    /// A collection had fewer elements than required.
    TooFewElements {
        /// Number of elements present
        actual: usize,
        /// Required minimum
        minimum: usize,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::OutOfRange { value, low, high } => {
                write!(f, "value {} not in [{}, {}] range", value, low, high)
            }
            Self::TooFewElements { actual, minimum } => {
                write!(
                    f,
                    "value has {} elements, must have at least {}",
                    actual, minimum
                )
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}
