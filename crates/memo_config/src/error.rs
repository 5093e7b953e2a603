//! Error types for configuration loading and validation.

use std::path::PathBuf;

/// Errors that can occur when loading or validating a `memo.toml` configuration.
///
/// Field names are dotted TOML paths such as `cache.blob_mode`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// The file that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML content could not be parsed into a cache configuration.
    #[error("failed to parse memo.toml: {message}")]
    Parse {
        /// The parser's description of the problem.
        message: String,
    },

    /// A required value is absent or empty.
    #[error("memo.toml: `{field}` is required")]
    MissingField {
        /// The missing field.
        field: &'static str,
    },

    /// A value is present but unusable by the store.
    #[error("memo.toml: invalid `{field}`: {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// The configuration field the error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField { field } | Self::InvalidValue { field, .. } => Some(field),
            Self::Read { .. } | Self::Parse { .. } => None,
        }
    }
}
