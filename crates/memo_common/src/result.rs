//! Common result and error types for the memo cache.

/// The standard result type for operations that can only fail through a bug.
///
/// `Err` indicates an internal error (a defect in memo or its caller), not an
/// environmental failure such as a full disk. Environmental failures are
/// reported through each crate's own error enum.
pub type MemoResult<T> = Result<T, InternalError>;

/// An internal error indicating a bug, not a storage or input problem.
///
/// These errors should never occur during normal operation. Key derivation
/// raises one if the canonical encoder rejects its input, which plain string
/// inputs cannot trigger.
#[derive(Debug, thiserror::Error)]
#[error("internal cache error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}
