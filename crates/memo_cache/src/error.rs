//! Error types for cache operations.

use std::path::PathBuf;

use memo_common::{Fingerprint, InternalError};

/// Errors that can occur during cache operations.
///
/// A missing metadata record is not an error: lookups report a miss as
/// `Ok(None)`. Everything in this enum is fatal to the operation that
/// produced it and is never retried by the cache itself.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while creating, writing, renaming, linking or
    /// changing permissions on a file in the store.
    #[error("cache I/O error during {op} at {path}: {source}")]
    Io {
        /// The filesystem operation that failed.
        op: &'static str,
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded.
    #[error("serialization error{}: {reason}", describe(.fingerprint))]
    Serialization {
        /// Fingerprint of the record involved, when known.
        fingerprint: Option<Fingerprint>,
        /// Description of the serialization failure.
        reason: String,
    },

    /// A value names a kind that is not in the registry.
    #[error("unregistered value kind '{kind}'{}", describe(.fingerprint))]
    UnknownKind {
        /// The unregistered kind name.
        kind: String,
        /// Fingerprint of the record involved, when known.
        fingerprint: Option<Fingerprint>,
    },

    /// A stored value was written by a different version of its kind.
    #[error("kind '{kind}' version mismatch: registered {expected}, stored {actual}")]
    KindVersionMismatch {
        /// The kind name.
        kind: String,
        /// Version in the registry.
        expected: u32,
        /// Version carried by the stored value.
        actual: u32,
    },

    /// The same kind name was registered twice.
    #[error("value kind '{kind}' registered more than once")]
    DuplicateKind {
        /// The kind name.
        kind: String,
    },

    /// A metadata file has an invalid or missing header.
    #[error("invalid record header in {path}: {reason}")]
    InvalidHeader {
        /// The metadata file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The metadata file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The record format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The metadata file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// A caller tried to set a reserved field.
    #[error("attempt to set reserved field '{name}'")]
    ReservedField {
        /// The rejected field name.
        name: String,
    },

    /// Install was called on an entry that has neither written content nor
    /// a content hash loaded from a previous run.
    #[error("cache entry {fingerprint} has no content to install")]
    MissingContent {
        /// Fingerprint of the entry.
        fingerprint: Fingerprint,
    },

    /// Content was written to an entry after its blob was finalized.
    #[error("cache entry {fingerprint} is already finalized")]
    AlreadyFinalized {
        /// Fingerprint of the entry.
        fingerprint: Fingerprint,
    },

    /// The out-of-band producer passed to `write_via` failed.
    #[error("content producer failed: {source}")]
    Producer {
        /// The producer's error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Key derivation failed.
    #[error(transparent)]
    Key(#[from] InternalError),

    /// An error wrapped with the name of the cache operation that hit it.
    #[error("{op}: {source}")]
    Context {
        /// The cache operation.
        op: &'static str,
        /// The wrapped error.
        source: Box<CacheError>,
    },
}

fn describe(fingerprint: &Option<Fingerprint>) -> String {
    match fingerprint {
        Some(fp) => format!(" for record {fp}"),
        None => String::new(),
    }
}

impl CacheError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            fingerprint: None,
            reason: reason.into(),
        }
    }

    /// Wraps this error with the name of the operation that produced it.
    pub fn context(self, op: &'static str) -> Self {
        Self::Context {
            op,
            source: Box::new(self),
        }
    }

    /// Attaches a record fingerprint to serialization errors that lack one.
    pub fn with_fingerprint(self, fp: Fingerprint) -> Self {
        match self {
            Self::Serialization {
                fingerprint: None,
                reason,
            } => Self::Serialization {
                fingerprint: Some(fp),
                reason,
            },
            Self::UnknownKind {
                kind,
                fingerprint: None,
            } => Self::UnknownKind {
                kind,
                fingerprint: Some(fp),
            },
            other => other,
        }
    }

    /// Returns `true` for errors caused by a defect in the calling code.
    pub fn is_usage_error(&self) -> bool {
        match self {
            Self::ReservedField { .. }
            | Self::MissingContent { .. }
            | Self::AlreadyFinalized { .. } => true,
            Self::Context { source, .. } => source.is_usage_error(),
            _ => false,
        }
    }

    /// Returns the underlying I/O error kind, looking through context wrappers.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            Self::Context { source, .. } => source.io_kind(),
            _ => None,
        }
    }
}
