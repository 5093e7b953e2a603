//! Shared foundational types used across the memo artifact cache.
//!
//! This crate provides the SHA-512 content hash used to name blobs, the
//! fingerprint type used to name cache keys, and the internal error type for
//! failures that indicate a bug rather than an environmental problem.

#![warn(missing_docs)]

pub mod hash;
pub mod result;

pub use hash::{ContentHash, ContentHasher, Fingerprint, ParseHashError, DIGEST_LEN};
pub use result::{InternalError, MemoResult};
