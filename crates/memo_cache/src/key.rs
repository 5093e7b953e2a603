//! Cache key derivation.
//!
//! A key is an operation tag plus an ordered list of subjects (usually file
//! paths). Its fingerprint is the SHA-512 of the JSON encoding
//! `{"op": .., "subjects": [..]}`; struct fields serialize in declaration
//! order, so the encoding is stable across runs.
//!
//! The fingerprint covers only what the caller passes in. It does not look
//! at subject sizes, modification times or contents, so a key stays a hit
//! after its subject files change unless the caller folds something that
//! changes with them (a content hash, a version) into the subjects.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use memo_common::{ContentHasher, Fingerprint, InternalError, MemoResult};
use serde::Serialize;

#[derive(Serialize)]
struct CanonicalKey<'a> {
    op: &'a str,
    subjects: &'a [String],
}

/// Computes the fingerprint of an `(operation, subjects)` pair.
///
/// Subject order is significant: `["a", "b"]` and `["b", "a"]` produce
/// different fingerprints.
pub fn derive_fingerprint(op: &str, subjects: &[String]) -> MemoResult<Fingerprint> {
    let mut hasher = ContentHasher::new();
    serde_json::to_writer(&mut hasher, &CanonicalKey { op, subjects })
        .map_err(|e| InternalError::new(format!("failed to encode cache key '{op}': {e}")))?;
    Ok(Fingerprint::new(hasher.finish()))
}

/// Identity of one cached transformation.
///
/// The fingerprint is derived on first use and kept for the lifetime of the
/// key, including across clones made after that point.
#[derive(Clone)]
pub struct CacheKey {
    op: String,
    subjects: Vec<String>,
    fingerprint: OnceLock<Fingerprint>,
}

impl CacheKey {
    /// Creates a key for `op` applied to `subjects`, in the order given.
    pub fn new<I, S>(op: impl Into<String>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op: op.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            fingerprint: OnceLock::new(),
        }
    }

    /// The operation tag.
    pub fn op(&self) -> &str {
        &self.op
    }

    /// The subjects, in fingerprint order.
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    /// Returns the key's fingerprint, deriving it on the first call.
    pub fn fingerprint(&self) -> MemoResult<Fingerprint> {
        if let Some(fp) = self.fingerprint.get() {
            return Ok(*fp);
        }
        let fp = derive_fingerprint(&self.op, &self.subjects)?;
        Ok(*self.fingerprint.get_or_init(|| fp))
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.subjects == other.subjects
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.op.hash(state);
        self.subjects.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("op", &self.op)
            .field("subjects", &self.subjects)
            .finish()
    }
}
