//! Content-addressed artifact cache for memoizing deterministic transformations.
//!
//! A [`Cache`] issues [`CacheEntry`] handles for `(operation, subjects)` keys.
//! Entry content is streamed into immutable, SHA-512 named blobs under
//! `<root>/files/`, and each key's structured [`Record`] is stored under
//! `<root>/metadata/`. Every write lands in a temp file first and becomes
//! visible through a single atomic rename, so a crash never leaves a torn
//! blob or record behind.

#![warn(missing_docs)]

pub mod blob;
pub mod cache;
pub mod entry;
pub mod error;
mod fs;
pub mod key;
pub mod metadata;
pub mod record;
pub mod registry;
pub mod value;

pub use blob::{BlobStore, BlobWriter, HardLinkFn, PublishMethod};
pub use cache::{Cache, FILES_DIR, METADATA_DIR};
pub use entry::{CacheEntry, EntryState};
pub use error::CacheError;
pub use key::{derive_fingerprint, CacheKey};
pub use memo_common::{ContentHash, Fingerprint};
pub use metadata::{MetadataStore, StagedRecord};
pub use record::{Record, ReservedField};
pub use registry::{KindRegistry, KindRegistryBuilder, RecordKind};
pub use value::{BackRef, KindValue, SharedValue, Value};
