//! Cache façade.
//!
//! The `Cache` owns the on-disk layout under its root directory:
//!
//! ```text
//! <root>/files/<digest hex>         immutable blobs
//! <root>/metadata/<fingerprint hex> one record per key
//! ```
//!
//! and hands out [`CacheEntry`] handles bound to both stores.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use memo_config::CacheConfig;

use crate::blob::BlobStore;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::fs::ensure_dir;
use crate::key::CacheKey;
use crate::metadata::MetadataStore;
use crate::registry::KindRegistry;

/// Subdirectory holding content-addressed blobs.
pub const FILES_DIR: &str = "files";

/// Subdirectory holding per-key metadata records.
pub const METADATA_DIR: &str = "metadata";

/// A content-addressed artifact cache rooted at one directory.
///
/// There is no locking between processes sharing a root. Two producers of
/// the same key both do the work and both publish; every write is a rename
/// of a complete file, so the last one wins and readers never see a torn
/// file.
#[derive(Debug)]
pub struct Cache {
    root: PathBuf,
    blobs: BlobStore,
    metadata: MetadataStore,
}

impl Cache {
    /// Opens the cache at `root` with default settings and no registered
    /// value kinds.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::with_registry(root, Arc::new(KindRegistry::empty()))
    }

    /// Opens the cache at `root` with default settings and `registry`.
    pub fn with_registry(
        root: impl Into<PathBuf>,
        registry: Arc<KindRegistry>,
    ) -> Result<Self, CacheError> {
        Self::with_config(&CacheConfig::with_root(root), registry)
    }

    /// Opens the cache described by `config`.
    ///
    /// `config.cache.root` is used as given; resolve a relative root with
    /// [`CacheConfig::resolved_root`] first if needed.
    pub fn with_config(
        config: &CacheConfig,
        registry: Arc<KindRegistry>,
    ) -> Result<Self, CacheError> {
        let root = config.cache.root.clone();
        ensure_dir(&root, config.cache.dir_mode)?;
        let blobs = BlobStore::open(root.join(FILES_DIR), config)?;
        let metadata = MetadataStore::open(
            root.join(METADATA_DIR),
            &config.cache.temp_prefix,
            config.cache.dir_mode,
            registry,
        )?;
        tracing::debug!(root = %root.display(), "opened cache");
        Ok(Self {
            root,
            blobs,
            metadata,
        })
    }

    /// Replaces the blob store, e.g. to inject a hard-link function.
    pub fn with_blob_store(mut self, blobs: BlobStore) -> Self {
        self.blobs = blobs;
        self
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The metadata store.
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Builds a key for `op` applied to `subjects`.
    pub fn make_key<I, S>(&self, op: impl Into<String>, subjects: I) -> CacheKey
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CacheKey::new(op, subjects)
    }

    /// Returns the entry for `key`.
    ///
    /// A stored record makes a loaded entry (a hit); no record makes a new,
    /// empty one (a miss). A record that exists but cannot be read is an
    /// error, never a miss.
    pub fn get_entry(&self, key: &CacheKey) -> Result<CacheEntry<'_>, CacheError> {
        self.lookup(key).map_err(|e| e.context("get_entry"))
    }

    fn lookup(&self, key: &CacheKey) -> Result<CacheEntry<'_>, CacheError> {
        let fingerprint = key.fingerprint()?;
        let record = self.metadata.load(&fingerprint)?;
        match &record {
            Some(r) => tracing::debug!(
                op = key.op(),
                fingerprint = %fingerprint,
                fields = r.len(),
                "cache hit"
            ),
            None => tracing::debug!(op = key.op(), fingerprint = %fingerprint, "cache miss"),
        }
        Ok(CacheEntry::new(
            key.clone(),
            fingerprint,
            &self.blobs,
            &self.metadata,
            record,
        ))
    }
}
