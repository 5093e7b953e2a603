//! Configuration types deserialized from `memo.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default prefix for transient files created inside the store.
pub const DEFAULT_TEMP_PREFIX: &str = "memo-cache-";

/// Default permission bits for store directories.
pub const DEFAULT_DIR_MODE: u32 = 0o700;

/// Default permission bits for finalized blobs (owner read-only).
pub const DEFAULT_BLOB_MODE: u32 = 0o400;

/// The top-level cache configuration parsed from `memo.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Store location and file-creation settings.
    pub cache: StoreConfig,
    /// How blobs are made visible outside the store.
    #[serde(default)]
    pub publish: PublishConfig,
}

impl CacheConfig {
    /// Builds a configuration with default settings rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache: StoreConfig {
                root: root.into(),
                temp_prefix: default_temp_prefix(),
                dir_mode: DEFAULT_DIR_MODE,
                blob_mode: DEFAULT_BLOB_MODE,
            },
            publish: PublishConfig::default(),
        }
    }

    /// Returns the cache root, resolving a relative root against `base_dir`.
    pub fn resolved_root(&self, base_dir: &Path) -> PathBuf {
        if self.cache.root.is_absolute() {
            self.cache.root.clone()
        } else {
            base_dir.join(&self.cache.root)
        }
    }
}

/// The `[cache]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Cache root directory. Relative paths are resolved against the
    /// directory holding `memo.toml`.
    pub root: PathBuf,
    /// File name prefix for temp files in `files/` and `metadata/`.
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    /// Unix permission bits for directories created by the store.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
    /// Unix permission bits applied to every finalized blob.
    #[serde(default = "default_blob_mode")]
    pub blob_mode: u32,
}

/// The `[publish]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishConfig {
    /// Link strategy used when installing a blob at a destination path.
    #[serde(default)]
    pub strategy: PublishStrategy,
}

/// Link strategy for publishing a blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStrategy {
    /// Hard link, falling back to a symbolic link when hard-linking fails.
    #[default]
    HardLinkOrSymlink,
    /// Always use a symbolic link.
    Symlink,
}

fn default_temp_prefix() -> String {
    DEFAULT_TEMP_PREFIX.to_string()
}

fn default_dir_mode() -> u32 {
    DEFAULT_DIR_MODE
}

fn default_blob_mode() -> u32 {
    DEFAULT_BLOB_MODE
}
