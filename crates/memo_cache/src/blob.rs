//! Content-addressed blob storage.
//!
//! Blobs are written through a [`BlobWriter`], which tees every byte into a
//! private temp file and a running SHA-512. Finalizing renames the temp file
//! to `<dir>/<digest hex>` and marks it read-only. Identical content always
//! lands on the same name, so a second writer of the same bytes simply
//! replaces the file with an identical one.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memo_common::{ContentHash, ContentHasher};
use memo_config::{CacheConfig, PublishStrategy};
use tempfile::NamedTempFile;

use crate::error::CacheError;
use crate::fs::{ensure_dir, make_read_only, same_file, symlink};

/// Function used to hard-link a blob to a destination path.
pub type HardLinkFn = fn(&Path, &Path) -> io::Result<()>;

fn hard_link(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::hard_link(src, dst)
}

/// How a blob was made visible at a destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMethod {
    /// A hard link to the blob was created.
    HardLink,
    /// A symbolic link to the blob was created.
    Symlink,
    /// The destination already resolved to the blob.
    AlreadyPresent,
}

/// Directory of immutable blobs named by their content hash.
#[derive(Debug)]
pub struct BlobStore {
    dir: PathBuf,
    temp_prefix: String,
    blob_mode: u32,
    strategy: PublishStrategy,
    hard_link: HardLinkFn,
}

impl BlobStore {
    /// Opens the store at `dir`, creating it if needed.
    ///
    /// The directory is canonicalized so symbolic links created by
    /// [`publish`](Self::publish) hold absolute targets.
    pub fn open(dir: impl Into<PathBuf>, config: &CacheConfig) -> Result<Self, CacheError> {
        let dir = dir.into();
        ensure_dir(&dir, config.cache.dir_mode)?;
        let dir = dir
            .canonicalize()
            .map_err(|e| CacheError::io("canonicalize", &dir, e))?;
        Ok(Self {
            dir,
            temp_prefix: config.cache.temp_prefix.clone(),
            blob_mode: config.cache.blob_mode,
            strategy: config.publish.strategy,
            hard_link,
        })
    }

    /// Replaces the function used to create hard links.
    pub fn with_hard_link(mut self, hard_link: HardLinkFn) -> Self {
        self.hard_link = hard_link;
        self
    }

    /// The directory holding blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob named `id`. The blob need not exist.
    pub fn blob_path(&self, id: &ContentHash) -> PathBuf {
        self.dir.join(id.to_hex())
    }

    /// Returns `true` if a blob named `id` is present.
    pub fn contains(&self, id: &ContentHash) -> bool {
        self.blob_path(id).is_file()
    }

    /// Opens the blob named `id` for reading.
    pub fn open_blob(&self, id: &ContentHash) -> Result<File, CacheError> {
        let path = self.blob_path(id);
        File::open(&path).map_err(|e| CacheError::io("open", path, e))
    }

    /// Creates a temp file in the store for a new blob.
    pub fn open_writer(&self) -> Result<BlobWriter, CacheError> {
        let temp = tempfile::Builder::new()
            .prefix(&self.temp_prefix)
            .tempfile_in(&self.dir)
            .map_err(|e| CacheError::io("create_temp", &self.dir, e))?;
        tracing::trace!(path = %temp.path().display(), "opened blob writer");
        Ok(BlobWriter {
            temp,
            hasher: ContentHasher::new(),
        })
    }

    /// Moves the writer's temp file into place and returns the blob id.
    pub fn finalize(&self, writer: BlobWriter) -> Result<ContentHash, CacheError> {
        let BlobWriter { mut temp, hasher } = writer;
        temp.flush()
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| CacheError::io("sync", temp.path(), e))?;

        let bytes = hasher.len();
        let id = hasher.finish();
        let target = self.blob_path(&id);
        if let Err(e) = temp.persist(&target) {
            // Some platforms refuse to rename over a read-only file. The
            // existing blob has the same content, so it stands.
            if !target.is_file() {
                return Err(CacheError::io("rename", &target, e.error));
            }
            if let Err(e) = e.file.close() {
                tracing::warn!(error = %e, "failed to remove duplicate blob temp file");
            }
        }
        make_read_only(&target, self.blob_mode)?;
        tracing::debug!(blob = %id, bytes, "finalized blob");
        Ok(id)
    }

    /// Makes the blob `id` visible at `dest`.
    ///
    /// The destination is a link to the stored blob, never a copy. A
    /// destination that already resolves to the blob is left alone; one
    /// occupied by anything else is an error.
    pub fn publish(&self, id: &ContentHash, dest: &Path) -> Result<PublishMethod, CacheError> {
        let src = self.blob_path(id);
        if !src.is_file() {
            return Err(CacheError::io(
                "publish",
                &src,
                io::Error::new(io::ErrorKind::NotFound, "blob not in store"),
            ));
        }
        if same_file(&src, dest) {
            tracing::debug!(blob = %id, dest = %dest.display(), "blob already published");
            return Ok(PublishMethod::AlreadyPresent);
        }

        let method = match self.strategy {
            PublishStrategy::HardLinkOrSymlink => match (self.hard_link)(&src, dest) {
                Ok(()) => PublishMethod::HardLink,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return self.occupied(id, &src, dest, "hard_link", e);
                }
                Err(e) => {
                    tracing::warn!(
                        dest = %dest.display(),
                        error = %e,
                        "hard link failed, falling back to symlink"
                    );
                    self.symlink(id, &src, dest)?
                }
            },
            PublishStrategy::Symlink => self.symlink(id, &src, dest)?,
        };
        tracing::debug!(blob = %id, dest = %dest.display(), ?method, "published blob");
        Ok(method)
    }

    fn symlink(
        &self,
        id: &ContentHash,
        src: &Path,
        dest: &Path,
    ) -> Result<PublishMethod, CacheError> {
        match symlink(src, dest) {
            Ok(()) => Ok(PublishMethod::Symlink),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.occupied(id, src, dest, "symlink", e)
            }
            Err(e) => Err(CacheError::io("symlink", dest, e)),
        }
    }

    // Another publisher may have linked the same blob between our check
    // and the link call. A destination linked to an earlier inode of the
    // same blob still counts once its bytes hash to `id`; a duplicate
    // finalize replaces the stored inode.
    fn occupied(
        &self,
        id: &ContentHash,
        src: &Path,
        dest: &Path,
        op: &'static str,
        err: io::Error,
    ) -> Result<PublishMethod, CacheError> {
        if same_file(src, dest) || hash_file(dest).is_ok_and(|found| found == *id) {
            tracing::debug!(blob = %id, dest = %dest.display(), "destination already holds blob");
            Ok(PublishMethod::AlreadyPresent)
        } else {
            Err(CacheError::io(op, dest, err))
        }
    }
}

fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut hasher = ContentHasher::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finish())
}

/// An in-progress blob: a temp file plus the hash of everything written
/// to it.
///
/// Dropping a writer without finalizing it removes the temp file.
#[derive(Debug)]
pub struct BlobWriter {
    temp: NamedTempFile,
    hasher: ContentHasher,
}

impl BlobWriter {
    /// Path of the temp file.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Number of bytes hashed so far.
    pub fn bytes_written(&self) -> u64 {
        self.hasher.len()
    }

    /// Appends `data` to the blob.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), CacheError> {
        self.write_all(data)
            .map_err(|e| CacheError::io("write", self.temp.path(), e))?;
        tracing::trace!(bytes = data.len(), total = self.hasher.len(), "blob write");
        Ok(())
    }

    /// Recomputes the hash from the temp file's current contents.
    ///
    /// Used after an external producer has written the file by path, so
    /// the bytes never passed through [`write_bytes`](Self::write_bytes).
    pub fn rehash_from_disk(&mut self) -> Result<(), CacheError> {
        let path = self.temp.path();
        let mut file = File::open(path).map_err(|e| CacheError::io("open", path, e))?;
        let mut hasher = ContentHasher::new();
        io::copy(&mut file, &mut hasher).map_err(|e| CacheError::io("read", path, e))?;
        self.hasher = hasher;
        Ok(())
    }

    /// Removes the temp file, reporting any failure to do so.
    pub fn discard(self) -> Result<(), CacheError> {
        let path = self.temp.path().to_path_buf();
        self.temp
            .close()
            .map_err(|e| CacheError::io("remove", path, e))
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.temp.write(buf)?;
        // Hash exactly what the file accepted.
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}
