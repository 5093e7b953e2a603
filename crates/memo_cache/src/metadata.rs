//! Durable key to record mapping.
//!
//! Each record lives in its own file, `<dir>/<fingerprint hex>`, framed as
//! a 4-byte little-endian header length, a bincode header (magic bytes,
//! format version, payload checksum), then the encoded record. Saves go
//! through a temp file in the same directory followed by a rename, so a
//! reader sees either the old record, the new one, or none at all.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memo_common::Fingerprint;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::CacheError;
use crate::fs::ensure_dir;
use crate::record::Record;
use crate::registry::KindRegistry;

/// Magic bytes identifying a memo record file.
const RECORD_MAGIC: [u8; 4] = *b"MEMO";

/// Current record format version. Increment on breaking changes to
/// the header or payload format.
const RECORD_FORMAT_VERSION: u32 = 1;

/// Header prepended to every record file for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    /// Magic bytes: must be `b"MEMO"`.
    magic: [u8; 4],

    /// Record format version.
    format_version: u32,

    /// XXH3-128 of the payload bytes.
    checksum: u128,
}

/// Store of one serialized [`Record`] per fingerprint.
#[derive(Debug)]
pub struct MetadataStore {
    dir: PathBuf,
    temp_prefix: String,
    dir_mode: u32,
    registry: Arc<KindRegistry>,
}

impl MetadataStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        temp_prefix: &str,
        dir_mode: u32,
        registry: Arc<KindRegistry>,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        ensure_dir(&dir, dir_mode)?;
        Ok(Self {
            dir,
            temp_prefix: temp_prefix.to_string(),
            dir_mode,
            registry,
        })
    }

    /// The directory holding record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The kind registry used to encode and decode records.
    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    /// Returns the file path for the record of `fp`.
    pub fn record_path(&self, fp: &Fingerprint) -> PathBuf {
        self.dir.join(fp.to_hex())
    }

    /// Loads the record for `fp`.
    ///
    /// A missing file is a cache miss and returns `Ok(None)`. Any other
    /// failure, including a corrupt or foreign file, is an error.
    pub fn load(&self, fp: &Fingerprint) -> Result<Option<Record>, CacheError> {
        let path = self.record_path(fp);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io("open", path, e)),
        };
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(|e| CacheError::io("read", &path, e))?;

        let payload = unframe(&path, &raw)?;
        let record = Record::decode(payload, &self.registry).map_err(|e| e.with_fingerprint(*fp))?;
        tracing::debug!(fingerprint = %fp, fields = record.len(), "loaded record");
        Ok(Some(record))
    }

    /// Writes the record for `fp` to a temp file without publishing it.
    ///
    /// Nothing is visible to [`load`](Self::load) until
    /// [`StagedRecord::commit`] runs. Dropping the stage removes the temp
    /// file.
    pub fn stage(&self, fp: &Fingerprint, record: &Record) -> Result<StagedRecord, CacheError> {
        let payload = record
            .encode(&self.registry)
            .map_err(|e| e.with_fingerprint(*fp))?;
        let framed = frame(&payload)?;

        // Recreated on every stage in case the directory was removed underneath us.
        ensure_dir(&self.dir, self.dir_mode)?;
        let mut temp = tempfile::Builder::new()
            .prefix(&self.temp_prefix)
            .tempfile_in(&self.dir)
            .map_err(|e| CacheError::io("create_temp", &self.dir, e))?;
        temp.write_all(&framed)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| CacheError::io("write", temp.path(), e))?;

        Ok(StagedRecord {
            temp,
            target: self.record_path(fp),
            fingerprint: *fp,
        })
    }

    /// Saves the record for `fp`, replacing any existing record.
    pub fn save(&self, fp: &Fingerprint, record: &Record) -> Result<(), CacheError> {
        self.stage(fp, record)?.commit()
    }
}

/// A fully written record waiting to be published.
#[derive(Debug)]
pub struct StagedRecord {
    temp: NamedTempFile,
    target: PathBuf,
    fingerprint: Fingerprint,
}

impl StagedRecord {
    /// Path of the temp file holding the staged bytes.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Path the record will occupy once committed.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically renames the staged file into place.
    pub fn commit(self) -> Result<(), CacheError> {
        let Self {
            temp,
            target,
            fingerprint,
        } = self;
        temp.persist(&target)
            .map_err(|e| CacheError::io("rename", &target, e.error))?;
        tracing::debug!(fingerprint = %fingerprint, "saved record");
        Ok(())
    }
}

fn frame(payload: &[u8]) -> Result<Vec<u8>, CacheError> {
    let header = RecordHeader {
        magic: RECORD_MAGIC,
        format_version: RECORD_FORMAT_VERSION,
        checksum: xxhash_rust::xxh3::xxh3_128(payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::serialization(e.to_string()))?;

    // 4-byte header length (little-endian) + header + payload
    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(payload);
    Ok(output)
}

fn unframe<'a>(path: &Path, raw: &'a [u8]) -> Result<&'a [u8], CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let len_bytes: [u8; 4] = raw
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| invalid("file shorter than header length prefix"))?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_bytes = raw
        .get(4..4 + header_len)
        .ok_or_else(|| invalid("truncated header"))?;

    let (header, _): (RecordHeader, usize) =
        bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != RECORD_MAGIC {
        return Err(invalid("bad magic bytes"));
    }
    if header.format_version != RECORD_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: RECORD_FORMAT_VERSION,
            actual: header.format_version,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = xxhash_rust::xxh3::xxh3_128(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: format!("{:032x}", header.checksum),
            actual: format!("{actual:032x}"),
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use memo_common::ContentHash;

    fn make_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(
            dir.path().join("metadata"),
            "memo-cache-",
            0o700,
            Arc::new(KindRegistry::empty()),
        )
        .unwrap();
        (dir, store)
    }

    fn fp(name: &str) -> Fingerprint {
        Fingerprint::new(ContentHash::from_bytes(name.as_bytes()))
    }

    fn sample() -> Record {
        let mut record = Record::new();
        record.insert("name", Value::from("pkg")).unwrap();
        record
    }

    fn temp_files(store: &MetadataStore) -> Vec<PathBuf> {
        std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("memo-cache-"))
            })
            .collect()
    }

    #[test]
    fn save_and_load_roundtrip() {
        let (_dir, store) = make_store();
        store.save(&fp("a"), &sample()).unwrap();
        let loaded = store.load(&fp("a")).unwrap().unwrap();
        assert_eq!(loaded.get("name"), Some(&Value::from("pkg")));
        assert!(temp_files(&store).is_empty());
    }

    #[test]
    fn load_missing_returns_none() {
        let (_dir, store) = make_store();
        assert!(store.load(&fp("nope")).unwrap().is_none());
    }

    #[test]
    fn record_path_is_hex_fingerprint() {
        let (_dir, store) = make_store();
        let path = store.record_path(&fp("a"));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), fp("a").to_hex());
        assert!(path.starts_with(store.dir()));
    }

    #[test]
    fn save_overwrites_existing() {
        let (_dir, store) = make_store();
        store.save(&fp("a"), &sample()).unwrap();
        let mut newer = Record::new();
        newer.insert("name", Value::from("renamed")).unwrap();
        store.save(&fp("a"), &newer).unwrap();
        let loaded = store.load(&fp("a")).unwrap().unwrap();
        assert_eq!(loaded.get("name"), Some(&Value::from("renamed")));
    }

    #[test]
    fn staged_record_is_invisible_until_commit() {
        let (_dir, store) = make_store();
        let staged = store.stage(&fp("a"), &sample()).unwrap();
        assert!(staged.temp_path().exists());
        assert!(!staged.target().exists());
        assert!(store.load(&fp("a")).unwrap().is_none());

        staged.commit().unwrap();
        assert!(store.load(&fp("a")).unwrap().is_some());
    }

    #[test]
    fn abandoned_stage_leaves_nothing() {
        let (_dir, store) = make_store();
        let staged = store.stage(&fp("a"), &sample()).unwrap();
        let temp = staged.temp_path().to_path_buf();
        drop(staged);
        assert!(!temp.exists());
        assert!(store.load(&fp("a")).unwrap().is_none());
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_miss() {
        let (_dir, store) = make_store();
        std::fs::write(store.record_path(&fp("a")), b"garbage data").unwrap();
        let err = store.load(&fp("a")).unwrap_err();
        assert!(matches!(err, CacheError::InvalidHeader { .. }));
    }

    #[test]
    fn truncated_prefix_is_invalid() {
        let (_dir, store) = make_store();
        std::fs::write(store.record_path(&fp("a")), b"AB").unwrap();
        assert!(matches!(
            store.load(&fp("a")).unwrap_err(),
            CacheError::InvalidHeader { .. }
        ));
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let (_dir, store) = make_store();
        store.save(&fp("a"), &sample()).unwrap();
        let path = store.record_path(&fp("a"));
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();
        assert!(matches!(
            store.load(&fp("a")).unwrap_err(),
            CacheError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let (_dir, store) = make_store();
        let payload = sample().encode(&KindRegistry::empty()).unwrap();
        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: 999,
            checksum: xxhash_rust::xxh3::xxh3_128(&payload),
        };
        let header_bytes =
            bincode::serde::encode_to_vec(&header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);
        std::fs::write(store.record_path(&fp("a")), output).unwrap();
        assert!(matches!(
            store.load(&fp("a")).unwrap_err(),
            CacheError::VersionMismatch { actual: 999, .. }
        ));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let payload = b"payload";
        let header = RecordHeader {
            magic: *b"BAAD",
            format_version: RECORD_FORMAT_VERSION,
            checksum: xxhash_rust::xxh3::xxh3_128(payload),
        };
        let header_bytes =
            bincode::serde::encode_to_vec(&header, bincode::config::standard()).unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        raw.extend_from_slice(&header_bytes);
        raw.extend_from_slice(payload);
        let err = unframe(Path::new("m"), &raw).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn decode_error_names_fingerprint() {
        let (_dir, store) = make_store();
        let framed = frame(b"\xff\xff").unwrap();
        std::fs::write(store.record_path(&fp("a")), framed).unwrap();
        let err = store.load(&fp("a")).unwrap_err();
        assert!(err.to_string().contains(&fp("a").to_hex()));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_record_is_an_error() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = make_store();
        store.save(&fp("a"), &sample()).unwrap();
        let path = store.record_path(&fp("a"));
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Root ignores permission bits; nothing to observe in that case.
        if File::open(&path).is_ok() {
            return;
        }
        let err = store.load(&fp("a")).unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::PermissionDenied));
    }
}
