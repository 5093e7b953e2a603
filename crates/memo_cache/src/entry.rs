//! Per-key cache entry handles.

use std::path::Path;

use memo_common::{ContentHash, Fingerprint};

use crate::blob::{BlobStore, BlobWriter, PublishMethod};
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metadata::MetadataStore;
use crate::record::{Record, ReservedField};
use crate::registry::RecordKind;
use crate::value::{KindValue, Value};

static UNIT: Value = Value::Unit;

/// Lifecycle state of a [`CacheEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No record existed for the key.
    New,
    /// A record was loaded from a previous run.
    Loaded,
    /// Content has been written this session.
    Writing,
    /// Written content has been moved into the blob store.
    Finalized,
    /// The blob has been published and the record saved.
    Installed,
}

/// Handle for reading and producing the cached result of one key.
///
/// An entry borrows the stores of the [`Cache`](crate::Cache) that issued
/// it. Content written to the entry goes to a private temp file, opened on
/// the first write, until [`finalize`](Self::finalize) moves it into the blob
/// store. Dropping an entry before that discards the temp file.
#[derive(Debug)]
pub struct CacheEntry<'c> {
    key: CacheKey,
    fingerprint: Fingerprint,
    blobs: &'c BlobStore,
    metadata: &'c MetadataStore,
    record: Record,
    writer: Option<BlobWriter>,
    dirty: bool,
    state: EntryState,
    // New or Loaded; restored when written content is thrown away.
    origin: EntryState,
}

impl<'c> CacheEntry<'c> {
    pub(crate) fn new(
        key: CacheKey,
        fingerprint: Fingerprint,
        blobs: &'c BlobStore,
        metadata: &'c MetadataStore,
        loaded: Option<Record>,
    ) -> Self {
        let (record, state) = match loaded {
            Some(record) => (record, EntryState::Loaded),
            None => (Record::new(), EntryState::New),
        };
        Self {
            key,
            fingerprint,
            blobs,
            metadata,
            record,
            writer: None,
            dirty: false,
            state,
            origin: state,
        }
    }

    /// The key this entry was issued for.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The key's fingerprint.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// The entry's record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Returns `true` if the record has changes that are not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns `true` if every named field is present.
    ///
    /// Callers use this to decide whether the cached result is complete
    /// enough to skip the work entirely.
    pub fn has_field(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.record.contains(name))
    }

    /// Returns the field's value, or [`Value::Unit`] if it is absent.
    pub fn get_field(&self, name: &str) -> &Value {
        self.record.get(name).unwrap_or(&UNIT)
    }

    /// Returns the field's value, if present.
    pub fn lookup_field(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    /// Stores a field, replacing any previous value.
    ///
    /// Names starting with `_` are reserved for the cache and rejected.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), CacheError> {
        self.record.insert(name, value.into())?;
        self.dirty = true;
        Ok(())
    }

    /// Decodes a field holding a registered kind.
    ///
    /// Returns `Ok(None)` if the field is absent.
    pub fn get_as<T: RecordKind>(&self, name: &str) -> Result<Option<T>, CacheError> {
        match self.record.get(name) {
            None => Ok(None),
            Some(Value::Kind(kind)) => kind
                .decode::<T>()
                .map(Some)
                .map_err(|e| e.with_fingerprint(self.fingerprint)),
            Some(other) => Err(CacheError::Serialization {
                fingerprint: Some(self.fingerprint),
                reason: format!(
                    "field '{name}' holds a {}, not kind '{}'",
                    other.type_name(),
                    T::KIND
                ),
            }),
        }
    }

    /// Stores a value of a registered kind.
    ///
    /// The kind is checked against the registry now, so an unregistered
    /// type fails here rather than when the record is saved.
    pub fn set_as<T: RecordKind>(&mut self, name: &str, value: &T) -> Result<(), CacheError> {
        let kind = KindValue::encode(value)?;
        self.metadata
            .registry()
            .validate(&kind)
            .map_err(|e| e.with_fingerprint(self.fingerprint))?;
        self.set_field(name, kind)
    }

    /// Returns `true` if the record carries a content hash.
    pub fn has_data(&self) -> bool {
        self.record.contains(ReservedField::Data.name())
    }

    /// The content hash of the entry's blob, once finalized or loaded.
    pub fn content_hash(&self) -> Result<Option<ContentHash>, CacheError> {
        self.record
            .content_hash()
            .map_err(|e| e.with_fingerprint(self.fingerprint))
    }

    /// Appends bytes to the entry's content.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CacheError> {
        self.writer()?.write_bytes(data)?;
        self.state = EntryState::Writing;
        Ok(())
    }

    /// Produces the entry's content by path instead of by stream.
    ///
    /// `produce` receives the path of the entry's temp file and may fill it
    /// by any means, such as running an external tool. The file is then
    /// hashed from disk and the entry finalized.
    ///
    /// If `produce` fails, or the file cannot be read back, the temp file
    /// and anything already written to it are discarded. The entry can then
    /// be written afresh.
    pub fn write_via<F, E>(&mut self, produce: F) -> Result<ContentHash, CacheError>
    where
        F: FnOnce(&Path) -> Result<(), E>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let writer = self.writer()?;
        let produced = produce(writer.path())
            .map_err(|e| CacheError::Producer { source: e.into() })
            .and_then(|()| writer.rehash_from_disk());
        if let Err(e) = produced {
            self.abandon_writer();
            return Err(e);
        }
        self.state = EntryState::Writing;
        self.finalize()?
            .ok_or(CacheError::MissingContent {
                fingerprint: self.fingerprint,
            })
    }

    /// Same as [`finalize`](Self::finalize), discarding the hash.
    pub fn close(&mut self) -> Result<(), CacheError> {
        self.finalize().map(|_| ())
    }

    /// Moves written content into the blob store and records its hash.
    ///
    /// Does nothing if no content was written this session; the returned
    /// hash is then whatever the record already carried. Safe to call
    /// more than once.
    pub fn finalize(&mut self) -> Result<Option<ContentHash>, CacheError> {
        let Some(writer) = self.writer.take() else {
            return self.content_hash();
        };
        let id = self.blobs.finalize(writer)?;
        self.record
            .set_reserved(ReservedField::Data, Value::Text(id.to_hex()));
        self.dirty = true;
        self.state = EntryState::Finalized;
        tracing::debug!(fingerprint = %self.fingerprint, blob = %id, "finalized entry");
        Ok(Some(id))
    }

    /// Publishes the entry's blob at `dest` and saves the record if it
    /// changed.
    ///
    /// Finalizes first if needed. Installing an entry that has neither
    /// written content nor a loaded content hash is an error. Repeating an
    /// install to the same destination is a no-op.
    pub fn install(&mut self, dest: impl AsRef<Path>) -> Result<PublishMethod, CacheError> {
        self.install_inner(dest.as_ref())
            .map_err(|e| e.context("install"))
    }

    fn install_inner(&mut self, dest: &Path) -> Result<PublishMethod, CacheError> {
        let id = self.finalize()?.ok_or(CacheError::MissingContent {
            fingerprint: self.fingerprint,
        })?;
        let method = self.blobs.publish(&id, dest)?;
        self.persist()?;
        self.state = EntryState::Installed;
        Ok(method)
    }

    /// Saves the record without publishing any content.
    ///
    /// For results that are metadata only. Written content, if any, is
    /// finalized first so the record references it.
    pub fn save(&mut self) -> Result<(), CacheError> {
        self.finalize()
            .and_then(|_| self.persist())
            .map_err(|e| e.context("save"))
    }

    fn persist(&mut self) -> Result<(), CacheError> {
        if self.dirty {
            self.metadata.save(&self.fingerprint, &self.record)?;
            self.dirty = false;
        }
        Ok(())
    }

    fn sealed(&self) -> bool {
        match self.state {
            EntryState::Finalized | EntryState::Installed => true,
            EntryState::Loaded => self.has_data(),
            EntryState::New | EntryState::Writing => false,
        }
    }

    fn writer(&mut self) -> Result<&mut BlobWriter, CacheError> {
        if self.sealed() {
            return Err(CacheError::AlreadyFinalized {
                fingerprint: self.fingerprint,
            });
        }
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.blobs.open_writer()?,
        };
        Ok(self.writer.insert(writer))
    }

    fn abandon_writer(&mut self) {
        if let Some(writer) = self.writer.take() {
            tracing::debug!(fingerprint = %self.fingerprint, "discarding unfinalized content");
            if let Err(e) = writer.discard() {
                tracing::warn!(error = %e, "failed to remove entry temp file");
            }
        }
        self.state = self.origin;
    }
}

impl Drop for CacheEntry<'_> {
    fn drop(&mut self) {
        self.abandon_writer();
    }
}
