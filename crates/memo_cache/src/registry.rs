//! Registry of caller-defined value kinds.
//!
//! Records may hold instances of concrete caller types (a parsed file
//! summary, a symbol table entry). The stored bytes do not describe their
//! own type, so every such type is registered up front under a stable kind
//! name and version. The registry is built once at startup, then shared
//! read-only by every store that encodes or decodes records.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::value::KindValue;

/// A concrete type that can be stored in a record as a [`KindValue`].
pub trait RecordKind: Serialize + DeserializeOwned + 'static {
    /// Stable kind name written alongside every encoded value.
    const KIND: &'static str;

    /// Encoding version. Bump when the serialized shape changes so stale
    /// records fail loudly instead of decoding into the wrong fields.
    const VERSION: u32 = 1;
}

#[derive(Clone, Copy)]
struct KindInfo {
    version: u32,
    check: fn(&[u8]) -> Result<(), String>,
}

fn check_payload<T: RecordKind>(payload: &[u8]) -> Result<(), String> {
    bincode::serde::decode_from_slice::<T, _>(payload, bincode::config::standard())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Immutable set of registered kinds.
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<&'static str, KindInfo>,
}

impl KindRegistry {
    /// Starts building a registry.
    pub fn builder() -> KindRegistryBuilder {
        KindRegistryBuilder::default()
    }

    /// A registry with no caller kinds. Records built only from the
    /// structural [`Value`](crate::Value) variants need nothing more.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns `true` if `kind` is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Returns the registered version of `kind`.
    pub fn version(&self, kind: &str) -> Option<u32> {
        self.kinds.get(kind).map(|info| info.version)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Returns `true` if no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Checks that `value` names a registered kind at the registered
    /// version and that its payload decodes as that kind.
    pub fn validate(&self, value: &KindValue) -> Result<(), CacheError> {
        let info = self
            .kinds
            .get(value.kind.as_str())
            .ok_or_else(|| CacheError::UnknownKind {
                kind: value.kind.clone(),
                fingerprint: None,
            })?;
        if info.version != value.version {
            return Err(CacheError::KindVersionMismatch {
                kind: value.kind.clone(),
                expected: info.version,
                actual: value.version,
            });
        }
        (info.check)(&value.payload).map_err(|reason| {
            CacheError::serialization(format!("malformed '{}' payload: {reason}", value.kind))
        })
    }
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.kinds.iter().map(|(k, info)| (k, info.version)))
            .finish()
    }
}

/// Collects kind registrations before freezing them into a [`KindRegistry`].
#[derive(Default)]
pub struct KindRegistryBuilder {
    kinds: BTreeMap<&'static str, KindInfo>,
    duplicates: Vec<&'static str>,
}

impl KindRegistryBuilder {
    /// Registers `T` under `T::KIND`.
    pub fn register<T: RecordKind>(mut self) -> Self {
        let info = KindInfo {
            version: T::VERSION,
            check: check_payload::<T>,
        };
        if self.kinds.insert(T::KIND, info).is_some() {
            self.duplicates.push(T::KIND);
        }
        self
    }

    /// Freezes the registrations. Registering one kind name twice is an
    /// error even when both registrations agree.
    pub fn build(self) -> Result<KindRegistry, CacheError> {
        if let Some(kind) = self.duplicates.first() {
            return Err(CacheError::DuplicateKind {
                kind: kind.to_string(),
            });
        }
        Ok(KindRegistry { kinds: self.kinds })
    }
}
