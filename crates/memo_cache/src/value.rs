//! Structured values stored in a cache record.
//!
//! Values form graphs, not just trees. A [`SharedValue`] is a node that may
//! be referenced from several places, and a [`BackRef`] is a weak pointer to
//! such a node, used for parent links that would otherwise form a strong
//! cycle. Identity is preserved through storage: two references to the same
//! node are still one node after a reload.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, Weak};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::registry::RecordKind;

/// A record field value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No value.
    #[default]
    Unit,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A UTF-8 string.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// An ordered list.
    List(Vec<Value>),
    /// A string-keyed map with deterministic iteration order.
    Map(BTreeMap<String, Value>),
    /// An instance of a caller-registered kind.
    Kind(KindValue),
    /// A strong reference to a shared node.
    Shared(SharedValue),
    /// A weak reference to a shared node.
    Back(BackRef),
}

impl Value {
    /// Returns the boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string, if this is a `Text`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the items, if this is a `List`.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map, if this is a `Map`.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the shared node, if this is a `Shared`.
    pub fn as_shared(&self) -> Option<&SharedValue> {
        match self {
            Self::Shared(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` if this is `Unit`.
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Kind(_) => "kind",
            Self::Shared(_) => "shared",
            Self::Back(_) => "back",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Self::Map(m)
    }
}

impl From<KindValue> for Value {
    fn from(k: KindValue) -> Self {
        Self::Kind(k)
    }
}

impl From<SharedValue> for Value {
    fn from(s: SharedValue) -> Self {
        Self::Shared(s)
    }
}

impl From<BackRef> for Value {
    fn from(b: BackRef) -> Self {
        Self::Back(b)
    }
}

/// An encoded instance of a registered kind.
///
/// The payload is the bincode encoding of the concrete type. The kind name
/// and version travel with it so decoding can be checked against the
/// registry before the payload is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindValue {
    /// Registered kind name.
    pub kind: String,
    /// Version of the kind that produced the payload.
    pub version: u32,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

impl KindValue {
    /// Encodes a value of a registered kind.
    pub fn encode<T: RecordKind>(value: &T) -> Result<Self, CacheError> {
        let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| {
                CacheError::serialization(format!("failed to encode kind '{}': {e}", T::KIND))
            })?;
        Ok(Self {
            kind: T::KIND.to_string(),
            version: T::VERSION,
            payload,
        })
    }

    /// Decodes the payload as `T`, checking the kind name and version.
    pub fn decode<T: RecordKind>(&self) -> Result<T, CacheError> {
        if self.kind != T::KIND {
            return Err(CacheError::serialization(format!(
                "value holds kind '{}', not '{}'",
                self.kind,
                T::KIND
            )));
        }
        if self.version != T::VERSION {
            return Err(CacheError::KindVersionMismatch {
                kind: self.kind.clone(),
                expected: T::VERSION,
                actual: self.version,
            });
        }
        let (value, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| {
                    CacheError::serialization(format!(
                        "failed to decode kind '{}': {e}",
                        self.kind
                    ))
                })?;
        Ok(value)
    }
}

/// A node that may be referenced from several places in a record.
///
/// Cloning a `SharedValue` clones the reference, not the node. Equality is
/// node identity.
#[derive(Clone)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl SharedValue {
    /// Creates a new node holding `value`.
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Locks the node for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the node's current value.
    pub fn get(&self) -> Value {
        self.read().clone()
    }

    /// Replaces the node's value.
    pub fn set(&self, value: Value) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Returns a weak reference to this node.
    pub fn downgrade(&self) -> BackRef {
        BackRef(Arc::downgrade(&self.0))
    }

    /// Returns `true` if both references point to the same node.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the node, used as its identity during encoding.
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:#x})", self.id())
    }
}

/// A weak reference to a [`SharedValue`] node.
#[derive(Clone)]
pub struct BackRef(Weak<RwLock<Value>>);

impl BackRef {
    /// Returns the node if it is still alive.
    pub fn upgrade(&self) -> Option<SharedValue> {
        self.0.upgrade().map(SharedValue)
    }

    /// Returns `true` if this reference points at `node`.
    pub fn points_to(&self, node: &SharedValue) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&node.0))
    }
}

impl PartialEq for BackRef {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackRef({:#x})", self.0.as_ptr() as *const () as usize)
    }
}
