//! The metadata record stored for each cache key, and its wire encoding.
//!
//! On disk a record is a flat node table plus the top-level fields. While
//! encoding, every [`SharedValue`] is looked up by address in an identity
//! table: the first visit appends it to the node table, later visits (and
//! [`BackRef`]s) encode only its index. Decoding allocates every node before
//! filling any of them, so forward and backward references both resolve and
//! a node shared by several fields comes back as one node.

use std::collections::{BTreeMap, HashMap};

use memo_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::registry::KindRegistry;
use crate::value::{KindValue, SharedValue, Value};

/// Prefix that marks a field name as reserved for the cache itself.
pub const RESERVED_PREFIX: char = '_';

/// Fields the cache writes into every record on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedField {
    /// Content hash of the entry's published blob.
    Data,
}

impl ReservedField {
    /// The field's name in the record.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Data => "_DATA_",
        }
    }

    /// Returns `true` for any name in the reserved namespace, whether or
    /// not a reserved field with that name exists today.
    pub fn is_reserved(name: &str) -> bool {
        name.starts_with(RESERVED_PREFIX)
    }
}

/// Field name to value mapping for one cache key.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: BTreeMap<String, Value>,
    // Nodes materialized by decode. Holding them keeps a node reachable
    // only through back-references alive for the life of the record.
    anchors: Vec<SharedValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Returns the field's value, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a caller field, returning the previous value.
    ///
    /// Names in the reserved namespace are rejected and leave the record
    /// unchanged.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<Option<Value>, CacheError> {
        if ReservedField::is_reserved(name) {
            return Err(CacheError::ReservedField {
                name: name.to_string(),
            });
        }
        Ok(self.fields.insert(name.to_string(), value))
    }

    pub(crate) fn set_reserved(&mut self, field: ReservedField, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }

    /// Content hash of the published blob recorded in the `_DATA_` field.
    pub fn content_hash(&self) -> Result<Option<ContentHash>, CacheError> {
        match self.fields.get(ReservedField::Data.name()) {
            None => Ok(None),
            Some(Value::Text(hex)) => hex.parse().map(Some).map_err(|e| {
                CacheError::serialization(format!("record holds a bad content hash: {e}"))
            }),
            Some(other) => Err(CacheError::serialization(format!(
                "record content hash is a {}, not text",
                other.type_name()
            ))),
        }
    }

    /// Field names in sorted order, reserved fields included.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields, reserved fields included.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encodes the record, checking every kind value against `registry`.
    pub fn encode(&self, registry: &KindRegistry) -> Result<Vec<u8>, CacheError> {
        let mut encoder = Encoder {
            registry,
            ids: HashMap::new(),
            nodes: Vec::new(),
        };
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            fields.push((name.clone(), encoder.value(value)?));
        }
        let wire = WireRecord {
            fields,
            nodes: encoder.nodes,
        };
        bincode::serde::encode_to_vec(&wire, bincode::config::standard())
            .map_err(|e| CacheError::serialization(e.to_string()))
    }

    /// Decodes a record produced by [`Record::encode`].
    pub fn decode(bytes: &[u8], registry: &KindRegistry) -> Result<Self, CacheError> {
        let (wire, _): (WireRecord, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| CacheError::serialization(e.to_string()))?;

        let nodes: Vec<SharedValue> = (0..wire.nodes.len())
            .map(|_| SharedValue::new(Value::Unit))
            .collect();
        let decoder = Decoder {
            registry,
            nodes: &nodes,
        };
        for (node, body) in nodes.iter().zip(wire.nodes) {
            node.set(decoder.value(body)?);
        }
        let mut fields = BTreeMap::new();
        for (name, body) in wire.fields {
            fields.insert(name, decoder.value(body)?);
        }
        Ok(Self {
            fields,
            anchors: nodes,
        })
    }
}

#[derive(Serialize, Deserialize)]
enum WireValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Map(Vec<(String, WireValue)>),
    Kind(KindValue),
    Shared(u32),
    Back(u32),
}

#[derive(Serialize, Deserialize)]
struct WireRecord {
    fields: Vec<(String, WireValue)>,
    nodes: Vec<WireValue>,
}

struct Encoder<'r> {
    registry: &'r KindRegistry,
    ids: HashMap<usize, u32>,
    nodes: Vec<WireValue>,
}

impl Encoder<'_> {
    fn value(&mut self, value: &Value) -> Result<WireValue, CacheError> {
        Ok(match value {
            Value::Unit => WireValue::Unit,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Int(i) => WireValue::Int(*i),
            Value::Float(f) => WireValue::Float(*f),
            Value::Text(s) => WireValue::Text(s.clone()),
            Value::Bytes(b) => WireValue::Bytes(b.clone()),
            Value::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.value(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => WireValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.value(v)?)))
                    .collect::<Result<_, CacheError>>()?,
            ),
            Value::Kind(kind) => {
                self.registry.validate(kind)?;
                WireValue::Kind(kind.clone())
            }
            Value::Shared(node) => WireValue::Shared(self.node(node)?),
            // A dangling back-reference has nothing left to point at.
            Value::Back(back) => match back.upgrade() {
                Some(node) => WireValue::Back(self.node(&node)?),
                None => WireValue::Unit,
            },
        })
    }

    fn node(&mut self, node: &SharedValue) -> Result<u32, CacheError> {
        if let Some(&index) = self.ids.get(&node.id()) {
            return Ok(index);
        }
        let index = u32::try_from(self.nodes.len())
            .map_err(|_| CacheError::serialization("too many shared nodes in record"))?;
        // Registered before recursing so a cycle back to this node stops here.
        self.ids.insert(node.id(), index);
        self.nodes.push(WireValue::Unit);
        let body = {
            let guard = node.read();
            self.value(&guard)?
        };
        self.nodes[index as usize] = body;
        Ok(index)
    }
}

struct Decoder<'a> {
    registry: &'a KindRegistry,
    nodes: &'a [SharedValue],
}

impl Decoder<'_> {
    fn value(&self, wire: WireValue) -> Result<Value, CacheError> {
        Ok(match wire {
            WireValue::Unit => Value::Unit,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Int(i),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Text(s) => Value::Text(s),
            WireValue::Bytes(b) => Value::Bytes(b),
            WireValue::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.value(item))
                    .collect::<Result<_, _>>()?,
            ),
            WireValue::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, self.value(v)?)))
                    .collect::<Result<_, CacheError>>()?,
            ),
            WireValue::Kind(kind) => {
                self.registry.validate(&kind)?;
                Value::Kind(kind)
            }
            WireValue::Shared(index) => Value::Shared(self.node(index)?.clone()),
            WireValue::Back(index) => Value::Back(self.node(index)?.downgrade()),
        })
    }

    fn node(&self, index: u32) -> Result<&SharedValue, CacheError> {
        self.nodes.get(index as usize).ok_or_else(|| {
            CacheError::serialization(format!(
                "node index {index} out of range ({} nodes)",
                self.nodes.len()
            ))
        })
    }
}
