use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;
use crate::error::TypeError;
use crate::key::{RecordKey, TypeTag};

/// Attribute fields of a record, keyed by field name.
pub type FieldMap = serde_json::Map<String, Value>;

/// Identity of a record: its type plus its primary key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub type_tag: TypeTag,
    pub key: RecordKey,
}

impl RecordId {
    pub fn new(type_tag: TypeTag, key: RecordKey) -> Self {
        Self { type_tag, key }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_tag, self.key)
    }
}

/// A typed, keyed unit of stored data.
///
/// The store never interprets `fields`; only the type tag and the key take
/// part in identity. The key is held separately from the fields so that
/// lookups never have to re-parse the field map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_tag: TypeTag,
    pub key: RecordKey,
    pub fields: FieldMap,
}

impl Record {
    /// Create a record from its parts.
    pub fn new(type_tag: TypeTag, key: RecordKey, fields: FieldMap) -> Self {
        Self {
            type_tag,
            key,
            fields,
        }
    }

    /// Build a record whose primary key is read from `key_field`.
    pub fn from_fields(
        type_tag: TypeTag,
        key_field: &str,
        fields: FieldMap,
    ) -> Result<Self, TypeError> {
        let key = fields
            .get(key_field)
            .ok_or_else(|| TypeError::MissingField(key_field.to_string()))
            .and_then(RecordKey::from_value)?;
        Ok(Self::new(type_tag, key, fields))
    }

    /// Build a record from an arbitrary JSON value, which must be an object.
    pub fn from_value(type_tag: TypeTag, key_field: &str, value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(fields) => Self::from_fields(type_tag, key_field, fields),
            other => Err(TypeError::NotAnObject(crate::error::json_kind(&other).into())),
        }
    }

    /// The record's identity.
    pub fn id(&self) -> RecordId {
        RecordId::new(self.type_tag.clone(), self.key.clone())
    }

    /// Look up a single field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field, returning its previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field, returning its previous value.
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// The fields as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Decode into a typed entity.
    pub fn decode<E: Entity>(&self) -> Result<E, TypeError> {
        E::from_record(self)
    }
}
