use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{json_kind, TypeError};
use crate::key::{RecordKey, TypeTag};
use crate::record::{FieldMap, Record};

/// A typed view of one record type.
///
/// Entities convert to and from [`Record`]s through serde: the serialized
/// form must be a JSON object, and the primary key is taken from
/// [`Entity::primary_key`] rather than from any particular field.
///
/// ```rust
/// use keel_types::{Entity, RecordKey};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Session {
///     id: String,
///     expired: bool,
/// }
///
/// impl Entity for Session {
///     const TYPE: &'static str = "Session";
///
///     fn primary_key(&self) -> RecordKey {
///         RecordKey::from(self.id.as_str())
///     }
/// }
///
/// let record = Session { id: "s1".into(), expired: false }.to_record().unwrap();
/// assert_eq!(record.type_tag.as_str(), "Session");
/// ```
pub trait Entity: Serialize + DeserializeOwned {
    /// Type name under which records of this entity are stored. Must not be
    /// empty.
    const TYPE: &'static str;

    /// Primary key of this instance.
    fn primary_key(&self) -> RecordKey;

    /// The type tag for [`Self::TYPE`].
    fn type_tag() -> TypeTag {
        debug_assert!(!Self::TYPE.trim().is_empty(), "Entity::TYPE must not be empty");
        TypeTag::from_static(Self::TYPE)
    }

    /// Serialize into a record.
    fn to_record(&self) -> Result<Record, TypeError> {
        let value = serde_json::to_value(self).map_err(|e| TypeError::Decode {
            type_tag: Self::TYPE.to_string(),
            message: e.to_string(),
        })?;
        match value {
            Value::Object(fields) => Ok(Record::new(Self::type_tag(), self.primary_key(), fields)),
            other => Err(TypeError::NotAnObject(json_kind(&other).into())),
        }
    }

    /// Decode a record, rejecting records of any other type.
    fn from_record(record: &Record) -> Result<Self, TypeError> {
        if record.type_tag.as_str() != Self::TYPE {
            return Err(TypeError::TypeMismatch {
                expected: Self::TYPE.to_string(),
                found: record.type_tag.to_string(),
            });
        }
        Self::from_fields(record.fields.clone())
    }

    /// Decode a bare field map.
    fn from_fields(fields: FieldMap) -> Result<Self, TypeError> {
        serde_json::from_value(Value::Object(fields)).map_err(|e| TypeError::Decode {
            type_tag: Self::TYPE.to_string(),
            message: e.to_string(),
        })
    }
}
