use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{json_kind, TypeError};

/// Primary key of a record, unique within its type.
///
/// Keys are integers or strings. Integer keys sort before string keys, which
/// gives scans a stable order across mixed-key types.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Str(String),
}

impl RecordKey {
    /// Interpret a JSON value as a primary key.
    ///
    /// Integers that fit in `i64` and strings are accepted. Everything else,
    /// including fractional numbers and `null`, is rejected.
    pub fn from_value(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| TypeError::InvalidKey(format!("{n} is not an i64"))),
            Value::String(s) => Ok(Self::Str(s.clone())),
            other => Err(TypeError::InvalidKey(format!(
                "{} cannot be a primary key",
                json_kind(other)
            ))),
        }
    }

    /// The key as a JSON value, suitable for writing back into a field map.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RecordKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Name of a record type.
///
/// Together with a [`RecordKey`] it forms a record's identity. Type tags are
/// never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeTag(String);

impl TypeTag {
    /// Create a type tag, rejecting empty or whitespace-only names.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(TypeError::EmptyTypeTag);
        }
        Ok(Self(name))
    }

    /// Tag for a compile-time type name. Used by `Entity::type_tag`, whose
    /// implementors guarantee a non-empty name.
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    /// The type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TypeTag {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TypeTag> for String {
    fn from(tag: TypeTag) -> Self {
        tag.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
