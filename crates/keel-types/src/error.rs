use thiserror::Error;

/// Errors produced by record and entity conversions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// The caller asked for one record type but the data belongs to another.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A JSON object was required.
    #[error("expected a JSON object, found {0}")]
    NotAnObject(String),

    /// A JSON array was required.
    #[error("expected a JSON array, found {0}")]
    NotAnArray(String),

    /// The value cannot be used as a primary key.
    #[error("invalid primary key: {0}")]
    InvalidKey(String),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(String),

    /// Type names must be non-empty.
    #[error("type tag must not be empty")]
    EmptyTypeTag,

    /// The stored fields could not be decoded into the requested entity.
    #[error("cannot decode {type_tag}: {message}")]
    Decode { type_tag: String, message: String },
}

/// Failure of a record constructor at the import boundary.
///
/// The category distinguishes malformed input (`parse`) from anything else
/// the constructor reported (`unknown`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConstructError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

impl ConstructError {
    /// Short category label used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Other(_) => "unknown",
        }
    }
}

impl From<TypeError> for ConstructError {
    fn from(err: TypeError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ConstructError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Describe the JSON kind of a value for error messages.
pub fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_error_categories() {
        assert_eq!(ConstructError::Parse("x".into()).category(), "parse");
        assert_eq!(ConstructError::Other("x".into()).category(), "unknown");
    }

    #[test]
    fn type_error_converts_to_parse_category() {
        let err: ConstructError = TypeError::MissingField("id".into()).into();
        assert_eq!(err.category(), "parse");
        assert!(err.to_string().contains("missing field `id`"));
    }

    #[test]
    fn json_kind_names() {
        assert_eq!(json_kind(&serde_json::json!(null)), "null");
        assert_eq!(json_kind(&serde_json::json!([1])), "array");
        assert_eq!(json_kind(&serde_json::json!({"a": 1})), "object");
    }
}
