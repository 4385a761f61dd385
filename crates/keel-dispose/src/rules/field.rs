use std::fmt;

use chrono::{DateTime, Utc};
use keel_types::{Record, TypeTag, Value};
use serde::{Deserialize, Serialize};

use crate::error::{DisposeError, DisposeResult};

// ---------------------------------------------------------------------------
// RuleCondition
// ---------------------------------------------------------------------------

/// Condition a field must meet for its record to be disposable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum RuleCondition {
    /// The field equals `value`.
    Equals { value: Value },
    /// The field is absent or null.
    Missing,
    /// The field holds an RFC 3339 timestamp earlier than now.
    Expired,
}

// ---------------------------------------------------------------------------
// FieldRule
// ---------------------------------------------------------------------------

/// A disposal predicate over one field of one record type.
///
/// In TOML:
///
/// ```toml
/// [[disposal]]
/// type_name = "Session"
/// field = "expired"
/// when = "equals"
/// value = true
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub type_name: String,
    pub field: String,
    #[serde(flatten)]
    pub condition: RuleCondition,
}

impl FieldRule {
    pub fn new(
        type_name: impl Into<String>,
        field: impl Into<String>,
        condition: RuleCondition,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            field: field.into(),
            condition,
        }
    }

    /// Check the rule is well formed and return the type it applies to.
    pub fn validate(&self) -> DisposeResult<TypeTag> {
        let type_tag = TypeTag::new(self.type_name.as_str())
            .map_err(|e| DisposeError::InvalidRule(format!("{self}: {e}")))?;
        if self.field.trim().is_empty() {
            return Err(DisposeError::InvalidRule(format!(
                "rule for '{}' has an empty field name",
                self.type_name
            )));
        }
        Ok(type_tag)
    }

    /// Evaluate the rule against `record` as of now.
    pub fn matches(&self, record: &Record) -> DisposeResult<bool> {
        self.matches_at(record, Utc::now())
    }

    /// Evaluate the rule against `record` as of `now`.
    pub fn matches_at(&self, record: &Record, now: DateTime<Utc>) -> DisposeResult<bool> {
        let value = record.field(&self.field);
        match &self.condition {
            RuleCondition::Equals { value: expected } => Ok(value == Some(expected)),
            RuleCondition::Missing => Ok(matches!(value, None | Some(Value::Null))),
            RuleCondition::Expired => match value {
                None | Some(Value::Null) => Ok(false),
                Some(Value::String(text)) => {
                    let at = DateTime::parse_from_rfc3339(text).map_err(|e| {
                        DisposeError::Predicate(format!(
                            "{}.{} is not an RFC 3339 timestamp: {e}",
                            record.id(),
                            self.field
                        ))
                    })?;
                    Ok(at.with_timezone(&Utc) < now)
                }
                Some(other) => Err(DisposeError::Predicate(format!(
                    "{}.{} is not a timestamp string: {other}",
                    record.id(),
                    self.field
                ))),
            },
        }
    }
}

impl fmt::Display for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.condition {
            RuleCondition::Equals { value } => {
                write!(f, "{}.{} == {value}", self.type_name, self.field)
            }
            RuleCondition::Missing => write!(f, "{}.{} is missing", self.type_name, self.field),
            RuleCondition::Expired => write!(f, "{}.{} is expired", self.type_name, self.field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use keel_types::{FieldMap, RecordKey};
    use serde_json::json;

    fn session(fields: Value) -> Record {
        let fields: FieldMap = match fields {
            Value::Object(map) => map,
            _ => panic!("fields must be an object"),
        };
        Record::new(TypeTag::new("Session").unwrap(), RecordKey::from("s1"), fields)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn equals_compares_json_values() {
        let rule = FieldRule::new("Session", "expired", RuleCondition::Equals { value: json!(true) });
        assert!(rule.matches(&session(json!({ "expired": true }))).unwrap());
        assert!(!rule.matches(&session(json!({ "expired": false }))).unwrap());
        assert!(!rule.matches(&session(json!({ "expired": "true" }))).unwrap());
        assert!(!rule.matches(&session(json!({}))).unwrap());
    }

    #[test]
    fn missing_matches_absent_and_null() {
        let rule = FieldRule::new("Session", "owner", RuleCondition::Missing);
        assert!(rule.matches(&session(json!({}))).unwrap());
        assert!(rule.matches(&session(json!({ "owner": null }))).unwrap());
        assert!(!rule.matches(&session(json!({ "owner": "ana" }))).unwrap());
    }

    #[test]
    fn expired_compares_timestamps() {
        let rule = FieldRule::new("Session", "expires_at", RuleCondition::Expired);
        let past = session(json!({ "expires_at": "2024-06-01T11:59:59Z" }));
        let future = session(json!({ "expires_at": "2024-06-01T14:00:00+01:00" }));
        let offset_past = session(json!({ "expires_at": "2024-06-01T12:30:00+01:00" }));
        assert!(rule.matches_at(&past, noon()).unwrap());
        assert!(!rule.matches_at(&future, noon()).unwrap());
        assert!(rule.matches_at(&offset_past, noon()).unwrap());
        assert!(!rule.matches_at(&session(json!({})), noon()).unwrap());
    }

    #[test]
    fn expired_rejects_non_timestamps() {
        let rule = FieldRule::new("Session", "expires_at", RuleCondition::Expired);
        let garbage = session(json!({ "expires_at": "tomorrow" }));
        let number = session(json!({ "expires_at": 17 }));
        assert!(matches!(rule.matches_at(&garbage, noon()), Err(DisposeError::Predicate(_))));
        assert!(matches!(rule.matches_at(&number, noon()), Err(DisposeError::Predicate(_))));
    }

    #[test]
    fn validate_rejects_blank_names() {
        assert!(FieldRule::new("", "f", RuleCondition::Missing).validate().is_err());
        assert!(FieldRule::new("Session", " ", RuleCondition::Missing).validate().is_err());
        assert_eq!(
            FieldRule::new("Session", "f", RuleCondition::Missing).validate().unwrap(),
            TypeTag::new("Session").unwrap()
        );
    }

    #[test]
    fn rules_parse_from_toml() {
        #[derive(Deserialize)]
        struct Rules {
            disposal: Vec<FieldRule>,
        }

        let rules: Rules = toml::from_str(
            r#"
            [[disposal]]
            type_name = "Session"
            field = "expired"
            when = "equals"
            value = true

            [[disposal]]
            type_name = "Token"
            field = "owner"
            when = "missing"
            "#,
        )
        .unwrap();

        assert_eq!(
            rules.disposal,
            vec![
                FieldRule::new("Session", "expired", RuleCondition::Equals { value: json!(true) }),
                FieldRule::new("Token", "owner", RuleCondition::Missing),
            ]
        );
    }

    #[test]
    fn display_reads_like_a_condition() {
        let rule = FieldRule::new("Session", "expired", RuleCondition::Equals { value: json!(true) });
        assert_eq!(rule.to_string(), "Session.expired == true");
        assert_eq!(
            FieldRule::new("Token", "owner", RuleCondition::Missing).to_string(),
            "Token.owner is missing"
        );
    }
}
