//! Row-level filter predicates and the OR-combinator
//!
//! A [`Predicate`] is the only thing the engine hands to the storage
//! collaborator: a boolean tree of attribute comparisons. Stores translate it
//! to their native query language; [`Predicate::matches`] evaluates it against
//! a JSON document for in-process stores.

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Boolean filter expression over record attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// `field == value`
    Eq { field: String, value: Value },

    /// `field ∈ values`
    In { field: String, values: Vec<Value> },

    /// Every sub-predicate holds
    And(Vec<Predicate>),

    /// At least one sub-predicate holds
    Or(Vec<Predicate>),

    /// Matches no record
    Nothing,
}

impl Predicate {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field ∈ values`
    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction of `self` and `other`, flattening nested ANDs
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Nothing, _) | (_, Self::Nothing) => Self::Nothing,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), right) => {
                left.push(right);
                Self::And(left)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }

    /// Build a predicate from a filter document such as `{"ownerId": "U1"}`
    ///
    /// Array values become `In`, several keys become an `And` in key order.
    pub fn from_document(document: &Value) -> std::result::Result<Self, String> {
        let Value::Object(map) = document else {
            return Err(format!("filter must be an object, got {}", type_name(document)));
        };

        if map.is_empty() {
            return Err("filter document is empty".to_string());
        }

        let mut terms: Vec<Predicate> = map
            .iter()
            .map(|(field, value)| match value {
                Value::Array(values) => Self::In {
                    field: field.clone(),
                    values: values.clone(),
                },
                other => Self::Eq {
                    field: field.clone(),
                    value: other.clone(),
                },
            })
            .collect();

        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(Self::And(terms))
        }
    }

    /// Check structural validity: no empty field names, no empty AND/OR
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Eq { field, .. } | Self::In { field, .. } if field.is_empty() => {
                Err("predicate has an empty field name".to_string())
            }
            Self::Eq { .. } | Self::In { .. } | Self::Nothing => Ok(()),
            Self::And(terms) if terms.is_empty() => Err("AND with no terms".to_string()),
            Self::Or(terms) if terms.is_empty() => Err("OR with no terms".to_string()),
            Self::And(terms) | Self::Or(terms) => terms.iter().try_for_each(Self::validate),
        }
    }

    /// Evaluate against a JSON record
    ///
    /// Dotted field names walk nested objects. An array attribute matches
    /// when any element equals the expected value.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Self::Eq { field, value } => lookup(record, field)
                .map(|actual| value_matches(actual, value))
                .unwrap_or(false),
            Self::In { field, values } => lookup(record, field)
                .map(|actual| values.iter().any(|v| value_matches(actual, v)))
                .unwrap_or(false),
            Self::And(terms) => terms.iter().all(|t| t.matches(record)),
            Self::Or(terms) => terms.iter().any(|t| t.matches(record)),
            Self::Nothing => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq { field, value } => write!(f, "{} = {}", field, value),
            Self::In { field, values } => {
                write!(f, "{} IN [", field)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Self::And(terms) => write_joined(f, terms, " AND "),
            Self::Or(terms) => write_joined(f, terms, " OR "),
            Self::Nothing => write!(f, "NOTHING"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Predicate], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", term)?;
    }
    write!(f, ")")
}

fn lookup<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

fn value_matches(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match actual {
        Value::Array(items) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// OR-combine partial-access predicates
///
/// Satisfying any one contributing filter is sufficient. A single predicate
/// is returned unwrapped; an empty list is invalid because the evaluator
/// turns "no filters" into a deny before ever calling this.
pub fn combine(mut predicates: Vec<Predicate>) -> Result<Predicate> {
    match predicates.len() {
        0 => Err(AuthzError::InvalidInput(
            "cannot combine an empty list of filters".to_string(),
        )),
        1 => Ok(predicates.remove(0)),
        _ => Ok(Predicate::Or(predicates)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_combine_single_is_unwrapped() {
        let p = Predicate::eq("ownerId", "U1");
        assert_eq!(combine(vec![p.clone()]).unwrap(), p);
    }

    #[test]
    fn test_combine_many_is_or() {
        let p1 = Predicate::eq("ownerId", "U1");
        let p2 = Predicate::eq("teamId", "T9");
        let combined = combine(vec![p1.clone(), p2.clone()]).unwrap();
        assert_eq!(combined, Predicate::Or(vec![p1, p2]));
    }

    #[test]
    fn test_combine_empty_is_invalid() {
        assert!(matches!(combine(vec![]), Err(AuthzError::InvalidInput(_))));
    }

    #[test]
    fn test_from_document() {
        let p = Predicate::from_document(&json!({"ownerId": "U1"})).unwrap();
        assert_eq!(p, Predicate::eq("ownerId", "U1"));

        let p = Predicate::from_document(&json!({"status": ["open", "draft"], "teamId": 4})).unwrap();
        assert_eq!(
            p,
            Predicate::And(vec![
                Predicate::is_in("status", ["open", "draft"]),
                Predicate::eq("teamId", 4),
            ])
        );

        assert!(Predicate::from_document(&json!("ownerId")).is_err());
        assert!(Predicate::from_document(&json!({})).is_err());
    }

    #[test]
    fn test_matches() {
        let record = json!({"ownerId": "U1", "tags": ["a", "b"], "meta": {"team": "T1"}});

        assert!(Predicate::eq("ownerId", "U1").matches(&record));
        assert!(!Predicate::eq("ownerId", "U2").matches(&record));
        assert!(Predicate::eq("tags", "b").matches(&record));
        assert!(Predicate::eq("meta.team", "T1").matches(&record));
        assert!(Predicate::is_in("ownerId", ["U3", "U1"]).matches(&record));
        assert!(!Predicate::eq("missing", "x").matches(&record));
        assert!(!Predicate::Nothing.matches(&record));

        let either = Predicate::Or(vec![Predicate::eq("ownerId", "U2"), Predicate::eq("meta.team", "T1")]);
        assert!(either.matches(&record));

        let both = Predicate::eq("ownerId", "U1").and(Predicate::eq("meta.team", "T2"));
        assert!(!both.matches(&record));
    }

    #[test]
    fn test_and_absorbs_nothing() {
        let p = Predicate::eq("a", 1).and(Predicate::Nothing);
        assert_eq!(p, Predicate::Nothing);
    }

    #[test]
    fn test_validate() {
        assert!(Predicate::eq("a", 1).validate().is_ok());
        assert!(Predicate::Or(vec![]).validate().is_err());
        assert!(Predicate::And(vec![Predicate::eq("", 1)]).validate().is_err());
        assert!(Predicate::Or(vec![Predicate::And(vec![])]).validate().is_err());
    }

    #[test]
    fn test_display() {
        let p = Predicate::Or(vec![Predicate::eq("ownerId", "U1"), Predicate::is_in("team", [1, 2])]);
        assert_eq!(p.to_string(), r#"(ownerId = "U1" OR team IN [1, 2])"#);
    }
}
