//! Authorization decision types

use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a permission check
///
/// A `Filter` is never a grant: consumers either apply the predicate to
/// their query or treat the decision as a deny.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "filter", rename_all = "snake_case")]
pub enum Decision {
    /// Unconditional access
    Grant,

    /// No access
    Deny,

    /// Access restricted to records matching the predicate
    Filter(Predicate),
}

impl Decision {
    pub fn is_grant(&self) -> bool {
        matches!(self, Self::Grant)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny)
    }

    pub fn is_filter(&self) -> bool {
        matches!(self, Self::Filter(_))
    }

    /// The row-level predicate, if this is a filtered decision
    pub fn filter(&self) -> Option<&Predicate> {
        match self {
            Self::Filter(predicate) => Some(predicate),
            _ => None,
        }
    }

    /// Short upper-case label used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Grant => "GRANT",
            Self::Deny => "DENY",
            Self::Filter(_) => "FILTER",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(predicate) => {
                let json = serde_json::to_string(predicate).map_err(|_| fmt::Error)?;
                write!(f, "FILTER {}", json)
            }
            other => f.write_str(other.label()),
        }
    }
}
