//! Built-in policies

use super::{Policy, PolicyContext, PolicyOutcome};
use crate::error::{AuthzError, Result};
use crate::predicate::Predicate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Constant policy, mostly useful in tests and overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrantPolicy {
    pub grant: bool,
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self { grant: true }
    }
}

impl Policy for GrantPolicy {
    fn run(&self, _ctx: &PolicyContext<'_>) -> Result<PolicyOutcome> {
        Ok(self.grant.into())
    }
}

/// Restricts access to records owned by the current principal
///
/// Produces `owner_attribute = <principal's id_attribute>`. Anonymous callers
/// and principals without the id attribute are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsOwnerPolicy {
    /// Principal attribute holding its identity (`id` is the principal id)
    pub id_attribute: String,

    /// Record attribute holding the owner's identity
    pub owner_attribute: String,
}

impl Default for IsOwnerPolicy {
    fn default() -> Self {
        Self {
            id_attribute: "id".to_string(),
            owner_attribute: "createdUserId".to_string(),
        }
    }
}

impl IsOwnerPolicy {
    pub fn on(owner_attribute: impl Into<String>) -> Self {
        Self {
            owner_attribute: owner_attribute.into(),
            ..Self::default()
        }
    }
}

impl Policy for IsOwnerPolicy {
    fn run(&self, ctx: &PolicyContext<'_>) -> Result<PolicyOutcome> {
        let Some(principal) = ctx.principal else {
            return Ok(PolicyOutcome::Skip);
        };

        match principal.attribute_string(&self.id_attribute) {
            Some(id) => Ok(PolicyOutcome::Filter(Predicate::eq(
                self.owner_attribute.clone(),
                id,
            ))),
            None => Ok(PolicyOutcome::Skip),
        }
    }
}

/// Returns a caller-supplied filter document
///
/// The document is parsed when the policy is constructed, so a malformed
/// filter is rejected at startup rather than on the first check.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "FilterDocument")]
pub struct FilterPolicy {
    filter: Predicate,
}

impl FilterPolicy {
    /// Parse a filter document, e.g. `{ status = "published" }`
    pub fn new(document: &Value) -> Result<Self> {
        let filter = Predicate::from_document(document).map_err(AuthzError::InvalidInput)?;
        Ok(Self { filter })
    }

    pub fn filter(&self) -> &Predicate {
        &self.filter
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterDocument {
    filter: Value,
}

impl TryFrom<FilterDocument> for FilterPolicy {
    type Error = AuthzError;

    fn try_from(document: FilterDocument) -> Result<Self> {
        Self::new(&document.filter)
    }
}

impl Policy for FilterPolicy {
    fn run(&self, _ctx: &PolicyContext<'_>) -> Result<PolicyOutcome> {
        Ok(PolicyOutcome::Filter(self.filter.clone()))
    }
}
