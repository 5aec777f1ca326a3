//! Core authorization types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Unique role identifier
pub type RoleId = String;

/// Name of a policy entry within one role/operation slot
pub type PolicyName = String;

/// Resolved roles of a principal, ordered for stable hashing and logging
pub type RoleSet = BTreeSet<RoleId>;

/// Well-known operation verbs used by the collection guard
pub mod operation {
    pub const FIND: &str = "find";
    pub const COUNT: &str = "count";
    pub const INSERT: &str = "insert";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const SAVE: &str = "save";

    /// Whether the verb is served by the read path
    pub fn is_read(op: &str) -> bool {
        op == FIND || op == COUNT
    }
}

/// Principal (user, service account, CLI actor)
///
/// Roles declared on the principal live in the `roles` attribute. Anything
/// other than a list of strings there is read as "no custom roles".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier
    pub id: String,

    /// Additional attributes, including `roles`
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Principal {
    /// Create a new principal with no attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    /// Add an attribute to the principal
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the declared roles attribute
    pub fn with_roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: Vec<Value> = roles.into_iter().map(|r| Value::String(r.into())).collect();
        self.with_attribute("roles", Value::Array(roles))
    }

    /// Declared roles, or `None` when the attribute is absent or malformed
    pub fn declared_roles(&self) -> Option<Vec<RoleId>> {
        match self.attributes.get("roles")? {
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// Whether a `roles` attribute is present but not a list of strings
    pub fn has_malformed_roles(&self) -> bool {
        self.attributes.contains_key("roles") && self.declared_roles().is_none()
    }

    /// Read an identity attribute as a string; `id` maps to the principal id
    pub fn attribute_string(&self, key: &str) -> Option<String> {
        if key == "id" {
            return Some(self.id.clone());
        }
        match self.attributes.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// What is being checked: a whole resource type or one instance of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRef {
    /// A resource type (collection, table, controller)
    Type(String),

    /// A specific record of a type
    Instance { resource_type: String, id: String },
}

impl ResourceRef {
    /// Resource type name
    pub fn resource_type(&self) -> &str {
        match self {
            Self::Type(name) => name,
            Self::Instance { resource_type, .. } => resource_type,
        }
    }

    /// Record identity, when this is an instance
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Type(_) => None,
            Self::Instance { id, .. } => Some(id),
        }
    }
}

/// Side-channel parameters handed to policies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Identity of the record under consideration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    /// The record document itself, when the caller has it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,

    /// Anything else a custom policy needs
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A resource, an operation on it and the parameter bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContext {
    pub resource: ResourceRef,
    pub operation: String,
    #[serde(default)]
    pub params: Params,
}

impl ResourceContext {
    /// Check against a resource type
    pub fn new(resource_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource: ResourceRef::Type(resource_type.into()),
            operation: operation.into(),
            params: Params::default(),
        }
    }

    /// Check against one record; the id is also placed in the params
    pub fn instance(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            resource: ResourceRef::Instance {
                resource_type: resource_type.into(),
                id: id.clone(),
            },
            operation: operation.into(),
            params: Params::default().with_record_id(id),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        if self.params.record_id.is_some() && params.record_id.is_none() {
            let record_id = self.params.record_id.take();
            self.params = Params { record_id, ..params };
        } else {
            self.params = params;
        }
        self
    }

    pub fn resource_type(&self) -> &str {
        self.resource.resource_type()
    }

    /// Record id from the resource reference or the params
    pub fn record_id(&self) -> Option<&str> {
        self.resource
            .record_id()
            .or(self.params.record_id.as_deref())
    }

    /// `Type:operation`, used in logs and diagnostics
    pub fn check_name(&self) -> String {
        format!("{}:{}", self.resource_type(), self.operation)
    }
}

impl fmt::Display for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_id() {
            Some(id) => write!(f, "{}:{}#{}", self.resource_type(), self.operation, id),
            None => write!(f, "{}:{}", self.resource_type(), self.operation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_principal_roles() {
        let principal = Principal::new("U1").with_roles(["editor", "auditor"]);
        assert_eq!(
            principal.declared_roles(),
            Some(vec!["editor".to_string(), "auditor".to_string()])
        );
        assert!(!principal.has_malformed_roles());
    }

    #[test]
    fn test_malformed_roles() {
        let principal = Principal::new("U1").with_attribute("roles", "admin");
        assert_eq!(principal.declared_roles(), None);
        assert!(principal.has_malformed_roles());

        let mixed = Principal::new("U1").with_attribute("roles", json!(["admin", 7]));
        assert_eq!(mixed.declared_roles(), None);

        let absent = Principal::new("U1");
        assert_eq!(absent.declared_roles(), None);
        assert!(!absent.has_malformed_roles());
    }

    #[test]
    fn test_attribute_string() {
        let principal = Principal::new("U1")
            .with_attribute("email", "u1@example.com")
            .with_attribute("employeeNo", 42);
        assert_eq!(principal.attribute_string("id").as_deref(), Some("U1"));
        assert_eq!(principal.attribute_string("email").as_deref(), Some("u1@example.com"));
        assert_eq!(principal.attribute_string("employeeNo").as_deref(), Some("42"));
        assert_eq!(principal.attribute_string("missing"), None);
    }

    #[test]
    fn test_resource_context() {
        let ctx = ResourceContext::instance("Note", "n-1", "update");
        assert_eq!(ctx.resource_type(), "Note");
        assert_eq!(ctx.record_id(), Some("n-1"));
        assert_eq!(ctx.check_name(), "Note:update");
        assert_eq!(ctx.to_string(), "Note:update#n-1");

        let ctx = ctx.with_params(Params::new().with_extra("reason", "audit"));
        assert_eq!(ctx.params.record_id.as_deref(), Some("n-1"));
        assert_eq!(ctx.params.extra.get("reason"), Some(&json!("audit")));
    }
}
