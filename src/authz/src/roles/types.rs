//! Role definitions and the role catalog

use crate::error::{AuthzError, Result};
use crate::types::RoleId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A role as configured by operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Display name
    pub name: String,

    /// Excluded from UI listings
    #[serde(default)]
    pub hidden: bool,

    /// Roles implied by holding this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inherits: Vec<RoleId>,
}

impl RoleDefinition {
    /// Create a new visible role with no inherited roles
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hidden: false,
            inherits: Vec::new(),
        }
    }

    /// Mark the role as hidden
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Add inherited roles
    pub fn with_inherits<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherits.extend(roles.into_iter().map(Into::into));
        self
    }

    /// Validate the definition registered under `id`
    pub fn validate(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(AuthzError::Configuration(
                "Role id cannot be empty".to_string(),
            ));
        }

        for parent in &self.inherits {
            if parent.is_empty() {
                return Err(AuthzError::Configuration(format!(
                    "Role '{}' inherits an empty role id",
                    id
                )));
            }
            if parent == id {
                return Err(AuthzError::Configuration(format!(
                    "Role '{}' cannot inherit itself",
                    id
                )));
            }
        }

        Ok(())
    }
}

/// Every role the deployment knows about, plus the automatic grants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleCatalog {
    /// Available roles keyed by id
    pub roles: IndexMap<RoleId, RoleDefinition>,

    /// Roles every principal holds, including anonymous ones
    pub default_roles: Vec<RoleId>,

    /// Roles every authenticated principal holds
    pub registered_roles: Vec<RoleId>,

    /// Roles hidden from listings regardless of their own flag
    pub hidden_roles: Vec<RoleId>,

    /// Role that conventionally carries unrestricted access
    pub admin_role: RoleId,
}

impl Default for RoleCatalog {
    fn default() -> Self {
        let mut roles = IndexMap::new();
        roles.insert("public".to_string(), RoleDefinition::new("Public"));
        roles.insert("admin".to_string(), RoleDefinition::new("Administrator"));
        roles.insert("registered".to_string(), RoleDefinition::new("Registered User"));

        Self {
            roles,
            default_roles: vec!["public".to_string()],
            registered_roles: vec!["registered".to_string()],
            hidden_roles: vec!["public".to_string(), "registered".to_string()],
            admin_role: "admin".to_string(),
        }
    }
}

impl RoleCatalog {
    /// Whether a role id is hidden from listings
    pub fn is_hidden(&self, id: &str) -> bool {
        self.hidden_roles.iter().any(|r| r == id)
            || self.roles.get(id).map(|r| r.hidden).unwrap_or(false)
    }

    /// Key/name listing of roles, optionally including hidden ones
    pub fn role_options(&self, include_hidden: bool) -> IndexMap<RoleId, String> {
        self.roles
            .iter()
            .filter(|(id, _)| include_hidden || !self.is_hidden(id))
            .map(|(id, role)| (id.clone(), role.name.clone()))
            .collect()
    }

    /// Check that every definition is well formed and the automatic roles exist
    pub fn validate(&self) -> Result<()> {
        for (id, role) in &self.roles {
            role.validate(id)?;
        }

        if self.roles.is_empty() {
            return Ok(());
        }

        for id in self.default_roles.iter().chain(&self.registered_roles) {
            if !self.roles.contains_key(id) {
                return Err(AuthzError::Configuration(format!(
                    "Automatic role '{}' is not defined in the role catalog",
                    id
                )));
            }
        }

        if !self.roles.contains_key(&self.admin_role) {
            return Err(AuthzError::Configuration(format!(
                "Admin role '{}' is not defined in the role catalog",
                self.admin_role
            )));
        }

        Ok(())
    }
}
