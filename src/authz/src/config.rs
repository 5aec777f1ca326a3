//! Engine configuration loading and validation
//!
//! ```toml
//! admin_role = "admin"
//! ignored_collections = ["app.session"]
//!
//! [roles.editor]
//! name = "Editor"
//! inherits = ["registered"]
//!
//! [resource_types.Note]
//! parent = "Document"
//!
//! [resource_types.Note.policies.registered]
//! find = { policy = "is_owner", owner_attribute = "ownerId" }
//!
//! [policies.editor.Note]
//! update = true
//!
//! [collections]
//! notes = "Note"
//! ```

use crate::engine::CacheConfig;
use crate::error::{AuthzError, Result};
use crate::policy::{OverrideTable, PolicyRegistryBuilder, PolicyTable, ResourceTypeDecl};
use crate::roles::{RoleCatalog, RoleDefinition};
use crate::types::RoleId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// A resource type as written in the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceTypeConfig {
    /// Supertype whose policies this type inherits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// role -> operation -> policies
    pub policies: PolicyTable,
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Extra or replacement roles, merged over the built-in catalog
    pub roles: IndexMap<RoleId, RoleDefinition>,

    /// Roles every principal holds
    pub default_roles: Vec<RoleId>,

    /// Roles every authenticated principal holds
    pub registered_roles: Vec<RoleId>,

    /// Roles hidden from listings
    pub hidden_roles: Vec<RoleId>,

    /// Role that conventionally carries unrestricted access
    pub admin_role: RoleId,

    /// Collections that are never permission checked
    pub ignored_collections: Vec<String>,

    /// Disable all permission checks
    pub force_admin: bool,

    /// 1 = normal, 2 = verbose
    pub trace_level: u8,

    /// Resource type declarations
    pub resource_types: IndexMap<String, ResourceTypeConfig>,

    /// Operator overrides: role -> type -> operation -> policies
    pub policies: OverrideTable,

    /// Collection -> resource type
    pub collections: IndexMap<String, String>,

    /// Decision cache
    pub cache: CacheConfig,
}

impl Default for RbacConfig {
    fn default() -> Self {
        let catalog = RoleCatalog::default();
        Self {
            roles: IndexMap::new(),
            default_roles: catalog.default_roles,
            registered_roles: catalog.registered_roles,
            hidden_roles: catalog.hidden_roles,
            admin_role: catalog.admin_role,
            ignored_collections: Vec::new(),
            force_admin: false,
            trace_level: 1,
            resource_types: IndexMap::new(),
            policies: OverrideTable::new(),
            collections: IndexMap::new(),
            cache: CacheConfig::default(),
        }
    }
}

impl RbacConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            AuthzError::Configuration(msg) => {
                AuthzError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        info!("Loaded authorization config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RbacConfig = toml::from_str(contents)
            .map_err(|e| AuthzError::Configuration(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.trace_level) {
            return Err(AuthzError::Configuration(format!(
                "trace_level must be 1 or 2, got {}",
                self.trace_level
            )));
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(AuthzError::Configuration(
                "cache.capacity must be greater than 0".to_string(),
            ));
        }

        for (collection, resource_type) in &self.collections {
            if collection.is_empty() || resource_type.is_empty() {
                return Err(AuthzError::Configuration(format!(
                    "Collection mapping '{}' -> '{}' is incomplete",
                    collection, resource_type
                )));
            }
        }

        self.catalog().validate()
    }

    /// Built-in roles with the configured ones merged over them
    pub fn catalog(&self) -> RoleCatalog {
        let mut catalog = RoleCatalog::default();
        for (id, role) in &self.roles {
            catalog.roles.insert(id.clone(), role.clone());
        }
        catalog.default_roles = self.default_roles.clone();
        catalog.registered_roles = self.registered_roles.clone();
        catalog.hidden_roles = self.hidden_roles.clone();
        catalog.admin_role = self.admin_role.clone();
        catalog
    }

    /// Registry builder seeded with the configured types and overrides
    pub fn registry_builder(&self) -> PolicyRegistryBuilder {
        let builder = self
            .resource_types
            .iter()
            .fold(PolicyRegistryBuilder::new(), |builder, (name, declared)| {
                let mut declaration = ResourceTypeDecl::new(name.clone())
                    .with_policies(declared.policies.clone());
                declaration.parent = declared.parent.clone();
                builder.declare(declaration)
            });

        builder.with_overrides(self.policies.clone())
    }

    /// Default `tracing` filter directive for the configured trace level
    pub fn log_directive(&self) -> &'static str {
        match self.trace_level {
            2 => "info,warden_authz=trace",
            _ => "info",
        }
    }
}
