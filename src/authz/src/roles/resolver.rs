//! Role resolver
//!
//! Computes the effective role set of a principal: default roles, plus
//! registered-user roles and declared roles when a principal is present,
//! closed under role inheritance.
//!
//! The resolver holds no per-principal state. Memoization within one request
//! belongs to [`RequestContext`](crate::engine::RequestContext).

use super::graph::{GraphError, RoleGraphBuilder};
use super::types::RoleCatalog;
use crate::error::{AuthzError, Result};
use crate::types::{Principal, RoleId, RoleSet};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Role resolver with precomputed inheritance closures
///
/// # Thread Safety
///
/// Immutable after construction; share it with `Arc` or clone it cheaply.
#[derive(Debug, Clone)]
pub struct RoleResolver {
    /// Role catalog and automatic grants
    catalog: Arc<RoleCatalog>,

    /// Role id -> every role it implies, including itself
    closures: Arc<HashMap<RoleId, RoleSet>>,
}

impl RoleResolver {
    /// Create a resolver over a catalog
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the catalog is invalid or the
    /// inheritance graph contains a cycle.
    pub fn new(catalog: RoleCatalog) -> Result<Self> {
        catalog.validate()?;
        let closures = Self::build_closures(&catalog)?;

        Ok(Self {
            catalog: Arc::new(catalog),
            closures: Arc::new(closures),
        })
    }

    /// Build the inheritance closure of every defined role in one pass
    fn build_closures(catalog: &RoleCatalog) -> Result<HashMap<RoleId, RoleSet>> {
        let mut builder = RoleGraphBuilder::new();
        for (id, role) in &catalog.roles {
            builder.add_role(id.clone(), role.clone()).map_err(graph_error)?;
        }

        let graph = builder.build().map_err(graph_error)?;
        let order = graph.resolve_order().map_err(graph_error)?;

        let mut closures: HashMap<RoleId, RoleSet> = HashMap::with_capacity(order.len());
        for id in order {
            let mut closure = RoleSet::new();
            closure.insert(id.clone());

            if let Some(role) = catalog.roles.get(&id) {
                for parent in &role.inherits {
                    // Parents come earlier in the order, so their closure is ready
                    match closures.get(parent) {
                        Some(inherited) => closure.extend(inherited.iter().cloned()),
                        None => {
                            closure.insert(parent.clone());
                        }
                    }
                }
            }

            closures.insert(id, closure);
        }

        Ok(closures)
    }

    /// Resolve the effective roles for a principal (or an anonymous caller)
    ///
    /// A principal whose `roles` attribute is not a list of role ids keeps
    /// the default and registered roles; the malformed attribute is logged.
    pub fn resolve_roles(&self, principal: Option<&Principal>) -> RoleSet {
        let mut roles: Vec<RoleId> = self.catalog.default_roles.clone();

        match principal {
            None => {
                trace!("No principal, likely a public / unauthenticated request or CLI call");
            }
            Some(principal) => {
                roles.extend(self.catalog.registered_roles.iter().cloned());

                if principal.has_malformed_roles() {
                    warn!(
                        "Principal {} has a malformed roles attribute, ignoring custom roles",
                        principal.id
                    );
                } else if let Some(declared) = principal.declared_roles() {
                    roles.extend(declared);
                }
            }
        }

        let resolved = self.expand(roles);

        if let Some(principal) = principal {
            trace!(
                "Initialised from {} with user roles: {}",
                principal.id,
                resolved.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        resolved
    }

    /// Close a list of roles under inheritance
    pub fn expand<I>(&self, roles: I) -> RoleSet
    where
        I: IntoIterator<Item = RoleId>,
    {
        let mut resolved = RoleSet::new();
        for role in roles {
            match self.closures.get(&role) {
                Some(closure) => resolved.extend(closure.iter().cloned()),
                None => {
                    resolved.insert(role);
                }
            }
        }
        resolved
    }

    /// Whether the resolved set carries the configured admin role
    pub fn is_admin(&self, roles: &RoleSet) -> bool {
        roles.contains(&self.catalog.admin_role)
    }

    /// Key/name listing of roles for UIs
    pub fn role_options(&self, include_hidden: bool) -> IndexMap<RoleId, String> {
        self.catalog.role_options(include_hidden)
    }

    /// The catalog this resolver was built from
    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }
}

impl Default for RoleResolver {
    fn default() -> Self {
        let catalog = RoleCatalog::default();
        let closures = catalog
            .roles
            .keys()
            .map(|id| (id.clone(), RoleSet::from([id.clone()])))
            .collect();

        Self {
            catalog: Arc::new(catalog),
            closures: Arc::new(closures),
        }
    }
}

fn graph_error(e: GraphError) -> AuthzError {
    match e {
        GraphError::CircularDependency(msg) => {
            AuthzError::Configuration(format!("Circular dependency in role hierarchy: {}", msg))
        }
        GraphError::DuplicateRole(name) => {
            AuthzError::Configuration(format!("Duplicate role: {}", name))
        }
        GraphError::InvalidRole(msg) => AuthzError::Configuration(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::RoleDefinition;

    fn roles(items: &[&str]) -> RoleSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_anonymous_gets_default_roles() {
        let resolver = RoleResolver::default();
        assert_eq!(resolver.resolve_roles(None), roles(&["public"]));
    }

    #[test]
    fn test_registered_principal() {
        let resolver = RoleResolver::default();
        let principal = Principal::new("U1").with_roles(["editor"]);
        assert_eq!(
            resolver.resolve_roles(Some(&principal)),
            roles(&["editor", "public", "registered"])
        );
    }

    #[test]
    fn test_malformed_roles_degrade_to_defaults() {
        let resolver = RoleResolver::default();
        let principal = Principal::new("U1").with_attribute("roles", "admin");
        assert_eq!(
            resolver.resolve_roles(Some(&principal)),
            roles(&["public", "registered"])
        );
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let resolver = RoleResolver::default();
        let principal = Principal::new("U1").with_roles(["admin"]);
        let first = resolver.resolve_roles(Some(&principal));
        let second = resolver.resolve_roles(Some(&principal));
        assert_eq!(first, second);
        assert!(resolver.is_admin(&first));
    }

    #[test]
    fn test_inheritance_closure() {
        let mut catalog = RoleCatalog::default();
        catalog.roles.insert("viewer".to_string(), RoleDefinition::new("Viewer"));
        catalog.roles.insert(
            "editor".to_string(),
            RoleDefinition::new("Editor").with_inherits(["viewer"]),
        );
        catalog.roles.insert(
            "chief".to_string(),
            RoleDefinition::new("Chief").with_inherits(["editor", "auditor"]),
        );

        let resolver = RoleResolver::new(catalog).unwrap();
        let principal = Principal::new("U1").with_roles(["chief"]);

        assert_eq!(
            resolver.resolve_roles(Some(&principal)),
            roles(&["auditor", "chief", "editor", "public", "registered", "viewer"])
        );
    }

    #[test]
    fn test_inheritance_cycle_is_configuration_error() {
        let mut catalog = RoleCatalog::default();
        catalog.roles.insert(
            "a".to_string(),
            RoleDefinition::new("A").with_inherits(["b"]),
        );
        catalog.roles.insert(
            "b".to_string(),
            RoleDefinition::new("B").with_inherits(["a"]),
        );

        match RoleResolver::new(catalog) {
            Err(AuthzError::Configuration(msg)) => assert!(msg.contains("Circular dependency")),
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }
}
