//! Per-request principal and memoized roles

use crate::roles::RoleResolver;
use crate::types::{Principal, RoleSet};
use std::sync::OnceLock;
use tracing::debug;

/// Supplies the current principal, typically from the host's session layer
pub trait PrincipalSource: Send + Sync {
    fn current_principal(&self) -> Option<Principal>;
}

/// A fixed principal is its own source
impl PrincipalSource for Principal {
    fn current_principal(&self) -> Option<Principal> {
        Some(self.clone())
    }
}

/// Request-scoped state: the acting principal and its resolved roles
///
/// Roles are resolved on first use and reused for every check made with
/// this context until [`login`](Self::login) replaces the principal.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    principal: Option<Principal>,
    roles: OnceLock<RoleSet>,
}

impl RequestContext {
    /// Context for an unauthenticated request or a CLI call without a user
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Context with a manually-set principal
    pub fn for_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            roles: OnceLock::new(),
        }
    }

    /// Context for whoever the source reports as current
    pub fn from_source(source: &dyn PrincipalSource) -> Self {
        match source.current_principal() {
            Some(principal) => Self::for_principal(principal),
            None => Self::anonymous(),
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Replace the principal and drop the memoized roles
    pub fn login(&mut self, principal: Principal) {
        debug!("Login as {}, resetting roles", principal.id);
        self.principal = Some(principal);
        self.roles = OnceLock::new();
    }

    /// Drop the principal and the memoized roles
    pub fn logout(&mut self) {
        self.principal = None;
        self.roles = OnceLock::new();
    }

    /// Effective roles, resolved once per context
    pub fn roles(&self, resolver: &RoleResolver) -> &RoleSet {
        self.roles
            .get_or_init(|| resolver.resolve_roles(self.principal.as_ref()))
    }

    /// Whether roles have been resolved for this context yet
    pub fn roles_resolved(&self) -> bool {
        self.roles.get().is_some()
    }

    /// Whether the principal holds `role`
    pub fn is(&self, resolver: &RoleResolver, role: &str) -> bool {
        self.roles(resolver).contains(role)
    }
}
