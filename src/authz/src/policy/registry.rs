//! Policy registry with precedence-ordered discovery
//!
//! Resource types declare their policies and, optionally, a supertype. For a
//! (type, operation) pair the registry walks the chain from the type up to
//! its most generic ancestor, folds in operator overrides at each level, then
//! merges the levels ancestor-first so the most specific entry wins.
//!
//! ```text
//! Note -> Document -> Model           (declared chain, specific first)
//!   + overrides[role][Note]           (folded into the Note level, wins)
//!
//! merge order: Model, Document, Note  (later replaces same-named entries)
//! ```

use super::factory::PolicyFactory;
use super::{
    MergedPolicies, OperationPolicies, OverrideTable, PolicyRef, PolicyTable,
};
use crate::error::{AuthzError, Result};
use crate::types::PolicyName;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Static declaration of a resource type and its policies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeDecl {
    /// Resource type name
    #[serde(default)]
    pub name: String,

    /// Supertype whose policies this type inherits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// role -> operation -> policies
    #[serde(default)]
    pub policies: PolicyTable,
}

impl ResourceTypeDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }
}

/// Implemented by Rust types that carry their own policy declarations
///
/// ```rust
/// use warden_authz::policy::{DeclaresPolicies, PolicyRef, PolicyTable, PolicyTableBuilder};
///
/// struct Invoice;
///
/// impl DeclaresPolicies for Invoice {
///     const RESOURCE_TYPE: &'static str = "Invoice";
///
///     fn policies() -> PolicyTable {
///         PolicyTableBuilder::new()
///             .bind("public", "find", PolicyRef::Deny)
///             .build()
///     }
/// }
/// ```
pub trait DeclaresPolicies {
    /// Resource type name used in checks and collection registration
    const RESOURCE_TYPE: &'static str;

    /// Supertype, if any
    fn parent_type() -> Option<&'static str> {
        None
    }

    /// role -> operation -> policies
    fn policies() -> PolicyTable;

    /// Declaration built from the associated items
    fn declaration() -> ResourceTypeDecl {
        ResourceTypeDecl {
            name: Self::RESOURCE_TYPE.to_string(),
            parent: Self::parent_type().map(str::to_string),
            policies: Self::policies(),
        }
    }
}

/// Collects declarations and overrides, validated on [`build`](Self::build)
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistryBuilder {
    declarations: Vec<ResourceTypeDecl>,
    overrides: OverrideTable,
}

impl PolicyRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource type declaration
    pub fn declare(mut self, declaration: ResourceTypeDecl) -> Self {
        self.declarations.push(declaration);
        self
    }

    /// Add the declaration of a Rust type
    pub fn declare_type<T: DeclaresPolicies>(self) -> Self {
        self.declare(T::declaration())
    }

    /// Merge an operator override table; later tables win on conflicts
    pub fn with_overrides(mut self, overrides: OverrideTable) -> Self {
        for (role, by_type) in overrides {
            let role_entry = self.overrides.entry(role).or_default();
            for (resource_type, by_operation) in by_type {
                let type_entry = role_entry.entry(resource_type).or_default();
                for (operation, policies) in by_operation {
                    let merged = match type_entry.swap_remove(&operation) {
                        Some(existing) => {
                            let mut named = existing.into_named();
                            merge_named(&mut named, policies.into_named());
                            OperationPolicies::Named(named)
                        }
                        None => policies,
                    };
                    type_entry.insert(operation, merged);
                }
            }
        }
        self
    }

    /// Validate and freeze the registry
    ///
    /// # Errors
    ///
    /// Configuration error when a type is declared twice, a supertype is not
    /// declared, a supertype chain loops, or any invocation cannot be
    /// constructed by `factory`.
    pub fn build(self, factory: &PolicyFactory) -> Result<PolicyRegistry> {
        let mut types: HashMap<String, ResourceTypeDecl> = HashMap::new();

        for declaration in self.declarations {
            if declaration.name.is_empty() {
                return Err(AuthzError::Configuration(
                    "Resource type name cannot be empty".to_string(),
                ));
            }
            if types.contains_key(&declaration.name) {
                return Err(AuthzError::Configuration(format!(
                    "Resource type '{}' is declared more than once",
                    declaration.name
                )));
            }
            types.insert(declaration.name.clone(), declaration);
        }

        let registry = PolicyRegistry {
            types,
            overrides: self.overrides,
        };

        for name in registry.types.keys() {
            registry.checked_chain(name)?;
        }

        for policy in registry.all_refs() {
            if let PolicyRef::Invocation(invocation) = policy {
                factory.construct(invocation)?;
            }
        }

        debug!(
            "PolicyRegistry built with {} resource types and {} override roles",
            registry.types.len(),
            registry.overrides.len()
        );

        Ok(registry)
    }
}

/// Read-only registry of declared and overridden policies
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    types: HashMap<String, ResourceTypeDecl>,
    overrides: OverrideTable,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::new()
    }

    /// Whether a resource type was declared
    pub fn is_declared(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    /// Declared chain for a type, most specific first
    ///
    /// An undeclared type is a chain of one: overrides may still target it.
    pub fn type_chain<'a>(&'a self, resource_type: &'a str) -> Vec<&'a str> {
        // Chains are validated at build time, so this terminates
        let mut chain = vec![resource_type];
        let mut current = resource_type;
        while let Some(parent) = self.types.get(current).and_then(|d| d.parent.as_deref()) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    fn checked_chain(&self, resource_type: &str) -> Result<()> {
        let mut seen: IndexSet<&str> = IndexSet::new();
        let mut current = resource_type;

        loop {
            if !seen.insert(current) {
                let path: Vec<&str> = seen.iter().copied().chain(std::iter::once(current)).collect();
                return Err(AuthzError::Configuration(format!(
                    "Circular supertype chain: {}",
                    path.join(" -> ")
                )));
            }

            let Some(declaration) = self.types.get(current) else {
                return Err(AuthzError::Configuration(format!(
                    "Resource type '{}' extends undeclared type '{}'",
                    seen.get_index(seen.len().saturating_sub(2)).copied().unwrap_or(resource_type),
                    current
                )));
            };

            match declaration.parent.as_deref() {
                Some(parent) => current = parent,
                None => return Ok(()),
            }
        }
    }

    fn all_refs(&self) -> impl Iterator<Item = &PolicyRef> {
        let declared = self
            .types
            .values()
            .flat_map(|d| d.policies.values())
            .flat_map(|by_op| by_op.values())
            .flat_map(|slot| slot.refs());

        let overridden = self
            .overrides
            .values()
            .flat_map(|by_type| by_type.values())
            .flat_map(|by_op| by_op.values())
            .flat_map(|slot| slot.refs());

        declared.chain(overridden)
    }

    /// Merge all policies that apply to `operation` on `resource_type`
    ///
    /// Returns role -> policy name -> policy. Roles without an entry for the
    /// operation at any level are absent; an empty map means no policy.
    pub fn merged_policies(&self, resource_type: &str, operation: &str) -> MergedPolicies {
        let mut levels: Vec<MergedPolicies> = Vec::new();

        for level_type in self.type_chain(resource_type) {
            let mut bucket = MergedPolicies::new();

            if let Some(declaration) = self.types.get(level_type) {
                for (role, by_operation) in &declaration.policies {
                    if let Some(slot) = by_operation.get(operation) {
                        merge_named(
                            bucket.entry(role.clone()).or_default(),
                            slot.clone().into_named(),
                        );
                    }
                }
            }

            for (role, by_type) in &self.overrides {
                let slot = by_type
                    .get(level_type)
                    .and_then(|by_operation| by_operation.get(operation));
                if let Some(slot) = slot {
                    trace!("Override for {} applies to {}:{}", role, level_type, operation);
                    merge_named(
                        bucket.entry(role.clone()).or_default(),
                        slot.clone().into_named(),
                    );
                }
            }

            if !bucket.is_empty() {
                levels.push(bucket);
            }
        }

        // Ancestors first, so more specific levels overwrite them
        levels.reverse();

        let mut merged = MergedPolicies::new();
        for level in levels {
            for (role, policies) in level {
                merge_named(merged.entry(role).or_default(), policies);
            }
        }

        merged
    }
}

/// Shallow, key-preserving merge: same name replaces in place, new names append
fn merge_named(
    target: &mut IndexMap<PolicyName, PolicyRef>,
    source: IndexMap<PolicyName, PolicyRef>,
) {
    for (name, policy) in source {
        target.insert(name, policy);
    }
}
