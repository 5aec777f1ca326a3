//! Policy definitions, bindings and discovery
//!
//! A policy is a named, configurable unit bound to a role, a resource type
//! and an operation. Bindings are declared alongside resource types or in
//! the operator override table and are resolved by the [`PolicyRegistry`].

use crate::error::Result;
use crate::predicate::Predicate;
use crate::types::{Params, PolicyName, Principal, ResourceContext, RoleId, RoleSet};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod builtin;
pub mod factory;
pub mod registry;

pub use builtin::{FilterPolicy, GrantPolicy, IsOwnerPolicy};
pub use factory::{PolicyConstructor, PolicyFactory};
pub use registry::{DeclaresPolicies, PolicyRegistry, PolicyRegistryBuilder, ResourceTypeDecl};

/// Key used when an operation entry is a single policy rather than a map
pub const DEFAULT_POLICY_NAME: &str = "default";

/// Result of running one policy
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// Unconditional access; evaluation stops here
    Grant,

    /// The policy does not apply
    Skip,

    /// Access restricted to records matching the predicate
    Filter(Predicate),
}

impl From<bool> for PolicyOutcome {
    fn from(granted: bool) -> Self {
        if granted {
            Self::Grant
        } else {
            Self::Skip
        }
    }
}

/// Everything a policy may read while it runs
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// The caller, if any
    pub principal: Option<&'a Principal>,

    /// The caller's resolved roles
    pub roles: &'a RoleSet,

    /// Resource, operation and parameter bag being checked
    pub resource: &'a ResourceContext,
}

impl<'a> PolicyContext<'a> {
    pub fn params(&self) -> &'a Params {
        &self.resource.params
    }

    pub fn operation(&self) -> &'a str {
        &self.resource.operation
    }
}

/// A constructible authorization unit
///
/// Policies must not change the decision through side effects; they may
/// read external state such as the current principal.
pub trait Policy: Send + Sync {
    /// Decide grant, skip or filter for the given context
    fn run(&self, ctx: &PolicyContext<'_>) -> Result<PolicyOutcome>;
}

/// A named policy plus its configuration fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInvocation {
    /// Name registered in the [`PolicyFactory`]
    pub policy: String,

    /// Configuration handed to the constructor
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl PolicyInvocation {
    pub fn new(policy: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            config: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Reference to a policy inside a binding
///
/// Serialized as `true` / `false` for the constants, or as a table with a
/// `policy` key for invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPolicyRef", into = "RawPolicyRef")]
pub enum PolicyRef {
    /// Constant grant
    Grant,

    /// Constant deny; skipped during evaluation
    Deny,

    /// Construct and run a named policy
    Invocation(PolicyInvocation),
}

impl PolicyRef {
    pub fn invoke(policy: impl Into<String>) -> Self {
        Self::Invocation(PolicyInvocation::new(policy))
    }
}

impl From<PolicyInvocation> for PolicyRef {
    fn from(invocation: PolicyInvocation) -> Self {
        Self::Invocation(invocation)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPolicyRef {
    Constant(bool),
    Invocation(PolicyInvocation),
}

impl From<RawPolicyRef> for PolicyRef {
    fn from(raw: RawPolicyRef) -> Self {
        match raw {
            RawPolicyRef::Constant(true) => Self::Grant,
            RawPolicyRef::Constant(false) => Self::Deny,
            RawPolicyRef::Invocation(invocation) => Self::Invocation(invocation),
        }
    }
}

impl From<PolicyRef> for RawPolicyRef {
    fn from(policy: PolicyRef) -> Self {
        match policy {
            PolicyRef::Grant => Self::Constant(true),
            PolicyRef::Deny => Self::Constant(false),
            PolicyRef::Invocation(invocation) => Self::Invocation(invocation),
        }
    }
}

/// Policies for one role/operation slot: a single policy or a named map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationPolicies {
    Single(PolicyRef),
    Named(IndexMap<PolicyName, PolicyRef>),
}

impl OperationPolicies {
    /// Normalize to a named map; a single policy lands under `"default"`
    pub fn into_named(self) -> IndexMap<PolicyName, PolicyRef> {
        match self {
            Self::Single(policy) => {
                let mut named = IndexMap::with_capacity(1);
                named.insert(DEFAULT_POLICY_NAME.to_string(), policy);
                named
            }
            Self::Named(named) => named,
        }
    }

    /// Iterate over the policy references in this slot
    pub fn refs(&self) -> Box<dyn Iterator<Item = &PolicyRef> + '_> {
        match self {
            Self::Single(policy) => Box::new(std::iter::once(policy)),
            Self::Named(named) => Box::new(named.values()),
        }
    }
}

impl From<PolicyRef> for OperationPolicies {
    fn from(policy: PolicyRef) -> Self {
        Self::Single(policy)
    }
}

/// Declared policies of one resource type: role -> operation -> policies
pub type PolicyTable = IndexMap<RoleId, IndexMap<String, OperationPolicies>>;

/// Operator overrides: role -> resource type -> operation -> policies
pub type OverrideTable = IndexMap<RoleId, IndexMap<String, IndexMap<String, OperationPolicies>>>;

/// Merged policies for one (type, operation): role -> name -> policy
pub type MergedPolicies = IndexMap<RoleId, IndexMap<PolicyName, PolicyRef>>;

/// Small builder for [`PolicyTable`]s declared in code
#[derive(Debug, Clone, Default)]
pub struct PolicyTableBuilder {
    table: PolicyTable,
}

impl PolicyTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind policies for `role` on `operation`
    pub fn bind(
        mut self,
        role: impl Into<String>,
        operation: impl Into<String>,
        policies: impl Into<OperationPolicies>,
    ) -> Self {
        self.table
            .entry(role.into())
            .or_default()
            .insert(operation.into(), policies.into());
        self
    }

    /// Bind one named policy, accumulating with other names in the slot
    pub fn bind_named(
        mut self,
        role: impl Into<String>,
        operation: impl Into<String>,
        name: impl Into<String>,
        policy: PolicyRef,
    ) -> Self {
        let slot = self
            .table
            .entry(role.into())
            .or_default()
            .entry(operation.into())
            .or_insert_with(|| OperationPolicies::Named(IndexMap::new()));

        let mut named = std::mem::replace(slot, OperationPolicies::Named(IndexMap::new())).into_named();
        named.insert(name.into(), policy);
        *slot = OperationPolicies::Named(named);
        self
    }

    pub fn build(self) -> PolicyTable {
        self.table
    }
}
