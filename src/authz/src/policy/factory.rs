//! Policy factory: policy name -> constructor, populated at startup

use super::builtin::{FilterPolicy, GrantPolicy, IsOwnerPolicy};
use super::{Policy, PolicyInvocation};
use crate::error::{AuthzError, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a policy from its configuration fields
pub type PolicyConstructor =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Policy>> + Send + Sync>;

/// Registry of constructible policies
///
/// # Example
///
/// ```rust
/// use warden_authz::policy::{PolicyFactory, PolicyInvocation};
///
/// let factory = PolicyFactory::with_builtins();
/// let invocation = PolicyInvocation::new("is_owner").with("owner_attribute", "ownerId");
/// assert!(factory.construct(&invocation).is_ok());
/// assert!(factory.construct(&PolicyInvocation::new("missing")).is_err());
/// ```
#[derive(Clone, Default)]
pub struct PolicyFactory {
    constructors: HashMap<String, PolicyConstructor>,
}

impl PolicyFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with `grant`, `is_owner` and `filter` registered
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register_config::<GrantPolicy>("grant");
        factory.register_config::<IsOwnerPolicy>("is_owner");
        factory.register_config::<FilterPolicy>("filter");
        factory
    }

    /// Register a constructor under `name`, replacing any previous one
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Policy>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Register a policy whose configuration deserializes into the policy itself
    pub fn register_config<P>(&mut self, name: impl Into<String>) -> &mut Self
    where
        P: Policy + DeserializeOwned + 'static,
    {
        self.register(name, |config| {
            let policy: P = serde_json::from_value(Value::Object(config.clone()))
                .map_err(|e| AuthzError::InvalidInput(e.to_string()))?;
            Ok(Box::new(policy) as Box<dyn Policy>)
        })
    }

    /// Whether a policy name is known
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Construct the policy an invocation refers to
    ///
    /// # Errors
    ///
    /// Unknown names and rejected configurations are configuration errors.
    pub fn construct(&self, invocation: &PolicyInvocation) -> Result<Box<dyn Policy>> {
        let constructor = self.constructors.get(&invocation.policy).ok_or_else(|| {
            AuthzError::Configuration(format!("Unknown policy '{}'", invocation.policy))
        })?;

        constructor(&invocation.config).map_err(|e| match e {
            AuthzError::Configuration(msg) => AuthzError::Configuration(msg),
            other => AuthzError::Configuration(format!(
                "Unable to construct policy '{}': {}",
                invocation.policy, other
            )),
        })
    }
}

impl fmt::Debug for PolicyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("PolicyFactory").field("policies", &names).finish()
    }
}
