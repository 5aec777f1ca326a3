//! Authorization engine
//!
//! Orchestrates role resolution, policy discovery, evaluation and record
//! probing, with an optional decision cache and metrics.
//!
//! ```text
//! can(ctx, resource)
//!   → RequestContext::roles  (memoized per request)
//!   → PolicyRegistry::merged_policies(type, op)
//!   → PolicyEvaluator::evaluate  → Grant | Deny | Filter(p)
//!
//! can_access_record / can_access_collection
//!   → can(...) → Filter(p) → RecordStore::probe_exists(id, p)
//! ```

pub mod cache;
pub mod context;
pub mod decision;
pub mod evaluator;
pub mod metrics;
pub mod record;

pub use cache::{CacheConfig, CacheStats, DecisionCache};
pub use context::{PrincipalSource, RequestContext};
pub use decision::Decision;
pub use evaluator::PolicyEvaluator;
pub use metrics::{EngineMetrics, MetricsCollector};
pub use record::RecordAccessResolver;

use crate::config::RbacConfig;
use crate::error::{AuthzError, Result};
use crate::policy::{
    DeclaresPolicies, OverrideTable, Policy, PolicyContext, PolicyFactory, PolicyRegistry,
    PolicyRegistryBuilder, ResourceTypeDecl,
};
use crate::roles::{RoleCatalog, RoleResolver};
use crate::store::{MemoryStore, RecordStore};
use crate::types::{Params, ResourceContext, RoleId};
use dashmap::{DashMap, DashSet};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Builder for [`RbacEngine`]
pub struct RbacEngineBuilder {
    catalog: RoleCatalog,
    factory: PolicyFactory,
    registry: PolicyRegistryBuilder,
    store: Option<Arc<dyn RecordStore>>,
    cache: CacheConfig,
    collections: IndexMap<String, String>,
    ignored_collections: Vec<String>,
    force_admin: bool,
}

impl Default for RbacEngineBuilder {
    fn default() -> Self {
        Self {
            catalog: RoleCatalog::default(),
            factory: PolicyFactory::with_builtins(),
            registry: PolicyRegistryBuilder::new(),
            store: None,
            cache: CacheConfig::default(),
            collections: IndexMap::new(),
            ignored_collections: Vec::new(),
            force_admin: false,
        }
    }
}

impl RbacEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the builder from a configuration file's contents
    pub fn from_config(config: &RbacConfig) -> Self {
        Self {
            catalog: config.catalog(),
            registry: config.registry_builder(),
            cache: config.cache.clone(),
            collections: config.collections.clone(),
            ignored_collections: config.ignored_collections.clone(),
            force_admin: config.force_admin,
            ..Self::default()
        }
    }

    pub fn catalog(mut self, catalog: RoleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the policy factory (built-ins are registered by default)
    pub fn factory(mut self, factory: PolicyFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Register an operator policy constructor
    pub fn register_policy<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Policy>> + Send + Sync + 'static,
    {
        self.factory.register(name, constructor);
        self
    }

    pub fn declare(mut self, declaration: ResourceTypeDecl) -> Self {
        self.registry = self.registry.declare(declaration);
        self
    }

    pub fn declare_type<T: DeclaresPolicies>(mut self) -> Self {
        self.registry = self.registry.declare_type::<T>();
        self
    }

    pub fn overrides(mut self, overrides: OverrideTable) -> Self {
        self.registry = self.registry.with_overrides(overrides);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Map a collection to its resource type
    pub fn collection(mut self, collection: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.collections.insert(collection.into(), resource_type.into());
        self
    }

    pub fn ignore_collection(mut self, collection: impl Into<String>) -> Self {
        self.ignored_collections.push(collection.into());
        self
    }

    pub fn force_admin(mut self, enabled: bool) -> Self {
        self.force_admin = enabled;
        self
    }

    /// Validate everything and build the engine
    ///
    /// # Errors
    ///
    /// Configuration errors for an invalid catalog, a cyclic role hierarchy,
    /// a bad supertype chain or an unconstructible policy.
    pub fn build(self) -> Result<RbacEngine> {
        let resolver = RoleResolver::new(self.catalog)?;
        let registry = self.registry.build(&self.factory)?;
        let factory = Arc::new(self.factory);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>);

        let cache = if self.cache.enabled {
            Some(DecisionCache::new(&self.cache))
        } else {
            None
        };

        let collections = DashMap::new();
        let collections_by_type = DashMap::new();
        for (collection, resource_type) in self.collections {
            collections_by_type
                .entry(resource_type.clone())
                .or_insert_with(|| collection.clone());
            collections.insert(collection, resource_type);
        }

        let ignored = DashSet::new();
        for collection in self.ignored_collections {
            ignored.insert(collection);
        }

        let engine = RbacEngine {
            resolver: Arc::new(resolver),
            registry: Arc::new(registry),
            evaluator: PolicyEvaluator::new(factory),
            records: RecordAccessResolver::new(store.clone()),
            store,
            cache,
            metrics: MetricsCollector::new(),
            collections,
            collections_by_type,
            ignored,
            force_admin: AtomicBool::new(self.force_admin),
        };

        info!(
            "RbacEngine initialized with cache={}, collections={}, ignored={}",
            engine.cache.is_some(),
            engine.collections.len(),
            engine.ignored.len()
        );
        if !engine.ignored.is_empty() {
            let mut names: Vec<String> = engine.ignored.iter().map(|c| c.key().clone()).collect();
            names.sort();
            info!("Permission checks disabled for collections: {}", names.join(", "));
        }
        if engine.is_force_admin() {
            warn!("force_admin is enabled, all permission checks are bypassed");
        }

        Ok(engine)
    }
}

/// Row-level RBAC engine
///
/// # Thread Safety
///
/// `Send + Sync`; share one instance behind an `Arc`. Request state lives in
/// [`RequestContext`], never in the engine.
pub struct RbacEngine {
    resolver: Arc<RoleResolver>,
    registry: Arc<PolicyRegistry>,
    evaluator: PolicyEvaluator,
    records: RecordAccessResolver,
    store: Arc<dyn RecordStore>,
    cache: Option<DecisionCache>,
    metrics: MetricsCollector,

    /// Collection -> resource type
    collections: DashMap<String, String>,

    /// Resource type -> first collection registered for it
    collections_by_type: DashMap<String, String>,

    /// Collections that bypass permission checks
    ignored: DashSet<String>,

    force_admin: AtomicBool,
}

impl RbacEngine {
    pub fn builder() -> RbacEngineBuilder {
        RbacEngineBuilder::new()
    }

    /// Build an engine from configuration and a store
    pub fn from_config(config: &RbacConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config.validate()?;
        RbacEngineBuilder::from_config(config).store(store).build()
    }

    /// Decide whether the context's principal may perform the operation
    ///
    /// Synchronous: never touches storage. A `Filter` must be applied by the
    /// caller or settled with [`can_access_record`](Self::can_access_record).
    pub fn can(&self, ctx: &RequestContext, resource: &ResourceContext) -> Result<Decision> {
        if self.is_force_admin() {
            trace!("force_admin enabled, granting {}", resource.check_name());
            return Ok(Decision::Grant);
        }

        let start = Instant::now();
        debug!("Checking permission request for {}", resource.check_name());

        let roles = ctx.roles(&self.resolver);

        if let Some(cache) = &self.cache {
            if let Some(decision) = cache.get(ctx.principal(), roles, resource) {
                self.metrics.record_cache_hit();
                self.metrics.record_decision(&decision, start.elapsed());
                debug!("Cache hit for {}", resource.check_name());
                return Ok(decision);
            }
            self.metrics.record_cache_miss();
        }

        let merged = self
            .registry
            .merged_policies(resource.resource_type(), &resource.operation);

        let policy_ctx = PolicyContext {
            principal: ctx.principal(),
            roles,
            resource,
        };

        match self.evaluator.evaluate(&merged, &policy_ctx) {
            Ok(decision) => {
                if let Some(cache) = &self.cache {
                    cache.put(ctx.principal(), roles, resource, decision.clone());
                }
                self.metrics.record_decision(&decision, start.elapsed());
                Ok(decision)
            }
            Err(e) => {
                self.metrics.record_error();
                Err(e)
            }
        }
    }

    /// Settle a decision for one record, probing storage for a `Filter`
    ///
    /// The record is looked up in the collection registered for its type.
    ///
    /// # Errors
    ///
    /// `InvalidInput` without a record id; `Configuration` when no collection
    /// is registered for the type; `StorageProbeFailure` when the probe
    /// cannot be answered.
    pub async fn can_access_record(
        &self,
        ctx: &RequestContext,
        resource: &ResourceContext,
    ) -> Result<bool> {
        let record_id = resource.record_id().ok_or_else(|| {
            AuthzError::InvalidInput(format!("{} does not name a record", resource.check_name()))
        })?;

        let collection = self.collection_for_type(resource.resource_type()).ok_or_else(|| {
            AuthzError::Configuration(format!(
                "Unable to locate collection associated with resource type ({})",
                resource.resource_type()
            ))
        })?;

        let decision = self.can(ctx, resource)?;
        if decision.is_filter() {
            self.metrics.record_probe();
        }

        self.records
            .resolve_for_record(&decision, &collection, record_id)
            .await
    }

    /// Decision for an operation on a collection, without probing
    ///
    /// Ignored collections are granted. The params' record id, if any, is
    /// carried into the check but not resolved.
    pub fn collection_decision(
        &self,
        ctx: &RequestContext,
        collection: &str,
        operation: &str,
        params: Params,
    ) -> Result<Decision> {
        if self.is_ignored(collection) {
            debug!(
                "Collection ({}) is ignored, granting access for operation: {}",
                collection, operation
            );
            return Ok(Decision::Grant);
        }

        let resource_type = self.resource_type_for(collection).ok_or_else(|| {
            AuthzError::Configuration(format!(
                "Unable to locate resource type associated with collection ({})",
                collection
            ))
        })?;

        let resource = ResourceContext::new(resource_type, operation).with_params(params);
        self.can(ctx, &resource)
    }

    /// Decision for an operation on a collection
    ///
    /// When the params carry a record id a `Filter` is settled by probing,
    /// so the result is `Grant` or `Deny`.
    pub async fn can_access_collection(
        &self,
        ctx: &RequestContext,
        collection: &str,
        operation: &str,
        params: Params,
    ) -> Result<Decision> {
        let record_id = params.record_id.clone();
        let decision = self.collection_decision(ctx, collection, operation, params)?;

        match (&decision, record_id) {
            (Decision::Filter(_), Some(record_id)) => {
                self.metrics.record_probe();
                let found = self
                    .records
                    .resolve_for_record(&decision, collection, &record_id)
                    .await?;
                Ok(if found { Decision::Grant } else { Decision::Deny })
            }
            _ => Ok(decision),
        }
    }

    /// Map a collection to its resource type
    ///
    /// A type keeps the first collection registered for it until that
    /// collection is remapped to another type.
    pub fn register_resource_type(&self, collection: impl Into<String>, resource_type: impl Into<String>) {
        let collection = collection.into();
        let resource_type = resource_type.into();
        trace!("Registered collection {} as {}", collection, resource_type);

        let previous = self.collections.insert(collection.clone(), resource_type.clone());
        if let Some(previous) = previous.filter(|previous| *previous != resource_type) {
            self.collections_by_type
                .remove_if(&previous, |_, current| *current == collection);
            let replacement = self
                .collections
                .iter()
                .find(|entry| *entry.value() == previous)
                .map(|entry| entry.key().clone());
            if let Some(replacement) = replacement {
                self.collections_by_type.insert(previous, replacement);
            }
        }

        self.collections_by_type
            .entry(resource_type)
            .or_insert(collection);
    }

    /// Resource type registered for a collection
    pub fn resource_type_for(&self, collection: &str) -> Option<String> {
        self.collections.get(collection).map(|entry| entry.value().clone())
    }

    /// Collection registered for a type
    pub fn collection_for_type(&self, resource_type: &str) -> Option<String> {
        self.collections_by_type
            .get(resource_type)
            .map(|entry| entry.value().clone())
    }

    /// Stop checking permissions on a collection
    pub fn ignore_collection(&self, collection: impl Into<String>) {
        let collection = collection.into();
        if !self.ignored.contains(&collection) {
            info!("Ignoring permission checks on {}", collection);
            self.ignored.insert(collection);
        }
    }

    /// Resume checking permissions on a collection
    pub fn unignore_collection(&self, collection: &str) {
        if self.ignored.remove(collection).is_some() {
            info!("Adding back permission checks on {}", collection);
        }
    }

    pub fn is_ignored(&self, collection: &str) -> bool {
        self.ignored.contains(collection)
    }

    /// Turn the process-wide bypass on or off
    pub fn set_force_admin(&self, enabled: bool) {
        self.force_admin.store(enabled, Ordering::SeqCst);
        if enabled {
            warn!("force_admin enabled, all permission checks are bypassed");
        } else {
            info!("force_admin disabled");
        }
    }

    pub fn is_force_admin(&self) -> bool {
        self.force_admin.load(Ordering::SeqCst)
    }

    /// Whether the context's principal holds `role`
    pub fn is(&self, ctx: &RequestContext, role: &str) -> bool {
        ctx.is(&self.resolver, role)
    }

    /// Role listing for UIs
    pub fn role_options(&self, include_hidden: bool) -> IndexMap<RoleId, String> {
        self.resolver.role_options(include_hidden)
    }

    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// The raw store; queries through it are not permission checked
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(DecisionCache::stats)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            debug!("Decision cache cleared");
        }
    }
}

impl std::fmt::Debug for RbacEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RbacEngine")
            .field("collections", &self.collections.len())
            .field("ignored", &self.ignored.len())
            .field("cache", &self.cache)
            .field("force_admin", &self.is_force_admin())
            .finish_non_exhaustive()
    }
}
