//! Storage-facing permission guard
//!
//! Wraps reads and writes on a [`RecordStore`] with the engine's decisions:
//! reads are narrowed (a denied read returns nothing), writes are refused
//! with [`AuthzError::PermissionDenied`].

use crate::engine::{Decision, RbacEngine, RequestContext};
use crate::error::{AuthzError, Result};
use crate::predicate::Predicate;
use crate::store::Query;
use crate::types::{operation, Params};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Permission-checked access to collections
#[derive(Debug, Clone)]
pub struct CollectionGuard {
    engine: Arc<RbacEngine>,
}

impl CollectionGuard {
    pub fn new(engine: Arc<RbacEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &RbacEngine {
        &self.engine
    }

    /// Rewrite a query so it only selects records the caller may read
    ///
    /// `Grant` leaves it unchanged, `Deny` replaces the condition with one
    /// that matches nothing and `Filter(p)` ANDs `p` onto it.
    pub fn scope_query(&self, ctx: &RequestContext, query: Query, params: Params) -> Result<Query> {
        if !query.check_permissions {
            trace!("Permission checks disabled on this query for {}", query.collection);
            return Ok(query);
        }

        let decision =
            self.engine
                .collection_decision(ctx, &query.collection, operation::FIND, params)?;

        Ok(match decision {
            Decision::Grant => query,
            Decision::Deny => {
                debug!("Read on {} denied, query will match nothing", query.collection);
                Query {
                    condition: Some(Predicate::Nothing),
                    ..query
                }
            }
            Decision::Filter(predicate) => self.engine.store().apply_filter(query, &predicate),
        })
    }

    /// Permission-checked find
    pub async fn find(&self, ctx: &RequestContext, query: Query, params: Params) -> Result<Vec<Value>> {
        let scoped = self.scope_query(ctx, query, params)?;
        if scoped.condition == Some(Predicate::Nothing) {
            return Ok(Vec::new());
        }
        self.engine.store().find(&scoped).await
    }

    /// Permission-checked count; a denied read counts zero without a query
    pub async fn count(&self, ctx: &RequestContext, query: Query, params: Params) -> Result<u64> {
        let scoped = self.scope_query(ctx, query, params)?;
        if scoped.condition == Some(Predicate::Nothing) {
            return Ok(0);
        }
        self.engine.store().count(&scoped).await
    }

    /// Authorize a write (`insert`, `update`, `delete`, `save` or custom)
    ///
    /// With a record id in the params a `Filter` is settled by probing;
    /// without one it stays unresolved and is refused.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` on a deny or an unresolved filter;
    /// `StorageProbeFailure` when the probe fails.
    pub async fn authorize_write(
        &self,
        ctx: &RequestContext,
        collection: &str,
        operation: &str,
        params: Params,
    ) -> Result<()> {
        let decision = self
            .engine
            .can_access_collection(ctx, collection, operation, params)
            .await?;

        match decision {
            Decision::Grant => Ok(()),
            Decision::Deny | Decision::Filter(_) => {
                let resource_type = self
                    .engine
                    .resource_type_for(collection)
                    .unwrap_or_else(|| collection.to_string());
                debug!("{} on {} refused ({})", operation, collection, decision.label());
                Err(AuthzError::denied(resource_type, operation))
            }
        }
    }
}
