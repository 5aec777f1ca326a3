//! Storage collaborator contract and an in-memory implementation
//!
//! The engine never talks to a database driver directly. Everything it
//! needs from storage is expressed through [`RecordStore`]: narrowing a query
//! with a predicate, probing one record under a predicate and counting.

use crate::error::{AuthzError, Result};
use crate::predicate::Predicate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// A query against one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Collection name
    pub collection: String,

    /// Caller's own condition; `None` selects everything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Predicate>,

    /// When false the guard passes the query through unchecked
    #[serde(default = "default_check_permissions")]
    pub check_permissions: bool,
}

fn default_check_permissions() -> bool {
    true
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            condition: None,
            check_permissions: true,
        }
    }

    pub fn with_condition(mut self, condition: Predicate) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Skip permission checks for this query (internal lookups)
    pub fn unchecked(mut self) -> Self {
        self.check_permissions = false;
        self
    }

    /// Whether a document satisfies the condition
    pub fn matches(&self, document: &Value) -> bool {
        self.condition
            .as_ref()
            .map(|condition| condition.matches(document))
            .unwrap_or(true)
    }
}

/// Storage operations the engine relies on
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Narrow a query with a permission predicate (AND)
    fn apply_filter(&self, query: Query, predicate: &Predicate) -> Query {
        let condition = match query.condition {
            Some(existing) => existing.and(predicate.clone()),
            None => predicate.clone(),
        };
        Query {
            condition: Some(condition),
            ..query
        }
    }

    /// Whether the record with `record_id` exists and satisfies `predicate`
    async fn probe_exists(&self, collection: &str, record_id: &str, predicate: &Predicate) -> Result<bool>;

    /// Number of records matching the query
    async fn count(&self, query: &Query) -> Result<u64>;

    /// Records matching the query
    async fn find(&self, query: &Query) -> Result<Vec<Value>>;
}

/// In-memory document store, keyed by collection
///
/// Records are JSON objects; the identity attribute defaults to `id`.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Value>>>>,
    id_field: String,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            id_field: "id".to_string(),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use a different identity attribute (e.g. `_id`)
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Add a document to a collection
    pub async fn insert(&self, collection: impl Into<String>, document: Value) -> Result<()> {
        if !document.is_object() {
            return Err(AuthzError::InvalidInput(
                "documents must be JSON objects".to_string(),
            ));
        }
        let mut collections = self.collections.write().await;
        collections.entry(collection.into()).or_default().push(document);
        Ok(())
    }

    /// Simulate an outage: every operation fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::StorageProbeFailure(
                "memory store is unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn has_id(&self, document: &Value, record_id: &str) -> bool {
        match document.get(&self.id_field) {
            Some(Value::String(id)) => id == record_id,
            Some(other) => other.to_string() == record_id,
            None => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn probe_exists(&self, collection: &str, record_id: &str, predicate: &Predicate) -> Result<bool> {
        self.check_available()?;
        let collections = self.collections.read().await;

        let found = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .any(|doc| self.has_id(doc, record_id) && predicate.matches(doc))
            })
            .unwrap_or(false);

        trace!("Probe {}#{} under {}: {}", collection, record_id, predicate, found);
        Ok(found)
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        self.check_available()?;
        let collections = self.collections.read().await;

        Ok(collections
            .get(&query.collection)
            .map(|docs| docs.iter().filter(|doc| query.matches(doc)).count() as u64)
            .unwrap_or(0))
    }

    async fn find(&self, query: &Query) -> Result<Vec<Value>> {
        self.check_available()?;
        let collections = self.collections.read().await;

        Ok(collections
            .get(&query.collection)
            .map(|docs| docs.iter().filter(|doc| query.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("notes", json!({"id": "n1", "ownerId": "U1"})).await.unwrap();
        store.insert("notes", json!({"id": "n2", "ownerId": "U2"})).await.unwrap();
        store.insert("notes", json!({"id": "n3", "ownerId": "U1", "status": "draft"})).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_find_and_count() {
        let store = seeded().await;
        let all = Query::new("notes");
        assert_eq!(store.count(&all).await.unwrap(), 3);

        let mine = store.apply_filter(all, &Predicate::eq("ownerId", "U1"));
        assert_eq!(store.count(&mine).await.unwrap(), 2);
        assert_eq!(store.find(&mine).await.unwrap().len(), 2);

        assert_eq!(store.count(&Query::new("missing")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_apply_filter_ands_existing_condition() {
        let store = seeded().await;
        let query = Query::new("notes").with_condition(Predicate::eq("status", "draft"));
        let scoped = store.apply_filter(query, &Predicate::eq("ownerId", "U1"));

        assert_eq!(
            scoped.condition,
            Some(Predicate::And(vec![
                Predicate::eq("status", "draft"),
                Predicate::eq("ownerId", "U1"),
            ]))
        );
        assert_eq!(store.count(&scoped).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_probe_exists() {
        let store = seeded().await;
        let owned_by_u1 = Predicate::eq("ownerId", "U1");
        assert!(store.probe_exists("notes", "n1", &owned_by_u1).await.unwrap());
        assert!(!store.probe_exists("notes", "n2", &owned_by_u1).await.unwrap());
        assert!(!store.probe_exists("notes", "n9", &owned_by_u1).await.unwrap());
        assert!(!store.probe_exists("notes", "n1", &Predicate::Nothing).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = seeded().await;
        store.set_unavailable(true);

        let err = store
            .probe_exists("notes", "n1", &Predicate::eq("ownerId", "U1"))
            .await
            .unwrap_err();
        assert!(err.is_storage_failure());

        store.set_unavailable(false);
        assert!(store.count(&Query::new("notes")).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_id_field() {
        let store = MemoryStore::new().with_id_field("_id");
        store.insert("invoices", json!({"_id": 7, "total": 10})).await.unwrap();
        assert!(store
            .probe_exists("invoices", "7", &Predicate::eq("total", 10))
            .await
            .unwrap());
        assert!(store.insert("invoices", json!([1, 2])).await.is_err());
    }
}
