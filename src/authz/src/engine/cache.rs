//! Decision cache with TTL expiry and BLAKE3 keys

use super::decision::Decision;
use crate::types::{Principal, ResourceContext, RoleSet};
use blake3::Hasher;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache decisions at all
    pub enabled: bool,

    /// Maximum number of entries in the cache
    pub capacity: usize,

    /// Time-to-live for cached decisions, in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 10_000,
            ttl_secs: 60,
        }
    }
}

/// Cache key type (BLAKE3 hash)
type CacheKey = [u8; 32];

#[derive(Clone)]
struct CachedEntry {
    decision: Decision,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Memoizes decisions per principal, role set, resource, operation and params
///
/// The full resolved role set is part of the key, so entries never leak
/// between principals or across a login within one request.
pub struct DecisionCache {
    entries: Arc<DashMap<CacheKey, CachedEntry>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl DecisionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: config.ttl(),
            capacity: config.capacity.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    /// Get a cached decision
    pub fn get(
        &self,
        principal: Option<&Principal>,
        roles: &RoleSet,
        resource: &ResourceContext,
    ) -> Option<Decision> {
        let key = Self::compute_key(principal, roles, resource);

        if let Some(entry) = self.entries.get(&key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.entries.remove(&key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.decision.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a decision
    pub fn put(
        &self,
        principal: Option<&Principal>,
        roles: &RoleSet,
        resource: &ResourceContext,
        decision: Decision,
    ) {
        let key = Self::compute_key(principal, roles, resource);

        if self.entries.len() >= self.capacity {
            self.evict();
        }

        self.entries.insert(key, CachedEntry::new(decision));
    }

    /// Drop every entry and reset the counters
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.capacity,
        }
    }

    fn compute_key(
        principal: Option<&Principal>,
        roles: &RoleSet,
        resource: &ResourceContext,
    ) -> CacheKey {
        let mut hasher = Hasher::new();

        // Length-prefix every field so adjacent strings cannot collide
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        match principal {
            Some(principal) => field(principal.id.as_bytes()),
            None => field(b"\0anonymous"),
        }

        // RoleSet is ordered
        for role in roles {
            field(role.as_bytes());
        }

        field(resource.resource_type().as_bytes());
        field(resource.record_id().unwrap_or_default().as_bytes());
        field(resource.operation.as_bytes());

        // serde_json maps are sorted, so this is stable
        match serde_json::to_vec(&resource.params) {
            Ok(bytes) => field(&bytes),
            Err(_) => field(b"\0params"),
        }

        *hasher.finalize().as_bytes()
    }

    /// Drop expired entries, then the oldest tenth if still full
    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));

        if self.entries.len() < self.capacity {
            return;
        }

        let mut by_age: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().cached_at))
            .collect();
        by_age.sort_by_key(|(_, cached_at)| *cached_at);

        let to_remove = (self.capacity / 10).max(1);
        for (key, _) in by_age.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
        trace!("Evicted {} cached decisions", to_remove);
    }
}

impl std::fmt::Debug for DecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionCache")
            .field("entries", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Predicate;
    use crate::types::Params;

    fn roles(items: &[&str]) -> RoleSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn enabled(ttl_secs: u64, capacity: usize) -> DecisionCache {
        DecisionCache::new(&CacheConfig {
            enabled: true,
            capacity,
            ttl_secs,
        })
    }

    #[test]
    fn test_cache_put_get() {
        let cache = enabled(60, 100);
        let principal = Principal::new("U1");
        let held = roles(&["public", "registered"]);
        let resource = ResourceContext::new("Note", "find");
        let decision = Decision::Filter(Predicate::eq("ownerId", "U1"));

        assert!(cache.get(Some(&principal), &held, &resource).is_none());
        cache.put(Some(&principal), &held, &resource, decision.clone());
        assert_eq!(cache.get(Some(&principal), &held, &resource), Some(decision));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_key_separates_principals_roles_and_params() {
        let cache = enabled(60, 100);
        let held = roles(&["registered"]);
        let resource = ResourceContext::new("Note", "find");
        cache.put(Some(&Principal::new("U1")), &held, &resource, Decision::Grant);

        assert!(cache.get(Some(&Principal::new("U2")), &held, &resource).is_none());
        assert!(cache.get(None, &held, &resource).is_none());
        assert!(cache
            .get(Some(&Principal::new("U1")), &roles(&["registered", "admin"]), &resource)
            .is_none());

        let with_params = resource.clone().with_params(Params::new().with_extra("day", "mon"));
        assert!(cache.get(Some(&Principal::new("U1")), &held, &with_params).is_none());
        assert!(cache.get(Some(&Principal::new("U1")), &held, &resource).is_some());
    }

    #[test]
    fn test_zero_ttl_expires() {
        let cache = enabled(0, 100);
        let held = roles(&["public"]);
        let resource = ResourceContext::new("Note", "find");
        cache.put(None, &held, &resource, Decision::Deny);

        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(None, &held, &resource).is_none());
        assert!(cache.stats().expirations > 0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = enabled(60, 10);
        let held = roles(&["public"]);
        for i in 0..50 {
            let resource = ResourceContext::instance("Note", format!("n{}", i), "find");
            cache.put(None, &held, &resource, Decision::Grant);
        }
        assert!(cache.stats().entries <= 10);
    }

    #[test]
    fn test_cache_clear() {
        let cache = enabled(60, 100);
        cache.put(None, &roles(&["public"]), &ResourceContext::new("Note", "find"), Decision::Grant);
        assert_eq!(cache.stats().entries, 1);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
