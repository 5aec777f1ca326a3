//! Engine metrics: decision counters and latency

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::decision::Decision;

/// Snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineMetrics {
    /// Total number of permission checks
    pub total_checks: u64,

    /// Checks that granted unconditionally
    pub grants: u64,

    /// Checks that denied
    pub denies: u64,

    /// Checks that produced a row-level filter
    pub filters: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// Storage probes issued to settle a filter for one record
    pub probes: u64,

    /// Checks that failed with an error
    pub error_count: u64,

    /// Average check latency over the retained samples
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Share of decisions that were unconditional grants
    pub fn grant_rate(&self) -> f64 {
        let total = self.grants + self.denies + self.filters;
        if total == 0 {
            0.0
        } else {
            self.grants as f64 / total as f64
        }
    }
}

/// Thread-safe metrics collector
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Recent latency samples, oldest dropped first
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(1_000))),
            max_samples: 10_000,
        }
    }

    pub fn record_cache_hit(&self) {
        self.metrics.write().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.metrics.write().cache_misses += 1;
    }

    pub fn record_probe(&self) {
        self.metrics.write().probes += 1;
    }

    pub fn record_error(&self) {
        let mut metrics = self.metrics.write();
        metrics.total_checks += 1;
        metrics.error_count += 1;
    }

    /// Record a decision and its latency
    pub fn record_decision(&self, decision: &Decision, latency: Duration) {
        {
            let mut metrics = self.metrics.write();
            metrics.total_checks += 1;
            match decision {
                Decision::Grant => metrics.grants += 1,
                Decision::Deny => metrics.denies += 1,
                Decision::Filter(_) => metrics.filters += 1,
            }
        }
        self.record_latency(latency);
    }

    fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write();
        samples.push(latency_ms);
        if samples.len() > self.max_samples {
            samples.drain(0..self.max_samples / 10);
        }

        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        self.metrics.write().avg_latency_ms = avg;
    }

    /// Current metrics snapshot
    pub fn snapshot(&self) -> EngineMetrics {
        self.metrics.read().clone()
    }

    pub fn reset(&self) {
        *self.metrics.write() = EngineMetrics::default();
        self.latency_samples.write().clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
