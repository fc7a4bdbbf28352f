//! Fan-out cache statistics.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Smoothing factor for executor response time.
pub const EWMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainMetrics {
    pub hits: u64,
    pub misses: u64,
    pub dedup_joins: u64,
    pub errors: u64,
    /// Exponentially weighted executor response time.
    pub avg_response_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Hits over lookups, in percent. 0 when nothing was looked up.
    pub hit_rate: f64,
    pub dedup_joins: u64,
    pub executor_errors: u64,
    /// Remote tier failures that fell back to uncached execution.
    pub store_degraded: u64,
    pub inflight: usize,
    pub local_entries: usize,
    pub domains: BTreeMap<String, DomainMetrics>,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    errors: AtomicU64,
    degraded: AtomicU64,
    domains: DashMap<String, DomainMetrics>,
}

impl CacheStats {
    fn domain(&self, domain: &str, update: impl FnOnce(&mut DomainMetrics)) {
        match self.domains.get_mut(domain) {
            Some(mut entry) => update(&mut entry),
            None => update(&mut self.domains.entry(domain.to_string()).or_default()),
        }
    }

    pub fn record_hit(&self, domain: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.domain(domain, |d| d.hits += 1);
    }

    pub fn record_miss(&self, domain: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.domain(domain, |d| d.misses += 1);
    }

    pub fn record_join(&self, domain: &str) {
        self.joins.fetch_add(1, Ordering::Relaxed);
        self.domain(domain, |d| d.dedup_joins += 1);
    }

    pub fn record_error(&self, domain: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.domain(domain, |d| d.errors += 1);
    }

    pub fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, domain: &str, elapsed: Duration) {
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.domain(domain, |d| {
            d.avg_response_ms = Some(match d.avg_response_ms {
                Some(avg) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * avg,
                None => sample,
            });
        });
    }

    pub fn snapshot(&self, inflight: usize, local_entries: usize) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheMetrics {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 * 100.0 / lookups as f64
            },
            dedup_joins: self.joins.load(Ordering::Relaxed),
            executor_errors: self.errors.load(Ordering::Relaxed),
            store_degraded: self.degraded.load(Ordering::Relaxed),
            inflight,
            local_entries,
            domains: self
                .domains
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewma() {
        let stats = CacheStats::default();
        stats.observe_latency("kbli", Duration::from_millis(100));
        stats.observe_latency("kbli", Duration::from_millis(200));

        let m = stats.snapshot(0, 0);
        let avg = m.domains["kbli"].avg_response_ms.unwrap();
        // 0.2 * 200 + 0.8 * 100
        assert!((avg - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::default();
        assert_eq!(stats.snapshot(0, 0).hit_rate, 0.0);

        stats.record_hit("kbli");
        stats.record_hit("pricing");
        stats.record_hit("pricing");
        stats.record_miss("pricing");

        let m = stats.snapshot(0, 0);
        assert_eq!(m.hit_rate, 75.0);
        assert_eq!(m.domains["pricing"].hits, 2);
        assert_eq!(m.domains["pricing"].misses, 1);
        assert_eq!(m.domains["kbli"].misses, 0);
    }
}
