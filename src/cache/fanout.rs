//! Deduplicated, cached, parallel domain execution.
//!
//! # Responsibilities
//! - Serve unexpired results from the local tier, then the remote tier
//! - Merge concurrent identical requests into one executor call
//! - Run a batch of domain queries concurrently with per-slot errors

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::cache::key::QueryRequest;
use crate::cache::stats::{CacheMetrics, CacheStats};
use crate::cache::store::{LocalTier, RemoteEntry};
use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::persistence::{KvStore, StoreError};
use crate::unix_millis;

/// Type-erased executor error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type ExecutorFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<Value, BoxError>> + Send>;
type SharedComputation = Shared<BoxFuture<'static, Result<Value, FanoutError>>>;

/// Failure of a single domain computation, shared by every deduplicated waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FanoutError {
    #[error("{domain}: {message}")]
    Executor { domain: String, message: String },

    /// The computation task panicked or was cancelled by the runtime.
    #[error("{domain}: computation aborted: {message}")]
    Aborted { domain: String, message: String },
}

/// One entry of a fan-out batch.
pub struct DomainQuery {
    pub domain: String,
    pub request: QueryRequest,
    executor: ExecutorFn,
}

impl DomainQuery {
    pub fn new<F, Fut, E>(domain: impl Into<String>, request: QueryRequest, executor: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        Self {
            domain: domain.into(),
            request,
            executor: Box::new(move || {
                async move { executor().await.map_err(Into::<BoxError>::into) }.boxed()
            }),
        }
    }
}

impl std::fmt::Debug for DomainQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainQuery")
            .field("domain", &self.domain)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Result slot of a fan-out batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainOutcome {
    pub domain: String,
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// In-flight marker; `id` tells a computation apart from a newer one for the same key.
#[derive(Clone)]
struct InFlight {
    id: u64,
    computation: SharedComputation,
}

/// Clears the in-flight marker when the computation task ends, unwinding included.
struct InFlightGuard {
    cache: FanoutCache,
    key: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let id = self.id;
        self.cache.inner.inflight.remove_if(&self.key, |_, f| f.id == id);
        metrics::record_inflight(self.cache.inner.inflight.len());
    }
}

struct Inner {
    local: LocalTier,
    remote: Option<Arc<dyn KvStore>>,
    inflight: DashMap<String, InFlight>,
    next_id: AtomicU64,
    ttl: ArcSwap<CacheConfig>,
    stats: CacheStats,
}

/// Fan-out cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FanoutCache {
    inner: Arc<Inner>,
}

impl FanoutCache {
    /// Local tier only.
    pub fn new(ttl: CacheConfig) -> Self {
        Self::build(ttl, None)
    }

    /// Local tier backed by a remote store.
    pub fn with_remote(ttl: CacheConfig, store: Arc<dyn KvStore>) -> Self {
        Self::build(ttl, Some(store))
    }

    fn build(ttl: CacheConfig, remote: Option<Arc<dyn KvStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                local: LocalTier::new(),
                remote,
                inflight: DashMap::new(),
                next_id: AtomicU64::new(0),
                ttl: ArcSwap::from_pointee(ttl),
                stats: CacheStats::default(),
            }),
        }
    }

    /// TTL currently applied to `domain`.
    pub fn ttl_for(&self, domain: &str) -> Duration {
        self.inner.ttl.load().ttl_for(domain)
    }

    /// Replace the TTL table. Existing entries keep their expiry.
    pub fn update_ttl_table(&self, ttl: CacheConfig) {
        tracing::info!(
            default_ttl_secs = ttl.default_ttl_secs,
            domains = ttl.domain_ttls.len(),
            "Cache TTL table updated"
        );
        self.inner.ttl.store(Arc::new(ttl));
    }

    /// Cached result for `request` in `domain`, computing it at most once.
    pub async fn get_cached<F, Fut, E>(
        &self,
        request: &QueryRequest,
        executor: F,
        domain: &str,
    ) -> Result<Value, FanoutError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let key = request.cache_key(domain);
        if let Some(value) = self.local_hit(&key, domain) {
            return Ok(value);
        }

        let computation = match self.inner.inflight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                self.inner.stats.record_join(domain);
                metrics::record_cache_lookup(domain, "joined");
                tracing::debug!(domain = %domain, "Joining in-flight computation");
                existing.get().computation.clone()
            }
            Entry::Vacant(slot) => {
                // The previous computation may have finished since the first lookup.
                if let Some(value) = self.local_hit(&key, domain) {
                    return Ok(value);
                }
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let computation = self.spawn_computation(id, key, request, domain, executor);
                slot.insert(InFlight {
                    id,
                    computation: computation.clone(),
                });
                computation
            }
        };
        metrics::record_inflight(self.inner.inflight.len());

        computation.await
    }

    fn local_hit(&self, key: &str, domain: &str) -> Option<Value> {
        let value = self.inner.local.get(key)?;
        self.inner.stats.record_hit(domain);
        metrics::record_cache_lookup(domain, "hit");
        Some(value)
    }

    /// Run the computation in its own task so dropped callers never cancel it.
    fn spawn_computation<F, Fut, E>(
        &self,
        id: u64,
        key: String,
        request: &QueryRequest,
        domain: &str,
        executor: F,
    ) -> SharedComputation
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let cache = self.clone();
        let task_domain = domain.to_string();
        let mut tags = request.tags.clone();
        if !tags.iter().any(|t| t == domain) {
            tags.push(domain.to_string());
        }

        let handle = tokio::spawn(async move {
            // Dropped after the result is stored, or while unwinding from a panic.
            let guard = InFlightGuard {
                cache: cache.clone(),
                key: key.clone(),
                id,
            };
            let result = cache.compute(&key, &task_domain, tags, executor).await;
            drop(guard);
            result
        });

        let domain = domain.to_string();
        async move {
            handle.await.unwrap_or_else(|e| {
                tracing::error!(domain = %domain, error = %e, "Fan-out computation aborted");
                Err(FanoutError::Aborted {
                    domain,
                    message: e.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    async fn compute<F, Fut, E>(
        &self,
        key: &str,
        domain: &str,
        tags: Vec<String>,
        executor: F,
    ) -> Result<Value, FanoutError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.remote_hit(key, domain).await {
            self.inner.stats.record_hit(domain);
            metrics::record_cache_lookup(domain, "hit");
            return Ok(value);
        }
        self.inner.stats.record_miss(domain);
        metrics::record_cache_lookup(domain, "miss");

        let started = Instant::now();
        let outcome = executor().await;
        let elapsed = started.elapsed();
        self.inner.stats.observe_latency(domain, elapsed);
        metrics::record_executor_duration(domain, elapsed);

        match outcome {
            Ok(value) => {
                self.store(key, domain, tags, &value).await;
                Ok(value)
            }
            Err(e) => {
                self.inner.stats.record_error(domain);
                tracing::warn!(domain = %domain, error = %e, "Domain executor failed");
                Err(FanoutError::Executor {
                    domain: domain.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Remote lookup; hits are promoted to the local tier.
    async fn remote_hit(&self, key: &str, domain: &str) -> Option<Value> {
        let store = self.inner.remote.as_ref()?;
        let bytes = match store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.degraded(domain, &e);
                return None;
            }
        };

        let entry: RemoteEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "Ignoring unreadable remote cache entry");
                return None;
            }
        };
        let remaining = entry.expires_at_ms.saturating_sub(unix_millis());
        if remaining == 0 {
            return None;
        }
        self.inner.local.insert(
            key,
            entry.value.clone(),
            entry.tags,
            Duration::from_millis(remaining),
        );
        Some(entry.value)
    }

    async fn store(&self, key: &str, domain: &str, tags: Vec<String>, value: &Value) {
        let ttl = self.ttl_for(domain);
        self.inner.local.insert(key, value.clone(), tags.clone(), ttl);

        let Some(store) = &self.inner.remote else {
            return;
        };
        let entry = RemoteEntry {
            value: value.clone(),
            tags,
            expires_at_ms: unix_millis() + ttl.as_millis() as u64,
        };
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.degraded(domain, &StoreError::from(e));
                return;
            }
        };
        if let Err(e) = store.set_with_ttl(key, bytes, ttl.as_secs().max(1)).await {
            self.degraded(domain, &e);
        }
    }

    fn degraded(&self, domain: &str, error: &StoreError) {
        self.inner.stats.record_degraded();
        metrics::record_cache_lookup(domain, "degraded");
        tracing::warn!(domain = %domain, error = %error, "Remote cache tier unavailable, continuing uncached");
    }

    /// Run every query concurrently. Outcomes come back in input order.
    pub async fn execute_parallel(&self, queries: Vec<DomainQuery>) -> Vec<DomainOutcome> {
        join_all(queries.into_iter().map(|query| async move {
            let DomainQuery {
                domain,
                request,
                executor,
            } = query;
            match self.get_cached(&request, executor, &domain).await {
                Ok(value) => DomainOutcome {
                    domain,
                    result: Some(value),
                    error: None,
                },
                Err(e) => DomainOutcome {
                    domain,
                    result: None,
                    error: Some(e.to_string()),
                },
            }
        }))
        .await
    }

    /// Drop every entry tagged with `domain`. Returns the number removed locally.
    pub async fn invalidate_domain(&self, domain: &str) -> usize {
        let keys = self.inner.local.invalidate_tag(domain);
        self.delete_remote(&keys).await;
        tracing::info!(domain = %domain, count = keys.len(), "Domain cache invalidated");
        keys.len()
    }

    /// Drop one query's entry. Returns true if it was cached locally.
    pub async fn invalidate_query(&self, request: &QueryRequest, domain: &str) -> bool {
        let key = request.cache_key(domain);
        let removed = self.inner.local.remove(&key);
        self.delete_remote(std::slice::from_ref(&key)).await;
        removed
    }

    async fn delete_remote(&self, keys: &[String]) {
        let Some(store) = &self.inner.remote else {
            return;
        };
        for key in keys {
            if let Err(e) = store.delete(key).await {
                self.inner.stats.record_degraded();
                tracing::warn!(error = %e, "Failed to delete remote cache entry");
            }
        }
    }

    /// Drop expired entries from both tiers. Returns the number removed locally.
    pub async fn purge_expired(&self) -> usize {
        let local = self.inner.local.purge_expired();
        let remote = match &self.inner.remote {
            Some(store) => match store.purge_expired().await {
                Ok(count) => count,
                Err(e) => {
                    self.inner.stats.record_degraded();
                    tracing::warn!(error = %e, "Failed to purge remote cache tier");
                    0
                }
            },
            None => 0,
        };
        if local + remote > 0 {
            tracing::debug!(local, remote, "Expired cache entries purged");
        }
        local
    }

    /// Periodic sweep loop; the interval is re-read from the TTL table each round.
    pub async fn run_sweeps(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let interval = Duration::from_secs(self.inner.ttl.load().sweep_interval_secs.max(1));
            tokio::select! {
                _ = time::sleep(interval) => {
                    self.purge_expired().await;
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Cache sweep loop stopped");
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.inner
            .stats
            .snapshot(self.inner.inflight.len(), self.inner.local.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time;

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: Value,
        delay: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, String>> + Send + 'static {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                time::sleep(delay).await;
                Ok(value)
            }
            .boxed()
        }
    }

    fn failing(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> BoxFuture<'static, Result<Value, String>> + Send + 'static {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_millis(20)).await;
                Err("backend exploded".to_string())
            }
            .boxed()
        }
    }

    /// Panics on its first call, succeeds afterwards.
    fn panics_first(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> BoxFuture<'static, Result<Value, String>> + Send + 'static {
        let calls = calls.clone();
        move || {
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("executor bug");
                }
                Ok(json!("recovered"))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("Restaurant");

        let first = cache
            .get_cached(&req, counting(&calls, json!({"code": "56101"}), Duration::ZERO), "kbli")
            .await
            .unwrap();
        let second = cache
            .get_cached(&QueryRequest::new("  restaurant"), counting(&calls, json!(null), Duration::ZERO), "kbli")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let m = cache.metrics();
        assert_eq!((m.hits, m.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_requests_share_one_call() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("bakery");

        let results = join_all((0..10).map(|_| {
            cache.get_cached(&req, counting(&calls, json!("ok"), Duration::from_millis(100)), "kbli")
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap() == &json!("ok")));
        let m = cache.metrics();
        assert_eq!(m.dedup_joins, 9);
        assert_eq!(m.inflight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_failure_is_not_cached() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("bakery");

        let results = join_all((0..3).map(|_| cache.get_cached(&req, failing(&calls), "pricing"))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = results[0].clone().unwrap_err();
        assert!(results.iter().all(|r| r.as_ref().unwrap_err() == &first));
        assert_eq!(
            first,
            FanoutError::Executor {
                domain: "pricing".into(),
                message: "backend exploded".into()
            }
        );

        // In-flight marker cleared, nothing cached: the next call runs again.
        assert_eq!(cache.metrics().inflight, 0);
        cache.get_cached(&req, failing(&calls), "pricing").await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.metrics().executor_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_domain_ttls() {
        let ttl = CacheConfig {
            default_ttl_secs: 600,
            domain_ttls: HashMap::from([("pricing".to_string(), 1800), ("kbli".to_string(), 3600)]),
            ..CacheConfig::default()
        };
        let cache = FanoutCache::new(ttl);
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("coffee shop");

        for domain in ["pricing", "kbli"] {
            cache.get_cached(&req, counting(&calls, json!(domain), Duration::ZERO), domain).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        time::advance(Duration::from_secs(10 * 60)).await;
        for domain in ["pricing", "kbli"] {
            cache.get_cached(&req, counting(&calls, json!(domain), Duration::ZERO), domain).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        time::advance(Duration::from_secs(51 * 60)).await;
        cache.get_cached(&req, counting(&calls, json!("kbli"), Duration::ZERO), "kbli").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_order() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("warehouse");

        let outcomes = cache
            .execute_parallel(vec![
                DomainQuery::new("a", req.clone(), counting(&calls, json!("A"), Duration::from_millis(30))),
                DomainQuery::new("b", req.clone(), failing(&calls)),
                DomainQuery::new("c", req.clone(), counting(&calls, json!("C"), Duration::from_millis(5))),
            ])
            .await;

        let domains: Vec<_> = outcomes.iter().map(|o| o.domain.as_str()).collect();
        assert_eq!(domains, ["a", "b", "c"]);
        assert_eq!(outcomes[0].result, Some(json!("A")));
        assert!(outcomes[1].result.is_none());
        assert!(outcomes[1].error.as_deref().unwrap().contains("backend exploded"));
        assert_eq!(outcomes[2].result, Some(json!("C")));
        assert!(outcomes[0].is_success() && outcomes[2].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_computation_survives_dropped_caller() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("slow");

        let abandoned = time::timeout(
            Duration::from_millis(10),
            cache.get_cached(&req, counting(&calls, json!(1), Duration::from_millis(100)), "kbli"),
        )
        .await;
        assert!(abandoned.is_err());

        time::sleep(Duration::from_millis(200)).await;
        let value = cache
            .get_cached(&req, counting(&calls, json!(2), Duration::ZERO), "kbli")
            .await
            .unwrap();
        assert_eq!(value, json!(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_offline_store_degrades_to_uncached() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let cache = FanoutCache::with_remote(CacheConfig::default(), Arc::new(store));
        let calls = Arc::new(AtomicUsize::new(0));

        let value = cache
            .get_cached(&QueryRequest::new("q"), counting(&calls, json!("v"), Duration::ZERO), "pricing")
            .await
            .unwrap();
        assert_eq!(value, json!("v"));
        // Failed read and failed write.
        assert_eq!(cache.metrics().store_degraded, 2);
    }

    #[tokio::test]
    async fn test_remote_tier_shared_between_caches() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("q");

        let first = FanoutCache::with_remote(CacheConfig::default(), store.clone());
        first.get_cached(&req, counting(&calls, json!("v"), Duration::ZERO), "regulatory").await.unwrap();
        assert_eq!(store.len(), 1);

        let second = FanoutCache::with_remote(CacheConfig::default(), store.clone());
        let value = second
            .get_cached(&req, counting(&calls, json!("other"), Duration::ZERO), "regulatory")
            .await
            .unwrap();
        assert_eq!(value, json!("v"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Promoted locally.
        assert_eq!(second.metrics().local_entries, 1);
    }

    #[tokio::test]
    async fn test_invalidation() {
        let store = Arc::new(MemoryStore::new());
        let cache = FanoutCache::with_remote(CacheConfig::default(), store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        for q in ["a", "b"] {
            cache
                .get_cached(&QueryRequest::new(q), counting(&calls, json!(q), Duration::ZERO), "kbli")
                .await
                .unwrap();
        }
        cache
            .get_cached(&QueryRequest::new("a"), counting(&calls, json!("p"), Duration::ZERO), "pricing")
            .await
            .unwrap();

        assert_eq!(cache.invalidate_domain("kbli").await, 2);
        assert_eq!(store.len(), 1);
        assert!(cache.invalidate_query(&QueryRequest::new("A "), "pricing").await);
        assert!(!cache.invalidate_query(&QueryRequest::new("a"), "pricing").await);
        assert!(store.is_empty());
        assert_eq!(cache.metrics().local_entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_table_hot_swap() {
        let cache = FanoutCache::new(CacheConfig::default());
        assert_eq!(cache.ttl_for("pricing"), Duration::from_secs(1800));

        cache.update_ttl_table(CacheConfig {
            default_ttl_secs: 5,
            domain_ttls: HashMap::new(),
            ..CacheConfig::default()
        });
        assert_eq!(cache.ttl_for("pricing"), Duration::from_secs(5));

        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("q");
        cache.get_cached(&req, counting(&calls, json!(1), Duration::ZERO), "pricing").await.unwrap();
        time::advance(Duration::from_secs(6)).await;
        cache.get_cached(&req, counting(&calls, json!(1), Duration::ZERO), "pricing").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ewma_tracked_per_domain() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .get_cached(&QueryRequest::new("q"), counting(&calls, json!(1), Duration::ZERO), "session")
            .await
            .unwrap();
        let m = cache.metrics();
        assert!(m.domains["session"].avg_response_ms.is_some());
        assert_eq!(m.domains["session"].misses, 1);
    }

    #[tokio::test]
    async fn test_panicking_executor_releases_its_key() {
        let cache = FanoutCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let req = QueryRequest::new("warung kopi");

        let first = cache.get_cached(&req, panics_first(&calls), "kbli").await;
        assert!(matches!(first, Err(FanoutError::Aborted { .. })), "got {first:?}");
        assert_eq!(cache.metrics().inflight, 0);

        let second = cache.get_cached(&req, panics_first(&calls), "kbli").await;
        assert_eq!(second, Ok(json!("recovered")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_purges_both_tiers() {
        let store = MemoryStore::new();
        let cache = FanoutCache::with_remote(
            CacheConfig {
                default_ttl_secs: 1,
                domain_ttls: HashMap::new(),
                sweep_interval_secs: 5,
            },
            Arc::new(store.clone()),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let req = QueryRequest::new(format!("query {i}"));
            cache.get_cached(&req, counting(&calls, json!(i), Duration::ZERO), "session").await.unwrap();
        }
        assert_eq!(cache.metrics().local_entries, 10);

        let (tx, rx) = broadcast::channel(1);
        let sweeper = tokio::spawn(cache.clone().run_sweeps(rx));

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.metrics().local_entries, 0);
        assert_eq!(store.purge_expired().await.unwrap(), 0);

        tx.send(()).unwrap();
        sweeper.await.unwrap();
    }
}
