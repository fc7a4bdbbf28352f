//! Named circuit breakers.
//!
//! # Responsibilities
//! - Hand out one breaker per name, created on first use
//! - Restore persisted state when a breaker is created
//! - Periodically snapshot every breaker to the store

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::persistence::{breaker_key, KvStore, PersistQueue};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};

/// Registry of circuit breakers keyed by name.
pub struct BreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerConfig,
    store: Option<Arc<dyn KvStore>>,
    persist: Option<PersistQueue>,
}

impl BreakerManager {
    /// Create a manager without persistence.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            store: None,
            persist: None,
        }
    }

    /// Restore from `store` on creation and write through `queue`.
    pub fn with_persistence(mut self, store: Arc<dyn KvStore>, queue: PersistQueue) -> Self {
        self.store = Some(store);
        self.persist = Some(queue);
        self
    }

    /// Existing breaker, without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|r| r.value().clone())
    }

    /// Breaker for `name` with the default configuration.
    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults.clone()).await
    }

    /// Breaker for `name`; `config` applies only if it does not exist yet.
    pub async fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breaker = CircuitBreaker::new(name, config);
        if let Some(queue) = &self.persist {
            breaker = breaker.with_persistence(queue.clone());
        }
        if let Some(snapshot) = self.load_snapshot(name).await {
            breaker.restore(snapshot);
        }

        // Another task may have won the race while we were loading.
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(breaker))
            .value()
            .clone()
    }

    async fn load_snapshot(&self, name: &str) -> Option<BreakerSnapshot> {
        let store = self.store.as_ref()?;
        match store.get(&breaker_key(name)).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(breaker = %name, error = %e, "Discarding unreadable breaker state");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(breaker = %name, error = %e, "Failed to load breaker state");
                None
            }
        }
    }

    /// All breakers, sorted by name.
    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut all: Vec<_> = self.breakers.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Snapshots of every breaker, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.all().iter().map(|b| b.snapshot()).collect()
    }

    /// Queue every breaker's state for persistence.
    pub fn persist_all(&self) {
        for breaker in self.all() {
            breaker.persist();
        }
    }

    /// Periodic snapshot loop; writes a final snapshot on shutdown.
    pub async fn run_persistence(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        if self.persist.is_none() {
            return;
        }
        let mut ticker = time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.persist_all();
                    tracing::debug!(count = self.breakers.len(), "Breaker state persisted");
                }
                _ = shutdown.recv() => {
                    self.persist_all();
                    break;
                }
            }
        }
        tracing::debug!("Breaker persistence loop stopped");
    }
}
