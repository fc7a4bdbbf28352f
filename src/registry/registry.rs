//! Service registry.
//!
//! # Responsibilities
//! - Keep instances grouped by logical service name, indexed by id
//! - Select an eligible instance using the configured strategy
//! - Route success/failure reports to the instance failure record
//! - Own the health-check loop and registry snapshots

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::{HealthCheckConfig, RegistryConfig};
use crate::health::active::HealthMonitor;
use crate::observability::metrics;
use crate::persistence::{
    KvStore, PersistQueue, REGISTRY_KEY, REGISTRY_SNAPSHOT_TTL_SECS,
};
use crate::registry::instance::{HealthState, InstanceRecord, ServiceInstance};
use crate::registry::{balancer_for, LoadBalancer};
use crate::resilience::CircuitState;
use crate::unix_millis;

/// Aggregate health of one logical service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ServiceHealth {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub breakers_open: usize,
}

/// Persisted registry contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub taken_at: u64,
    pub instances: Vec<InstanceRecord>,
}

struct HealthTask {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Instances of every logical service plus the selection strategy.
pub struct ServiceRegistry {
    /// Service name -> instances, in registration order.
    services: DashMap<String, Vec<Arc<ServiceInstance>>>,
    /// Instance id -> service name.
    index: DashMap<String, String>,
    balancer: Box<dyn LoadBalancer>,
    config: RegistryConfig,
    health_task: Mutex<Option<HealthTask>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .field("instances", &self.index.len())
            .field("balancer", &self.balancer)
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            services: DashMap::new(),
            index: DashMap::new(),
            balancer: balancer_for(config.strategy),
            config,
            health_task: Mutex::new(None),
        }
    }

    /// Failures needed to open an instance breaker.
    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    /// Add or replace an instance (matched by id).
    pub fn register_service(&self, instance: ServiceInstance) -> Arc<ServiceInstance> {
        let instance = Arc::new(instance);
        let id = instance.id.clone();
        let name = instance.name.clone();

        // Drop any previous registration, possibly under another name.
        if let Some(previous) = self.remove_from_bucket(&id) {
            instance.inherit_state(&previous);
        }

        self.services
            .entry(name.clone())
            .or_default()
            .push(instance.clone());
        self.index.insert(id.clone(), name.clone());

        tracing::info!(
            service = %name,
            instance = %id,
            host = %instance.host,
            port = instance.port,
            "Service instance registered"
        );
        instance
    }

    /// Remove an instance. Unknown ids are ignored.
    pub fn unregister_service(&self, id: &str) -> bool {
        match self.remove_from_bucket(id) {
            Some(removed) => {
                tracing::info!(service = %removed.name, instance = %id, "Service instance unregistered");
                true
            }
            None => false,
        }
    }

    fn remove_from_bucket(&self, id: &str) -> Option<Arc<ServiceInstance>> {
        let (_, name) = self.index.remove(id)?;
        let removed = {
            let mut bucket = self.services.get_mut(&name)?;
            let pos = bucket.iter().position(|i| i.id == id)?;
            bucket.remove(pos)
        };
        self.services.remove_if(&name, |_, bucket| bucket.is_empty());
        Some(removed)
    }

    /// Pick an eligible instance of `name`.
    pub fn get_service_instance(&self, name: &str) -> Option<Arc<ServiceInstance>> {
        let candidates: Vec<Arc<ServiceInstance>> = match self.services.get(name) {
            Some(bucket) => bucket.iter().filter(|i| i.is_eligible()).cloned().collect(),
            None => {
                tracing::debug!(service = %name, "Service not registered");
                return None;
            }
        };

        let selected = self.balancer.next_instance(name, &candidates);
        if selected.is_none() {
            tracing::debug!(service = %name, "No eligible instances");
        }
        selected
    }

    /// Direct lookup by id, eligible or not.
    pub fn get_service_instance_by_id(&self, id: &str) -> Option<Arc<ServiceInstance>> {
        let name = self.index.get(id)?.value().clone();
        let bucket = self.services.get(&name)?;
        bucket.iter().find(|i| i.id == id).cloned()
    }

    pub fn record_success(&self, id: &str) {
        if let Some(instance) = self.get_service_instance_by_id(id) {
            if instance.record_success() {
                tracing::info!(service = %instance.name, instance = %id, "Instance breaker closed");
            }
        }
    }

    pub fn record_failure(&self, id: &str) {
        if let Some(instance) = self.get_service_instance_by_id(id) {
            if instance.record_failure(self.config.failure_threshold) {
                tracing::warn!(
                    service = %instance.name,
                    instance = %id,
                    failures = instance.failures(),
                    "Instance breaker opened"
                );
            }
        }
    }

    /// Apply one health probe outcome.
    pub fn apply_probe_result(&self, instance: &ServiceInstance, healthy: bool) {
        let state = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        if instance.set_health(state) {
            tracing::info!(
                service = %instance.name,
                instance = %instance.id,
                health = ?state,
                "Instance health changed"
            );
        }
        metrics::record_instance_health(&instance.name, &instance.id, healthy);

        if healthy {
            if instance.breaker_timeout_elapsed() && instance.record_success() {
                tracing::info!(
                    service = %instance.name,
                    instance = %instance.id,
                    "Instance breaker closed after successful probe"
                );
            }
        } else {
            self.record_failure(&instance.id);
        }
    }

    pub fn get_service_health(&self, name: &str) -> ServiceHealth {
        let Some(bucket) = self.services.get(name) else {
            return ServiceHealth::default();
        };
        let mut health = ServiceHealth {
            total: bucket.len(),
            ..ServiceHealth::default()
        };
        for instance in bucket.iter() {
            match instance.health() {
                HealthState::Healthy => health.healthy += 1,
                HealthState::Unhealthy => health.unhealthy += 1,
                HealthState::Unknown => {}
            }
            if instance.breaker_state() == CircuitState::Open {
                health.breakers_open += 1;
            }
        }
        health
    }

    /// Registered service names, sorted.
    pub fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Every instance (for health checking and diagnostics).
    pub fn all_instances(&self) -> Vec<Arc<ServiceInstance>> {
        let mut all: Vec<Arc<ServiceInstance>> = self
            .services
            .iter()
            .flat_map(|r| r.value().clone())
            .collect();
        all.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));
        all
    }

    // --- Health checking ---

    /// Start the periodic probe loop. Replaces a running loop.
    pub async fn start_health_checking(self: &Arc<Self>, config: HealthCheckConfig) {
        self.stop_health_checking().await;

        let (stop, rx) = broadcast::channel(1);
        let monitor = HealthMonitor::new(self.clone(), config);
        let handle = tokio::spawn(monitor.run(rx));
        *self.health_task.lock() = Some(HealthTask { stop, handle });
    }

    /// Stop the probe loop and wait for it to exit.
    pub async fn stop_health_checking(&self) {
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            let _ = task.stop.send(());
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "Health check task ended abnormally");
            }
        }
    }

    pub fn is_health_checking(&self) -> bool {
        self.health_task.lock().is_some()
    }

    // --- Snapshots ---

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            taken_at: unix_millis(),
            instances: self.all_instances().iter().map(|i| i.record()).collect(),
        }
    }

    /// Re-register every instance of a snapshot with its health and breaker.
    pub fn restore(&self, snapshot: RegistrySnapshot) -> usize {
        let count = snapshot.instances.len();
        for record in snapshot.instances {
            let instance = Arc::new(ServiceInstance::from_record(record));
            self.remove_from_bucket(&instance.id);
            self.index.insert(instance.id.clone(), instance.name.clone());
            self.services
                .entry(instance.name.clone())
                .or_default()
                .push(instance);
        }
        count
    }

    /// Load the persisted snapshot, if any.
    pub async fn load_from(&self, store: &dyn KvStore) -> usize {
        match store.get(REGISTRY_KEY).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<RegistrySnapshot>(&bytes) {
                Ok(snapshot) => {
                    let count = self.restore(snapshot);
                    tracing::info!(instances = count, "Registry restored from store");
                    count
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable registry snapshot");
                    0
                }
            },
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load registry snapshot");
                0
            }
        }
    }

    pub fn persist(&self, queue: &PersistQueue) {
        queue.enqueue_json(REGISTRY_KEY, &self.snapshot(), REGISTRY_SNAPSHOT_TTL_SECS);
    }

    /// Periodic snapshot loop; writes a final snapshot on shutdown.
    pub async fn run_snapshots(
        self: Arc<Self>,
        queue: PersistQueue,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.persist(&queue),
                _ = shutdown.recv() => {
                    self.persist(&queue);
                    break;
                }
            }
        }
        tracing::debug!("Registry snapshot loop stopped");
    }
}
