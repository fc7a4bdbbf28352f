//! Core construction and teardown.
//!
//! # Responsibilities
//! - Validate configuration and build every subsystem in dependency order
//! - Restore persisted registry and breaker state
//! - Start and stop the background loops
//!
//! # Design Decisions
//! - No global state: everything hangs off an explicitly built `Core`
//! - Snapshot loops stop before the write queue so final snapshots drain

use std::sync::Arc;
use std::time::Duration;

use crate::cache::FanoutCache;
use crate::config::loader::ConfigError;
use crate::config::validation::validate_config;
use crate::config::CoreConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::orchestrator::query::DEFAULT_REMOTE_TIMEOUT;
use crate::orchestrator::Orchestrator;
use crate::persistence::{KvStore, PersistQueue};
use crate::registry::{ServiceInstance, ServiceRegistry};
use crate::resilience::{BreakerManager, CircuitBreakerConfig};

/// Time allowed for each shutdown phase.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The running resilience and fan-out core.
pub struct Core {
    config: CoreConfig,
    store: Arc<dyn KvStore>,
    registry: Arc<ServiceRegistry>,
    breakers: Arc<BreakerManager>,
    orchestrator: Arc<Orchestrator>,
    /// Snapshot loops.
    loops: Shutdown,
    /// Persistence writer; stopped last.
    writer: Shutdown,
}

impl Core {
    /// Build the core and start its background loops.
    pub async fn init(config: CoreConfig, store: Arc<dyn KvStore>) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let loops = Shutdown::new();
        let writer = Shutdown::new();

        let (persist, writer_task) = PersistQueue::spawn(
            store.clone(),
            config.persistence.queue_capacity,
            config.persistence.max_concurrent_writes,
            writer.subscribe(),
        );
        writer.track("persist-writer", writer_task);

        let breakers = Arc::new(
            BreakerManager::new(CircuitBreakerConfig::from(&config.circuit_breaker))
                .with_persistence(store.clone(), persist.clone()),
        );

        let registry = Arc::new(ServiceRegistry::new(config.registry.clone()));
        registry.load_from(store.as_ref()).await;
        let breaker_timeout = Duration::from_secs(config.registry.breaker_timeout_secs);
        for svc in &config.services {
            let mut instance = ServiceInstance::new(&svc.id, &svc.name, &svc.host, svc.port)
                .with_version(&svc.version)
                .with_protocol(&svc.protocol)
                .with_breaker_timeout(breaker_timeout);
            if let Some(weight) = svc.weight {
                instance = instance.with_weight(weight);
            }
            registry.register_service(instance);
        }

        let cache = FanoutCache::with_remote(config.cache.clone(), store.clone());
        let orchestrator = Orchestrator::new(cache.clone(), registry.clone(), breakers.clone())
            .with_remote_timeout(
                config
                    .circuit_breaker
                    .call_timeout()
                    .unwrap_or(DEFAULT_REMOTE_TIMEOUT),
            );
        for remote in &config.remote_domains {
            orchestrator.register_remote(&remote.domain, &remote.service, &remote.path);
        }

        if config.health_check.enabled {
            registry.start_health_checking(config.health_check.clone()).await;
        }

        loops.track(
            "registry-snapshots",
            tokio::spawn(registry.clone().run_snapshots(
                persist.clone(),
                Duration::from_secs(config.registry.snapshot_interval_secs),
                loops.subscribe(),
            )),
        );
        loops.track(
            "breaker-snapshots",
            tokio::spawn(breakers.clone().run_persistence(
                Duration::from_secs(config.circuit_breaker.persist_interval_secs),
                loops.subscribe(),
            )),
        );
        loops.track("cache-sweeps", tokio::spawn(cache.run_sweeps(loops.subscribe())));

        tracing::info!(
            services = registry.list_services().len(),
            instances = registry.all_instances().len(),
            remote_domains = config.remote_domains.len(),
            strategy = ?config.registry.strategy,
            "Core initialized"
        );

        Ok(Self {
            config,
            store,
            registry,
            breakers,
            orchestrator: Arc::new(orchestrator),
            loops,
            writer,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn breakers(&self) -> Arc<BreakerManager> {
        self.breakers.clone()
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub fn cache(&self) -> FanoutCache {
        self.orchestrator.cache().clone()
    }

    /// Stop health checks, write final snapshots, drain the write queue.
    pub async fn shutdown(self) {
        tracing::info!("Core shutting down");
        self.registry.stop_health_checking().await;

        let stuck = self.loops.trigger_and_wait(SHUTDOWN_GRACE).await
            + self.writer.trigger_and_wait(SHUTDOWN_GRACE).await;
        if stuck > 0 {
            tracing::warn!(tasks = stuck, "Shutdown aborted unfinished tasks");
        }
        tracing::info!("Core shutdown complete");
    }
}
