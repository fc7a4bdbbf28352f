//! Service registry and load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! register_service(instance) → registry.rs (bucket by service name, index by id)
//!
//! get_service_instance(name)
//!     → registry.rs (collect eligible: healthy + breaker closed)
//!     → Apply load balancing strategy:
//!         - round_robin.rs (per-service cursor)
//!         - random.rs (uniform pick)
//!         - weighted.rs (cumulative weight sampling)
//!     → instance or None
//!
//! record_success / record_failure / health probes
//!     → instance.rs (health flag + embedded failure record)
//! ```
//!
//! # Design Decisions
//! - Strategy is chosen once per registry from configuration
//! - Ineligible instances are filtered before the strategy runs
//! - Per-instance state uses atomics and a short mutex, never held across await

pub mod instance;
pub mod random;
#[allow(clippy::module_inception)]
pub mod registry;
pub mod round_robin;
pub mod weighted;

use std::sync::Arc;

use crate::config::LoadBalancingStrategy;

pub use instance::{HealthState, InstanceRecord, ServiceInstance};
pub use registry::{RegistrySnapshot, ServiceHealth, ServiceRegistry};

/// Trait for load balancing algorithms.
///
/// `candidates` holds only eligible instances of `service`.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_instance(
        &self,
        service: &str,
        candidates: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>>;
}

/// Build the balancer for a configured strategy.
pub fn balancer_for(strategy: LoadBalancingStrategy) -> Box<dyn LoadBalancer> {
    match strategy {
        LoadBalancingStrategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        LoadBalancingStrategy::Random => Box::new(random::Random),
        LoadBalancingStrategy::Weighted => Box::new(weighted::Weighted),
    }
}
