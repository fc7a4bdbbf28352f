//! Resilience and fan-out query layer.
//!
//! Shields callers from failing or slow backend domains:
//! - [`resilience`]: per-resource circuit breakers with persisted state
//! - [`registry`] + [`health`]: service instances, health probes, load balancing
//! - [`cache`]: deduplicated, TTL-cached, parallel domain execution
//! - [`orchestrator`]: one query answered by many domains at once
//!
//! Build everything with [`lifecycle::Core::init`] and tear it down with
//! [`lifecycle::Core::shutdown`].

// Core subsystems
pub mod cache;
pub mod orchestrator;
pub mod registry;
pub mod resilience;

// Background work
pub mod health;
pub mod persistence;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use cache::{FanoutCache, QueryRequest};
pub use config::CoreConfig;
pub use lifecycle::{Core, Shutdown};
pub use orchestrator::{FanoutResponse, Orchestrator};
pub use registry::{ServiceInstance, ServiceRegistry};
pub use resilience::{BreakerManager, CircuitBreaker};

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
