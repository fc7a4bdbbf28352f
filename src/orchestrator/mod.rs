//! Query orchestration subsystem.
//!
//! # Data Flow
//! ```text
//! query(request, domains)
//!     → look up a handler per domain (unknown → error slot)
//!     → FanoutCache::execute_parallel
//!         local handler  → handler.rs
//!         remote handler → remote.rs
//!             registry.get_service_instance(service)
//!             → breaker "<service>/<instance id>" → POST JSON with deadline
//!             → registry.record_success / record_failure
//!     → FanoutResponse (request id, outcomes in order, succeeded / failed)
//! ```

pub mod handler;
pub mod query;
pub mod remote;

pub use handler::{handler_fn, DomainError, DomainHandler};
pub use query::{FanoutResponse, Orchestrator};
pub use remote::{instance_breaker_name, RemoteDomain};
