//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a protected resource:
//!     → manager.rs (look up or create the breaker by name, restoring state)
//!     → circuit_breaker.rs (admit / fail fast, enforce call timeout)
//!     → operation
//!     → circuit_breaker.rs (record outcome, maybe transition, queue persist)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every wrapped call can carry a deadline
//! - Breakers are per resource (per domain or per service instance)
//! - Persistence is fire-and-forget through the bounded write queue

pub mod circuit_breaker;
pub mod manager;

pub use circuit_breaker::{
    BreakerError, BreakerMetrics, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, TransitionCounts,
};
pub use manager::BreakerManager;
