//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → GET {protocol}://{host}:{port}{path} on every instance, bounded by timeout
//!     → registry.apply_probe_result
//!         2xx          → Healthy (closes an instance breaker whose timeout elapsed)
//!         otherwise    → Unhealthy + record_failure
//!
//! Passive signals:
//!     Remote domain call outcome
//!     → registry.record_success / record_failure
//! ```
//!
//! # Design Decisions
//! - Probe failures are never surfaced to callers, only reflected in selection
//! - Health state is per instance, not per service
//! - The loop is owned by the registry (start/stop)

pub mod active;
