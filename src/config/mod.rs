//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → config file (TOML, optional) → loader.rs
//!     → FANOUT_* environment overrides → loader.rs
//!     → validation.rs (semantic checks)
//!     → CoreConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → TTL table hot-swapped in the fan-out cache
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Only the TTL table is hot-reloadable; everything else needs a restart
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::BreakerConfig;
pub use schema::CacheConfig;
pub use schema::CoreConfig;
pub use schema::HealthCheckConfig;
pub use schema::LoadBalancingStrategy;
pub use schema::RegistryConfig;
pub use schema::ServiceConfig;
