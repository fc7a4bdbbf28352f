//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (core.rs):
//!     Validate config → persistence queue → breakers (restore)
//!     → registry (restore snapshot, register configured instances)
//!     → cache + orchestrator (register remote domains)
//!     → health checking + snapshot loops
//!
//! Shutdown (core.rs + shutdown.rs):
//!     Stop health checks → snapshot loops write final state → drain write queue
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then state restore, then background loops
//! - Shutdown has a deadline per phase: stuck tasks are aborted

pub mod core;
pub mod shutdown;
pub mod signals;

pub use self::core::Core;
pub use shutdown::Shutdown;
