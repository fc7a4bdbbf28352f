//! Persistence collaborator.
//!
//! # Data Flow
//! ```text
//! Breaker transition / registry snapshot tick
//!     → queue.rs (bounded, fire-and-forget write queue)
//!     → KvStore::set_with_ttl (external key-value store)
//!
//! Startup:
//!     → KvStore::get (breaker state, registry snapshot)
//!     → restore in-memory state
//!
//! Fan-out cache remote tier:
//!     → KvStore::get / set_with_ttl / delete on the request path
//! ```
//!
//! # Design Decisions
//! - Persistence is best-effort: errors are logged, never propagated
//! - In-memory state stays authoritative for the running process
//! - Request path never waits on snapshot writes

pub mod memory;
pub mod queue;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use queue::PersistQueue;

/// Key under which a breaker's state is stored.
pub fn breaker_key(name: &str) -> String {
    format!("circuit_breaker:{}", name)
}

/// Key under which the registry snapshot is stored.
pub const REGISTRY_KEY: &str = "service_registry";

/// TTL for persisted breaker state (1 hour).
pub const BREAKER_STATE_TTL_SECS: u64 = 3600;

/// TTL for the registry snapshot (5 minutes).
pub const REGISTRY_SNAPSHOT_TTL_SECS: u64 = 300;

/// Errors returned by a key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Write queue is full or closed.
    #[error("write queue rejected {key}")]
    QueueRejected { key: String },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// External key-value store with TTL support.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl_secs`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> StoreResult<()>;

    /// Remove a value. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Drop expired values. Returns the number removed.
    ///
    /// Stores that expire keys on their own keep the default.
    async fn purge_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }
}
