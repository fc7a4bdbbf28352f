//! Fan-out cache subsystem.
//!
//! # Data Flow
//! ```text
//! get_cached(request, executor, domain)
//!     → key.rs (lowercase + trim, sha256(domain|query|mode))
//!     → store.rs local tier: unexpired → hit
//!     → in-flight map: pending → join the shared computation
//!     → spawn computation:
//!         remote tier (KvStore): hit → promote locally
//!         else executor() → store both tiers with the domain TTL
//!     → in-flight marker removed (success or failure)
//!
//! execute_parallel(queries) → get_cached for each, concurrently, outcomes in input order
//! ```
//!
//! # Design Decisions
//! - Computations run in their own task; a dropped caller never cancels them
//! - Errors are cloneable so every deduplicated waiter sees the same failure
//! - Remote tier failures degrade to uncached execution
//! - TTL table is hot-swappable without touching cached entries

pub mod fanout;
pub mod key;
pub mod stats;
pub mod store;

pub use fanout::{BoxError, DomainOutcome, DomainQuery, FanoutCache, FanoutError};
pub use key::{cache_key, normalize_query, QueryRequest};
pub use stats::{CacheMetrics, DomainMetrics};
