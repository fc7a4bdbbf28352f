//! In-process key-value store with TTL.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::persistence::{KvStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// A `KvStore` backed by a concurrent map.
///
/// Expired entries are dropped lazily on read and by `purge_expired`.
/// The store can be switched offline to exercise degradation paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, StoredValue>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.iter().filter(|e| e.value().expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_online()?;
        let now = Instant::now();
        let expired = match self.inner.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.bytes.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.remove_if(key, |_, v| v.expires_at <= now);
        }
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> StoreResult<()> {
        self.check_online()?;
        self.inner.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_online()?;
        self.inner.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.check_online()?;
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, v| v.expires_at > now);
        Ok(before.saturating_sub(self.inner.len()))
    }
}
