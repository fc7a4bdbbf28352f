//! Local cache tier with tag index.
//!
//! # Responsibilities
//! - Hold unexpired results keyed by fan-out key
//! - Track tag -> keys for bulk invalidation
//! - Expire lazily on read, and in bulk on each sweep

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedEntry {
    value: Value,
    tags: Vec<String>,
    expires_at: Instant,
}

/// Envelope written to the remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub value: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unix milliseconds.
    pub expires_at_ms: u64,
}

/// In-process cache tier.
#[derive(Debug, Default)]
pub struct LocalTier {
    entries: DashMap<String, CachedEntry>,
    tags: DashMap<String, HashSet<String>>,
}

impl LocalTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired value for `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        if let Some((_, stale)) = self.entries.remove_if(key, |_, e| e.expires_at <= now) {
            self.untag(key, stale.tags.iter());
        }
        None
    }

    /// Store `value` under `key`. The entry lands before its tags are indexed,
    /// so a concurrent tag invalidation can never leave it unindexed.
    pub fn insert(&self, key: &str, value: Value, tags: Vec<String>, ttl: Duration) {
        let previous = self.entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                tags: tags.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        for tag in tags {
            self.tags.entry(tag).or_default().insert(key.to_string());
        }
        if let Some(previous) = previous {
            let stale: Vec<&String> = previous
                .tags
                .iter()
                .filter(|t| !self.has_tag(key, t))
                .collect();
            self.untag(key, stale.into_iter());
        }
    }

    fn has_tag(&self, key: &str, tag: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| e.tags.iter().any(|t| t == tag))
            .unwrap_or(false)
    }

    fn untag<'a>(&self, key: &str, tags: impl Iterator<Item = &'a String>) {
        for tag in tags {
            if let Some(mut keys) = self.tags.get_mut(tag) {
                keys.remove(key);
            }
            self.tags.remove_if(tag, |_, keys| keys.is_empty());
        }
    }

    /// Remove one key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.untag(key, entry.tags.iter());
                true
            }
            None => false,
        }
    }

    /// Remove every key carrying `tag`; returns the removed keys.
    pub fn invalidate_tag(&self, tag: &str) -> Vec<String> {
        let keys: Vec<String> = match self.tags.remove(tag) {
            Some((_, keys)) => keys.into_iter().collect(),
            None => return Vec::new(),
        };
        keys.into_iter().filter(|key| self.remove(key)).collect()
    }

    /// Drop every expired entry and its tag rows. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().expires_at <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if let Some((_, stale)) = self.entries.remove_if(&key, |_, e| e.expires_at <= now) {
                self.untag(&key, stale.tags.iter());
                removed += 1;
            }
        }
        removed
    }

    /// Number of stored entries, expired ones included until read or swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
