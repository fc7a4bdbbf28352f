//! Query normalization and cache keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix shared by every fan-out cache key.
pub const KEY_PREFIX: &str = "fanout:";

/// A query as submitted to the fan-out layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Optional execution mode; part of the cache key.
    #[serde(default)]
    pub mode: Option<String>,
    /// Extra invalidation tags. The domain is always added.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Cache key of this request for `domain`.
    pub fn cache_key(&self, domain: &str) -> String {
        cache_key(domain, &self.query, self.mode.as_deref())
    }
}

/// Lowercase and trim.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// `fanout:` + hex SHA-256 of `domain|normalized query|mode`.
pub fn cache_key(domain: &str, query: &str, mode: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(b"|");
    hasher.update(mode.unwrap_or("").as_bytes());
    format!("{}{}", KEY_PREFIX, hex::encode(hasher.finalize()))
}
