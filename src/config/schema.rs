//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the core.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CoreConfig {
    /// Fan-out cache settings (TTL table).
    pub cache: CacheConfig,

    /// Defaults for every circuit breaker.
    pub circuit_breaker: BreakerConfig,

    /// Service registry and load balancing.
    pub registry: RegistryConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Background state persistence.
    pub persistence: PersistenceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Diagnostics endpoint.
    pub admin: AdminConfig,

    /// Instances registered at startup.
    pub services: Vec<ServiceConfig>,

    /// Domains backed by a registered service.
    pub remote_domains: Vec<RemoteDomainConfig>,
}

/// Per-domain TTL table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for domains missing from the table.
    pub default_ttl_secs: u64,

    /// Domain name -> TTL in seconds.
    pub domain_ttls: HashMap<String, u64>,

    /// Interval between sweeps of expired entries, in seconds.
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    /// TTL for a domain, falling back to the default.
    pub fn ttl_for(&self, domain: &str) -> Duration {
        let secs = self
            .domain_ttls
            .get(domain)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        // Ordered by volatility: classification data rarely changes,
        // prices move daily, session data is short-lived.
        let domain_ttls = [
            ("kbli", 86_400),
            ("regulatory", 43_200),
            ("business_rules", 21_600),
            ("pricing", 1_800),
            ("session", 300),
        ]
        .into_iter()
        .map(|(d, s)| (d.to_string(), s))
        .collect();

        Self {
            default_ttl_secs: 600,
            domain_ttls,
            sweep_interval_secs: 60,
        }
    }
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the monitoring period before opening.
    pub failure_threshold: u32,

    /// Time OPEN must last before a trial call, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Window in which consecutive failures are counted, in milliseconds.
    pub monitoring_period_ms: u64,

    /// Deadline applied to every wrapped call, in milliseconds (0 = none).
    pub call_timeout_ms: u64,

    /// Allow exactly one trial call per HALF_OPEN period.
    pub half_open_gate: bool,

    /// Interval between full breaker snapshots, in seconds.
    pub persist_interval_secs: u64,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 60_000,
            call_timeout_ms: 10_000,
            half_open_gate: true,
            persist_interval_secs: 30,
        }
    }
}

/// Load balancing strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

impl std::str::FromStr for LoadBalancingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!("unknown load balancing strategy '{}'", other)),
        }
    }
}

/// Service registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Selection policy over eligible instances.
    pub strategy: LoadBalancingStrategy,

    /// Reported failures before an instance breaker opens.
    pub failure_threshold: u32,

    /// How long an instance breaker stays open before a probe may close it.
    pub breaker_timeout_secs: u64,

    /// Interval between registry snapshots, in seconds.
    pub snapshot_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            failure_threshold: 5,
            breaker_timeout_secs: 60,
            snapshot_interval_secs: 60,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 5,
            path: "/health".to_string(),
        }
    }
}

/// Background persistence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Queued writes before new ones are dropped.
    pub queue_capacity: usize,

    /// Concurrent store round-trips.
    pub max_concurrent_writes: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_concurrent_writes: 4,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Diagnostics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the diagnostics endpoint.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A service instance registered at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique instance identifier.
    pub id: String,

    /// Logical service name.
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    pub host: String,

    pub port: u16,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default)]
    pub weight: Option<f64>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_protocol() -> String {
    "http".to_string()
}

/// A domain answered by a registered service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteDomainConfig {
    /// Domain name used in fan-out requests.
    pub domain: String,

    /// Service name looked up in the registry.
    pub service: String,

    /// Path the query is POSTed to.
    #[serde(default = "default_query_path")]
    pub path: String,
}

fn default_query_path() -> String {
    "/query".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_lookup_falls_back() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl_for("pricing"), Duration::from_secs(1800));
        assert_eq!(cache.ttl_for("unheard-of"), Duration::from_secs(600));
        assert!(cache.ttl_for("kbli") > cache.ttl_for("pricing"));
        assert!(cache.ttl_for("pricing") > cache.ttl_for("session"));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("weighted".parse::<LoadBalancingStrategy>().unwrap(), LoadBalancingStrategy::Weighted);
        assert_eq!("Round-Robin".parse::<LoadBalancingStrategy>().unwrap(), LoadBalancingStrategy::RoundRobin);
        assert!("fastest".parse::<LoadBalancingStrategy>().is_err());
    }

    #[test]
    fn test_minimal_toml() {
        let config: CoreConfig = toml::from_str(
            r#"
            [cache.domain_ttls]
            pricing = 60

            [[services]]
            id = "pricing-1"
            name = "pricing"
            host = "127.0.0.1"
            port = 7001
            weight = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.domain_ttls.get("pricing"), Some(&60));
        assert_eq!(config.services[0].protocol, "http");
        assert_eq!(config.services[0].weight, Some(3.0));
        assert_eq!(config.health_check.interval_secs, 30);
    }
}
