//! Service instance abstraction.
//!
//! # Responsibilities
//! - Represent a single instance of a logical service
//! - Track health state (Unknown/Healthy/Unhealthy) and last probe time
//! - Carry a breaker-like failure record scoped to the instance

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::resilience::CircuitState;
use crate::unix_millis;

/// Default weight for weighted load balancing.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Failure record embedded in every instance.
#[derive(Debug, Clone)]
struct InstanceBreaker {
    failures: u32,
    last_failure: Option<u64>,
    state: CircuitState,
    opened_at: Option<Instant>,
}

impl Default for InstanceBreaker {
    fn default() -> Self {
        Self {
            failures: 0,
            last_failure: None,
            state: CircuitState::Closed,
            opened_at: None,
        }
    }
}

/// A single registered instance.
#[derive(Debug)]
pub struct ServiceInstance {
    /// Unique instance identifier.
    pub id: String,
    /// Logical service this instance belongs to.
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    /// Weight for weighted selection; `None` means [`DEFAULT_WEIGHT`].
    pub weight: Option<f64>,
    /// Free-form labels.
    pub tags: BTreeMap<String, String>,
    /// How long the instance breaker stays open before a probe may close it.
    pub breaker_timeout: Duration,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    health: AtomicU8,
    /// Unix milliseconds of the last probe, 0 when never probed.
    last_health_check: AtomicU64,
    breaker: Mutex<InstanceBreaker>,
}

impl ServiceInstance {
    /// Create an instance with unknown health and a closed breaker.
    pub fn new(id: impl Into<String>, name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".to_string(),
            host: host.into(),
            port,
            protocol: "http".to_string(),
            weight: None,
            tags: BTreeMap::new(),
            breaker_timeout: Duration::from_secs(60),
            health: AtomicU8::new(HealthState::Unknown as u8),
            last_health_check: AtomicU64::new(0),
            breaker: Mutex::new(InstanceBreaker::default()),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the selection weight. Non-finite weights are ignored, negative ones clamp to 0.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.is_finite().then(|| weight.max(0.0));
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_health(self, health: HealthState) -> Self {
        self.health.store(health as u8, Ordering::Relaxed);
        self
    }

    pub fn with_breaker_timeout(mut self, timeout: Duration) -> Self {
        self.breaker_timeout = timeout;
        self
    }

    /// Base URL, e.g. `http://10.0.0.7:8080/`.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}://{}:{}", self.protocol, self.host, self.port))
    }

    /// Effective selection weight.
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(DEFAULT_WEIGHT)
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.health.load(Ordering::Relaxed))
    }

    /// Unix milliseconds of the last probe.
    pub fn last_health_check(&self) -> Option<u64> {
        match self.last_health_check.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Record a probe result. Returns true if the health state changed.
    pub fn set_health(&self, health: HealthState) -> bool {
        self.last_health_check.store(unix_millis(), Ordering::Relaxed);
        let prev = self.health.swap(health as u8, Ordering::Relaxed);
        prev != health as u8
    }

    /// Current state of the embedded breaker.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.breaker.lock().failures
    }

    /// Selectable: healthy and breaker closed.
    pub fn is_eligible(&self) -> bool {
        self.health() == HealthState::Healthy && self.breaker_state() == CircuitState::Closed
    }

    /// Report a failed call or probe. Returns true if this opened the breaker.
    pub fn record_failure(&self, threshold: u32) -> bool {
        let mut breaker = self.breaker.lock();
        breaker.failures += 1;
        breaker.last_failure = Some(unix_millis());
        if breaker.state == CircuitState::Closed && breaker.failures >= threshold {
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(Instant::now());
            return true;
        }
        false
    }

    /// Report a successful call. Returns true if this closed the breaker.
    pub fn record_success(&self) -> bool {
        let mut breaker = self.breaker.lock();
        breaker.failures = 0;
        breaker.opened_at = None;
        let was_open = breaker.state != CircuitState::Closed;
        breaker.state = CircuitState::Closed;
        was_open
    }

    /// True when the breaker is open and has been for at least its timeout.
    pub fn breaker_timeout_elapsed(&self) -> bool {
        let breaker = self.breaker.lock();
        match (breaker.state, breaker.opened_at) {
            (CircuitState::Open, Some(at)) => at.elapsed() >= self.breaker_timeout,
            _ => false,
        }
    }

    /// Serializable view.
    pub fn record(&self) -> InstanceRecord {
        let breaker = self.breaker.lock().clone();
        InstanceRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
            weight: self.weight,
            tags: self.tags.clone(),
            health: self.health(),
            last_health_check: self.last_health_check(),
            failures: breaker.failures,
            last_failure: breaker.last_failure,
            breaker_state: breaker.state,
            breaker_timeout_secs: self.breaker_timeout.as_secs(),
            breaker_open_for_ms: breaker
                .opened_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Rebuild an instance from a record, keeping its health and breaker.
    pub fn from_record(record: InstanceRecord) -> Self {
        let mut instance = ServiceInstance::new(record.id, record.name, record.host, record.port)
            .with_version(record.version)
            .with_protocol(record.protocol)
            .with_health(record.health)
            .with_breaker_timeout(Duration::from_secs(record.breaker_timeout_secs));
        instance.weight = record.weight;
        instance.tags = record.tags;
        instance
            .last_health_check
            .store(record.last_health_check.unwrap_or(0), Ordering::Relaxed);

        let now = Instant::now();
        *instance.breaker.get_mut() = InstanceBreaker {
            failures: record.failures,
            last_failure: record.last_failure,
            state: record.breaker_state,
            opened_at: record.breaker_open_for_ms.map(|ms| {
                now.checked_sub(Duration::from_millis(ms)).unwrap_or(now)
            }),
        };
        instance
    }

    /// Carry health and breaker state over from a previous registration.
    pub(crate) fn inherit_state(&self, previous: &ServiceInstance) {
        self.health.store(previous.health.load(Ordering::Relaxed), Ordering::Relaxed);
        self.last_health_check.store(
            previous.last_health_check.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        *self.breaker.lock() = previous.breaker.lock().clone();
    }
}

/// Persisted / reported form of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub weight: Option<f64>,
    pub tags: BTreeMap<String, String>,
    pub health: HealthState,
    pub last_health_check: Option<u64>,
    pub failures: u32,
    pub last_failure: Option<u64>,
    pub breaker_state: CircuitState,
    pub breaker_timeout_secs: u64,
    /// How long the breaker had been open when the record was taken.
    pub breaker_open_for_ms: Option<u64>,
}
