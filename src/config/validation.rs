//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (remote domains reference known services)
//! - Validate value ranges (timeouts > 0, thresholds > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: CoreConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::CoreConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &CoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.default_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.default_ttl_secs", "must be > 0"));
    }
    for (domain, ttl) in &config.cache.domain_ttls {
        if *ttl == 0 {
            errors.push(ValidationError::new(
                format!("cache.domain_ttls.{}", domain),
                "must be > 0",
            ));
        }
    }

    if config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be > 0"));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be > 0"));
    }
    if cb.reset_timeout_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.reset_timeout_ms", "must be > 0"));
    }
    if cb.monitoring_period_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.monitoring_period_ms", "must be > 0"));
    }

    if config.registry.failure_threshold == 0 {
        errors.push(ValidationError::new("registry.failure_threshold", "must be > 0"));
    }

    let hc = &config.health_check;
    if hc.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
    }
    if hc.timeout_secs == 0 {
        errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
    }
    if !hc.path.starts_with('/') {
        errors.push(ValidationError::new("health_check.path", "must start with '/'"));
    }

    if config.persistence.queue_capacity == 0 {
        errors.push(ValidationError::new("persistence.queue_capacity", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }
    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
    }

    let mut ids = HashSet::new();
    for (i, svc) in config.services.iter().enumerate() {
        if !ids.insert(svc.id.as_str()) {
            errors.push(ValidationError::new(
                format!("services[{}].id", i),
                format!("duplicate instance id '{}'", svc.id),
            ));
        }
        if svc.host.is_empty() {
            errors.push(ValidationError::new(format!("services[{}].host", i), "must not be empty"));
        }
        if let Some(w) = svc.weight {
            if !w.is_finite() || w < 0.0 {
                errors.push(ValidationError::new(
                    format!("services[{}].weight", i),
                    "must be a non-negative number",
                ));
            }
        }
    }

    let service_names: HashSet<&str> = config.services.iter().map(|s| s.name.as_str()).collect();
    for (i, remote) in config.remote_domains.iter().enumerate() {
        if !service_names.contains(remote.service.as_str()) {
            errors.push(ValidationError::new(
                format!("remote_domains[{}].service", i),
                format!("no configured instances of '{}'", remote.service),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
