//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::CoreConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FANOUT_";

const TTL_PREFIX: &str = "CACHE_TTL_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override {key}={value}")]
    Env { key: String, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: CoreConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build the effective configuration: defaults, then the optional file,
/// then `FANOUT_*` environment variables.
pub fn load_effective(path: Option<&Path>) -> Result<CoreConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = fs::read_to_string(p)?;
            toml::from_str(&content)?
        }
        None => CoreConfig::default(),
    };

    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `FANOUT_*` overrides from an iterator of variables.
///
/// Unrelated variables are ignored; malformed values are rejected.
pub fn apply_env_overrides<I>(config: &mut CoreConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let bad = || ConfigError::Env {
            key: key.clone(),
            value: value.clone(),
        };

        match name {
            "HEALTH_CHECK_INTERVAL_SECS" => {
                config.health_check.interval_secs = value.parse().map_err(|_| bad())?;
            }
            "HEALTH_CHECK_TIMEOUT_SECS" => {
                config.health_check.timeout_secs = value.parse().map_err(|_| bad())?;
            }
            "BREAKER_FAILURE_THRESHOLD" => {
                config.circuit_breaker.failure_threshold = value.parse().map_err(|_| bad())?;
            }
            "BREAKER_RESET_TIMEOUT_MS" => {
                config.circuit_breaker.reset_timeout_ms = value.parse().map_err(|_| bad())?;
            }
            "LB_STRATEGY" => {
                config.registry.strategy = value.parse().map_err(|_| bad())?;
            }
            "CACHE_DEFAULT_TTL_SECS" => {
                config.cache.default_ttl_secs = value.parse().map_err(|_| bad())?;
            }
            other => {
                if let Some(domain) = other.strip_prefix(TTL_PREFIX) {
                    let secs: u64 = value.parse().map_err(|_| bad())?;
                    config
                        .cache
                        .domain_ttls
                        .insert(domain.to_ascii_lowercase(), secs);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LoadBalancingStrategy;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CoreConfig::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("FANOUT_CACHE_TTL_PRICING", "120"),
                ("FANOUT_LB_STRATEGY", "weighted"),
                ("FANOUT_BREAKER_FAILURE_THRESHOLD", "3"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cache.domain_ttls.get("pricing"), Some(&120));
        assert_eq!(config.registry.strategy, LoadBalancingStrategy::Weighted);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = CoreConfig::default();
        let err = apply_env_overrides(
            &mut config,
            vars(&[("FANOUT_HEALTH_CHECK_INTERVAL_SECS", "soon")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("FANOUT_HEALTH_CHECK_INTERVAL_SECS"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("fanout_guard_loader_test.toml");
        fs::write(&path, "[health_check]\ninterval_secs = 7\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.health_check.interval_secs, 7);

        fs::remove_file(&path).unwrap_or_default();
    }
}
