//! Configuration management for rollwin.
//!
//! Settings come from an optional YAML file, then from environment variables
//! prefixed `ROLLWIN` with `__` between sections, e.g.
//! `ROLLWIN__LIMITER__WINDOW_SECS=30`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RollwinError};
use crate::ratelimit::{RecordIdentity, WindowLength};

/// Main configuration for rollwin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollwinConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,
}

/// Shared store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix prepended to every window key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Trailing window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How window records are named
    #[serde(default)]
    pub record_identity: RecordIdentity,

    /// Path to a quota policy file
    #[serde(default)]
    pub policy_path: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            record_identity: RecordIdentity::default(),
            policy_path: None,
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

impl LimiterConfig {
    pub fn window(&self) -> WindowLength {
        WindowLength::from_secs(self.window_secs)
    }
}

impl RollwinConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ROLLWIN")
                .separator("__")
                .try_parsing(true),
        );

        Self::build(builder)
    }

    /// Load configuration from a YAML string, without the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml));
        Self::build(builder)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: RollwinConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RollwinError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.window_secs == 0 {
            return Err(RollwinError::Config(
                "limiter.window_secs must be at least 1".to_string(),
            ));
        }
        if self.store.redis_url.trim().is_empty() {
            return Err(RollwinError::Config(
                "store.redis_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RollwinConfig::default();
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.store.key_prefix, "ratelimit:");
        assert_eq!(config.limiter.window_secs, 60);
        assert_eq!(config.limiter.record_identity, RecordIdentity::Unique);
        assert_eq!(config.limiter.window().as_millis(), 60_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
store:
  redis_url: redis://cache:6379/2
limiter:
  window_secs: 30
  record_identity: timestamp
  policy_path: /etc/rollwin/policy.yaml
"#;
        let config = RollwinConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.redis_url, "redis://cache:6379/2");
        assert_eq!(config.store.key_prefix, "ratelimit:");
        assert_eq!(config.limiter.window_secs, 30);
        assert_eq!(config.limiter.record_identity, RecordIdentity::Timestamp);
        assert_eq!(
            config.limiter.policy_path.as_deref(),
            Some("/etc/rollwin/policy.yaml")
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = RollwinConfig::from_yaml("limiter:\n  window_secs: 0\n");
        assert!(matches!(result, Err(RollwinError::Config(_))));
    }

    #[test]
    fn test_empty_url_rejected() {
        let mut config = RollwinConfig::default();
        config.store.redis_url = "  ".to_string();
        assert!(matches!(config.validate(), Err(RollwinError::Config(_))));
    }
}
