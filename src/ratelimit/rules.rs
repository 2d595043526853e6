//! Quota policy rules.
//!
//! The limiter takes a quota on every call. Callers that do not hard-code one
//! can resolve it from a policy: a default quota plus per-prefix overrides,
//! loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{Result, RollwinError};

/// A set of quota rules with a fallback quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// Quota for keys no rule matches
    #[serde(default = "default_quota")]
    pub default_quota: i64,
    /// Per-prefix overrides
    #[serde(default)]
    pub rules: Vec<QuotaRule>,
}

/// A quota for every key starting with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRule {
    /// Key prefix this rule applies to
    pub prefix: String,
    /// Maximum attempts per window
    pub quota: i64,
    /// Optional name for logs
    #[serde(default)]
    pub name: Option<String>,
}

fn default_quota() -> i64 {
    60
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            default_quota: default_quota(),
            rules: Vec::new(),
        }
    }
}

impl QuotaPolicy {
    /// A policy with no rules.
    pub fn new(default_quota: i64) -> Self {
        Self {
            default_quota,
            rules: Vec::new(),
        }
    }

    /// Add a prefix rule.
    pub fn with_rule(mut self, prefix: impl Into<String>, quota: i64) -> Self {
        self.rules.push(QuotaRule {
            prefix: prefix.into(),
            quota,
            name: None,
        });
        self
    }

    /// Load a policy from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading quota policy");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RollwinError::Config(format!("Failed to parse quota policy: {}", e)))
    }

    /// The rule with the longest prefix matching `key`.
    pub fn find_rule(&self, key: &str) -> Option<&QuotaRule> {
        self.rules
            .iter()
            .filter(|rule| key.starts_with(&rule.prefix))
            .max_by_key(|rule| rule.prefix.len())
    }

    /// Quota that applies to `key`.
    pub fn quota_for(&self, key: &str) -> i64 {
        self.find_rule(key)
            .map_or(self.default_quota, |rule| rule.quota)
    }
}
