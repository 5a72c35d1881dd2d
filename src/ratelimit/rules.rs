//! Named rate limit policies.
//!
//! Routes pick a policy by name instead of hand-rolling windows. The built-in
//! table covers the usual endpoint classes and every entry can be replaced, or
//! new ones added, from a YAML document.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{GatekeeperError, Result};

/// Authentication endpoints.
pub const AUTH: &str = "auth";
/// Upload endpoints.
pub const UPLOAD: &str = "upload";
/// General API endpoints.
pub const API: &str = "api";
/// Administrative endpoints.
pub const ADMIN: &str = "admin";
/// Resource-intensive export endpoints.
pub const EXPORT: &str = "export";

/// A declarative rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Do not count requests whose response succeeded (status < 400)
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Do not count requests whose response failed (status >= 400) or errored
    #[serde(default)]
    pub skip_failed_requests: bool,
    /// Message returned to rejected clients
    #[serde(default)]
    pub message: Option<String>,
}

impl RateLimitRule {
    /// Create a rule admitting `max_requests` per `window_ms`.
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        Self {
            window_ms,
            max_requests,
            skip_successful_requests: false,
            skip_failed_requests: false,
            message: None,
        }
    }

    /// The window length as a time delta.
    pub fn window(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.window_ms).unwrap_or(i64::MAX))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.window_ms == 0 {
            return Err(GatekeeperError::Policy(format!(
                "policy '{}' has a zero-length window",
                name
            )));
        }
        Ok(())
    }
}

/// A YAML document of policy overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    /// Map of policy name to rule
    #[serde(default)]
    pub policies: HashMap<String, RateLimitRule>,
}

/// Registry of named rate limit policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRegistry {
    policies: HashMap<String, RateLimitRule>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(AUTH.to_string(), RateLimitRule::new(15 * 60 * 1000, 5));
        policies.insert(UPLOAD.to_string(), RateLimitRule::new(60 * 1000, 10));
        policies.insert(API.to_string(), RateLimitRule::new(60 * 1000, 100));
        policies.insert(ADMIN.to_string(), RateLimitRule::new(60 * 1000, 50));
        policies.insert(EXPORT.to_string(), RateLimitRule::new(5 * 60 * 1000, 3));
        Self { policies }
    }
}

impl PolicyRegistry {
    /// Create a registry holding the built-in policies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in policies overridden from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Create a registry with the built-in policies overridden from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: PolicyOverrides = serde_yaml::from_str(yaml)?;
        let mut registry = Self::default();
        registry.merge(overrides)?;
        Ok(registry)
    }

    /// Apply overrides on top of the current policies.
    pub fn merge(&mut self, overrides: PolicyOverrides) -> Result<()> {
        for (name, rule) in overrides.policies {
            self.insert(name, rule)?;
        }
        Ok(())
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, name: impl Into<String>, rule: RateLimitRule) -> Result<()> {
        let name = name.into();
        rule.validate(&name)?;
        self.policies.insert(name, rule);
        Ok(())
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitRule> {
        self.policies.get(name)
    }

    /// Look up a policy by name, failing when it is not registered.
    pub fn require(&self, name: &str) -> Result<&RateLimitRule> {
        self.get(name)
            .ok_or_else(|| GatekeeperError::Policy(format!("unknown policy '{}'", name)))
    }

    /// Names of all registered policies, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_policies() {
        let registry = PolicyRegistry::new();

        assert_eq!(registry.get(AUTH), Some(&RateLimitRule::new(900_000, 5)));
        assert_eq!(registry.get(UPLOAD), Some(&RateLimitRule::new(60_000, 10)));
        assert_eq!(registry.get(API), Some(&RateLimitRule::new(60_000, 100)));
        assert_eq!(registry.get(ADMIN), Some(&RateLimitRule::new(60_000, 50)));
        assert_eq!(registry.get(EXPORT), Some(&RateLimitRule::new(300_000, 3)));
        assert_eq!(registry.names(), vec!["admin", "api", "auth", "export", "upload"]);
    }

    #[test]
    fn test_yaml_overrides_merge_over_defaults() {
        let yaml = r#"
policies:
  api:
    window_ms: 1000
    max_requests: 3
  reports:
    window_ms: 60000
    max_requests: 2
    skip_failed_requests: true
    message: "Report quota used up"
"#;
        let registry = PolicyRegistry::from_yaml(yaml).unwrap();

        assert_eq!(registry.get(API), Some(&RateLimitRule::new(1000, 3)));
        let reports = registry.require("reports").unwrap();
        assert_eq!(reports.max_requests, 2);
        assert!(reports.skip_failed_requests);
        assert!(!reports.skip_successful_requests);
        assert_eq!(reports.message.as_deref(), Some("Report quota used up"));
        // Untouched defaults survive.
        assert_eq!(registry.get(AUTH).map(|r| r.max_requests), Some(5));
    }

    #[test]
    fn test_empty_yaml_keeps_defaults() {
        let registry = PolicyRegistry::from_yaml("policies: {}").unwrap();
        assert_eq!(registry, PolicyRegistry::default());
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
policies:
  api:
    window_ms: 0
    max_requests: 3
"#;
        let err = PolicyRegistry::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GatekeeperError::Policy(_)));
    }

    #[test]
    fn test_unknown_policy() {
        let registry = PolicyRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(matches!(
            registry.require("missing"),
            Err(GatekeeperError::Policy(_))
        ));
    }

    #[test]
    fn test_rule_window() {
        assert_eq!(RateLimitRule::new(1500, 1).window(), TimeDelta::milliseconds(1500));
    }
}
