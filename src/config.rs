//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{PolicyOverrides, PolicyRegistry, RateLimitRule};

/// Prefix for environment variable overrides, e.g. `GATEKEEPER__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a YAML file of policy overrides
    #[serde(default)]
    pub policies_path: Option<String>,

    /// Inline policy overrides, applied after the policies file
    #[serde(default)]
    pub policies: HashMap<String, RateLimitRule>,

    /// Interval between background sweeps of expired counters, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policies_path: None,
            policies: HashMap::new(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    /// The sweep interval as a duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Build the policy registry: built-ins, then the policies file, then inline overrides.
    pub fn policy_registry(&self) -> Result<PolicyRegistry> {
        let mut registry = match &self.policies_path {
            Some(path) => PolicyRegistry::from_file(path)?,
            None => PolicyRegistry::new(),
        };
        registry.merge(PolicyOverrides {
            policies: self.policies.clone(),
        })?;
        Ok(registry)
    }
}

impl GatekeeperConfig {
    /// Load configuration from an optional file, then `GATEKEEPER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::{API, AUTH};
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.rate_limiting.sweep_interval(), Duration::from_secs(60));
        assert!(config.rate_limiting.policies_path.is_none());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:9000"
rate_limiting:
  policies:
    api:
      window_ms: 1000
      max_requests: 3
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);

        let registry = config.rate_limiting.policy_registry().unwrap();
        assert_eq!(registry.get(API), Some(&RateLimitRule::new(1000, 3)));
        assert_eq!(registry.get(AUTH).map(|r| r.max_requests), Some(5));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let yaml = "rate_limiting:\n  sweep_interval_secs: 0\n";
        assert!(matches!(
            GatekeeperConfig::from_yaml(yaml),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("gatekeeper-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "server:\n  listen_addr: \"127.0.0.1:9100\"").unwrap();
        writeln!(file, "rate_limiting:\n  sweep_interval_secs: 5").unwrap();

        let config = GatekeeperConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9100);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 5);
    }

    #[test]
    fn test_load_layers_env_over_file() {
        let path = std::env::temp_dir().join(format!("gatekeeper-env-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "server:\n  listen_addr: \"127.0.0.1:9200\"").unwrap();
        writeln!(file, "rate_limiting:\n  policies_path: /etc/gatekeeper/from-file.yaml").unwrap();

        std::env::set_var(
            "GATEKEEPER__RATE_LIMITING__POLICIES_PATH",
            "/etc/gatekeeper/from-env.yaml",
        );
        let config = GatekeeperConfig::load(path.to_str());
        std::env::remove_var("GATEKEEPER__RATE_LIMITING__POLICIES_PATH");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.server.listen_addr.port(), 9200);
        assert_eq!(
            config.rate_limiting.policies_path.as_deref(),
            Some("/etc/gatekeeper/from-env.yaml")
        );
    }

    #[test]
    fn test_missing_policies_file() {
        let config = RateLimitingConfig {
            policies_path: Some("/nonexistent/gatekeeper-policies.yaml".to_string()),
            ..RateLimitingConfig::default()
        };
        assert!(matches!(
            config.policy_registry(),
            Err(GatekeeperError::Io(_))
        ));
    }
}
