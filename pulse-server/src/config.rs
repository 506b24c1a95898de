//! Server configuration.
//!
//! One file configures every component. Each section keeps its own defaults
//! and validation; this module only aggregates them and applies the
//! `PULSE_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use pulse_core::config::{Configurable, Validatable, env_override};
use pulse_core::error::ConfigError;
use pulse_engine::alert::{DispatchConfig, WebhookConfig};
use pulse_engine::subscription::SubscriptionManagerConfig;
use pulse_gateway::GatewayConfig;
use pulse_resilience::BreakerRegistryConfig;
use pulse_telemetry::logging::LogConfig;
use pulse_telemetry::metrics::MetricsConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PULSE";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logging.
    #[serde(default)]
    pub logging: LogConfig,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Pool, reconnection, rooms and sessions.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Circuit breakers per dependency.
    #[serde(default)]
    pub breakers: BreakerRegistryConfig,

    /// Alert dispatch.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Subscription limits.
    #[serde(default)]
    pub subscriptions: SubscriptionManagerConfig,

    /// Optional webhook delivery target.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,

    /// Periodic stats logging.
    #[serde(default)]
    pub stats: StatsConfig,

    /// Shutdown behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl ServerConfig {
    /// Creates a new server configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Validatable for ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid_value("logging.level", "cannot be empty"));
        }
        self.gateway.validate()?;
        self.breakers.validate()?;
        self.dispatch.validate()?;
        // A websocket fan-out takes up to one send timeout; the dispatcher
        // must not cut it off first.
        if self.gateway.session.send_timeout >= self.dispatch.handler_timeout {
            return Err(ConfigError::invalid_value(
                "gateway.session.send_timeout",
                format!(
                    "{:?} must be shorter than dispatch.handler_timeout {:?}",
                    self.gateway.session.send_timeout, self.dispatch.handler_timeout
                ),
            ));
        }
        self.subscriptions.validate()?;
        if let Some(webhook) = &self.webhook
            && webhook.url.trim().is_empty()
        {
            return Err(ConfigError::invalid_value("webhook.url", "cannot be empty"));
        }
        self.stats.validate()?;
        self.shutdown.validate()
    }
}

impl Configurable for ServerConfig {
    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        if let Some(level) = env_override::<String>(prefix, "LOG_LEVEL")? {
            self.logging.level = level;
        }
        if let Some(max_size) = env_override::<usize>(prefix, "POOL_MAX_SIZE")? {
            self.gateway.pool.max_size = max_size;
        }
        if let Some(enabled) = env_override::<bool>(prefix, "METRICS_ENABLED")? {
            self.metrics.enabled = enabled;
        }
        if let Some(url) = env_override::<String>(prefix, "WEBHOOK_URL")? {
            match &mut self.webhook {
                Some(webhook) => webhook.url = url,
                None => self.webhook = Some(WebhookConfig::new(url)),
            }
        }
        Ok(())
    }

    fn env_var_names(prefix: &str) -> Vec<String> {
        ["LOG_LEVEL", "POOL_MAX_SIZE", "METRICS_ENABLED", "WEBHOOK_URL"]
            .iter()
            .map(|key| format!("{prefix}_{key}"))
            .collect()
    }
}

/// Periodic stats logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Whether to log a stats snapshot periodically.
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,

    /// Interval between snapshots.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub interval: Duration,
}

fn default_stats_enabled() -> bool {
    true
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_stats_enabled(),
            interval: default_stats_interval(),
        }
    }
}

impl Validatable for StatsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval.is_zero() {
            return Err(ConfigError::invalid_value("stats.interval", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Upper bound on graceful shutdown.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: default_shutdown_timeout(),
        }
    }
}

impl Validatable for ShutdownConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid_value("shutdown.timeout", "must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.webhook.is_none());
        assert_eq!(config.shutdown.timeout, Duration::from_secs(30));
        assert_eq!(config.stats.interval, Duration::from_secs(60));
    }

    #[test]
    fn test_yaml_sections() {
        let yaml = r#"
logging:
  level: debug
  format: pretty
gateway:
  pool:
    max_size: 50
    acquire_timeout: 2s
breakers:
  dependencies:
    email:
      failure_threshold: 2
      recovery_timeout: 10s
webhook:
  url: http://localhost:9000/hook
  timeout: 3s
stats:
  interval: 15s
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.gateway.pool.max_size, 50);
        assert_eq!(config.gateway.pool.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.breakers.config_for("email").failure_threshold, 2);
        assert_eq!(config.webhook.as_ref().unwrap().timeout, Duration::from_secs(3));
        assert_eq!(config.stats.interval, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_section_is_rejected() {
        let mut config = ServerConfig::default();
        config.gateway.pool.max_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.shutdown.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_send_timeout_must_undercut_handler_timeout() {
        let mut config = ServerConfig::default();
        config.gateway.session.send_timeout = Duration::from_secs(5);
        config.dispatch.handler_timeout = Duration::from_secs(5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gateway.session.send_timeout"));

        config.gateway.session.send_timeout = Duration::from_millis(500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        // Unique prefix keeps this test independent of the real environment.
        let prefix = "PULSE_TEST_CFG";
        // SAFETY: only this test reads variables under this prefix.
        unsafe {
            std::env::set_var("PULSE_TEST_CFG_LOG_LEVEL", "trace");
            std::env::set_var("PULSE_TEST_CFG_POOL_MAX_SIZE", "7");
        }

        let mut config = ServerConfig::default();
        config.apply_env_overrides(prefix).unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.gateway.pool.max_size, 7);

        unsafe {
            std::env::set_var("PULSE_TEST_CFG_POOL_MAX_SIZE", "lots");
        }
        assert!(config.apply_env_overrides(prefix).is_err());

        unsafe {
            std::env::remove_var("PULSE_TEST_CFG_LOG_LEVEL");
            std::env::remove_var("PULSE_TEST_CFG_POOL_MAX_SIZE");
        }
    }

    #[test]
    fn test_env_var_names() {
        let names = ServerConfig::env_var_names(ENV_PREFIX);
        assert!(names.contains(&"PULSE_LOG_LEVEL".to_string()));
        assert!(names.contains(&"PULSE_POOL_MAX_SIZE".to_string()));
    }
}
