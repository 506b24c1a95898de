//! Gateway configuration.

use pulse_core::config::Validatable;
use pulse_core::error::ConfigError;
use pulse_core::types::DeliveryMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections created by `prewarm`.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// Hard cap on live (non-broken) connections.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// How long `acquire` waits for a free slot.
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Idle connections older than this are swept.
    #[serde(default = "default_stale_timeout", with = "humantime_serde")]
    pub stale_timeout: Duration,
    /// Errors after which a connection is permanently broken.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Sweeper interval.
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

fn default_min_size() -> usize {
    0
}

fn default_max_size() -> usize {
    1000
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_stale_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_error_threshold() -> u32 {
    5
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            max_size: default_max_size(),
            acquire_timeout: default_acquire_timeout(),
            stale_timeout: default_stale_timeout(),
            error_threshold: default_error_threshold(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::invalid_value("pool.max_size", "must be greater than 0"));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::invalid_value(
                "pool.min_size",
                format!("{} exceeds max_size {}", self.min_size, self.max_size),
            ));
        }
        if self.error_threshold == 0 {
            return Err(ConfigError::invalid_value(
                "pool.error_threshold",
                "must be greater than 0",
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::invalid_value(
                "pool.cleanup_interval",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Reconnection and offline buffering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    #[serde(default = "default_base_interval", with = "humantime_serde")]
    pub base_interval: Duration,
    /// Cap on the backoff delay.
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,
    /// Attempts before a connection is given up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Messages kept per disconnected connection.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_base_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    10
}

fn default_buffer_size() -> usize {
    100
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: default_base_interval(),
            max_interval: default_max_interval(),
            max_retries: default_max_retries(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Validatable for ReconnectConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_interval > self.max_interval {
            return Err(ConfigError::invalid_value(
                "reconnect.base_interval",
                "must not exceed max_interval",
            ));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::invalid_value(
                "reconnect.buffer_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Room configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Member cap for rooms created without one.
    #[serde(default = "default_max_members")]
    pub default_max_members: usize,
    /// Methods used to deliver room messages.
    #[serde(default = "default_broadcast_methods")]
    pub broadcast_methods: BTreeSet<DeliveryMethod>,
}

fn default_max_members() -> usize {
    100
}

fn default_broadcast_methods() -> BTreeSet<DeliveryMethod> {
    BTreeSet::from([DeliveryMethod::WebSocket])
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            default_max_members: default_max_members(),
            broadcast_methods: default_broadcast_methods(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Connection pool.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Reconnection and buffering.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Rooms.
    #[serde(default)]
    pub rooms: RoomConfig,
    /// Session delivery settings.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Per-session outbound queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on one send into a session queue.
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
    /// Outbound queue capacity per session.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_queue_size() -> usize {
    256
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_timeout: default_send_timeout(),
            queue_size: default_queue_size(),
        }
    }
}

impl Validatable for GatewayConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.reconnect.validate()?;
        if self.rooms.default_max_members == 0 {
            return Err(ConfigError::invalid_value(
                "rooms.default_max_members",
                "must be greater than 0",
            ));
        }
        if self.session.queue_size == 0 {
            return Err(ConfigError::invalid_value(
                "session.queue_size",
                "must be greater than 0",
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
        let config = GatewayConfig::default();
        assert_eq!(config.pool.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.pool.stale_timeout, Duration::from_secs(300));
        assert_eq!(config.pool.error_threshold, 5);
        assert_eq!(config.reconnect.buffer_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_humantime() {
        let yaml = r"
pool:
  max_size: 10
  acquire_timeout: 250ms
reconnect:
  base_interval: 3s
  max_retries: 2
";
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pool.max_size, 10);
        assert_eq!(config.pool.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.reconnect.base_interval, Duration::from_secs(3));
        assert_eq!(config.pool.error_threshold, 5);
    }

    #[test]
    fn test_min_over_max_rejected() {
        let config = PoolConfig {
            min_size: 5,
            max_size: 2,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
