//! Registry of circuit breakers keyed by dependency name.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
use parking_lot::RwLock;
use pulse_core::config::Validatable;
use pulse_core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Dependency name used for the persistence collaborator.
pub const STORAGE_DEPENDENCY: &str = "storage";

/// Registry configuration.
///
/// Breakers for names listed in `dependencies` use that config. Otherwise a
/// built-in default exists for the known dependencies (`websocket`, `email`,
/// `webhook`, `sms`, `storage`), and any other name gets `fallback`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerRegistryConfig {
    /// Config for dependencies without a specific entry.
    #[serde(default)]
    pub fallback: CircuitBreakerConfig,
    /// Per-dependency overrides.
    #[serde(default)]
    pub dependencies: HashMap<String, CircuitBreakerConfig>,
}

impl BreakerRegistryConfig {
    /// Resolves the config used for `name`.
    #[must_use]
    pub fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        self.dependencies
            .get(name)
            .cloned()
            .or_else(|| known_dependency_defaults(name))
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Adds or replaces a per-dependency override.
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.dependencies.insert(name.into(), config);
        self
    }
}

impl Validatable for BreakerRegistryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let all = std::iter::once(("fallback", &self.fallback))
            .chain(self.dependencies.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, config) in all {
            if config.failure_threshold == 0 {
                return Err(ConfigError::invalid_value(
                    format!("breakers.{name}.failure_threshold"),
                    "must be greater than 0",
                ));
            }
            if config.success_threshold == 0 {
                return Err(ConfigError::invalid_value(
                    format!("breakers.{name}.success_threshold"),
                    "must be greater than 0",
                ));
            }
            if config.half_open_max_calls == 0 {
                return Err(ConfigError::invalid_value(
                    format!("breakers.{name}.half_open_max_calls"),
                    "must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

/// Built-in defaults for the dependencies Pulse knows about.
#[must_use]
pub fn known_dependency_defaults(name: &str) -> Option<CircuitBreakerConfig> {
    let (failures, recovery_secs) = match name {
        "websocket" => (5, 30),
        "webhook" => (5, 60),
        "email" | "sms" => (3, 120),
        STORAGE_DEPENDENCY => (3, 30),
        _ => return None,
    };
    Some(
        CircuitBreakerConfig::default()
            .with_failure_threshold(failures)
            .with_recovery_timeout(Duration::from_secs(recovery_secs)),
    )
}

/// Aggregated breaker statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Number of breakers created so far.
    pub total: usize,
    /// Breakers currently closed.
    pub closed: usize,
    /// Breakers currently open.
    pub open: usize,
    /// Breakers currently half-open.
    pub half_open: usize,
    /// Per-breaker snapshots, sorted by name.
    pub breakers: Vec<CircuitBreakerSnapshot>,
}

/// One breaker per dependency name, created lazily on first use.
///
/// The map is read-mostly after warm-up; state transitions happen inside each
/// breaker and never take the registry lock.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerRegistryConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: BreakerRegistryConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it if needed.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            let config = self.config.config_for(name);
            debug!(
                dependency = name,
                failure_threshold = config.failure_threshold,
                recovery_timeout = ?config.recovery_timeout,
                "Creating circuit breaker"
            );
            Arc::new(CircuitBreaker::new(name, config))
        }))
    }

    /// Returns the breaker for `name` only if it already exists.
    #[must_use]
    pub fn existing(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Resets every breaker to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }

    /// Returns the names of breakers that are currently open.
    #[must_use]
    pub fn open_breakers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .values()
            .filter(|b| b.is_open())
            .map(|b| b.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Returns a snapshot of every breaker.
    #[must_use]
    pub fn get_stats(&self) -> RegistryStats {
        let breakers: Vec<Arc<CircuitBreaker>> = self.breakers.read().values().cloned().collect();
        let mut snapshots: Vec<CircuitBreakerSnapshot> =
            breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));

        let count = |s: CircuitState| snapshots.iter().filter(|b| b.state == s).count();
        RegistryStats {
            total: snapshots.len(),
            closed: count(CircuitState::Closed),
            open: count(CircuitState::Open),
            half_open: count(CircuitState::HalfOpen),
            breakers: snapshots,
        }
    }
}
