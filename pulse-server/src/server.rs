//! Main server implementation.
//!
//! `PulseServer` wires the components together from one [`ServerConfig`],
//! feeds records into the gateway, logs periodic stats and tears everything
//! down on shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use pulse_core::config::{ConfigLoader, Configurable, Validatable};
use pulse_engine::alert::{AlertDispatcher, WebhookHandler};
use pulse_engine::pipeline::AlertPipeline;
use pulse_engine::store::InMemoryStore;
use pulse_engine::subscription::SubscriptionManager;
use pulse_gateway::Gateway;
use pulse_resilience::CircuitBreakerRegistry;
use pulse_telemetry::logging::{LoggingError, init_logging};
use pulse_telemetry::metrics::init_metrics;

use crate::config::{ENV_PREFIX, ServerConfig};
use crate::feed::{FeedStats, run_feed};
use crate::shutdown::{ShutdownController, setup_signal_handlers};

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not initialized, or fully shut down.
    Stopped,
    /// Initialized, waiting for `run`.
    Starting,
    /// Feeding records.
    Running,
    /// Tearing down.
    ShuttingDown,
}

/// Where records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    /// Standard input.
    Stdin,
    /// A newline-delimited JSON file.
    File(PathBuf),
}

/// The Pulse server.
pub struct PulseServer {
    config: ServerConfig,
    state: Arc<RwLock<ServerState>>,
    shutdown: ShutdownController,
    gateway: Option<Arc<Gateway>>,
    stats_task: Option<JoinHandle<()>>,
    _log_guards: Vec<WorkerGuard>,
}

impl PulseServer {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            shutdown: ShutdownController::new(),
            gateway: None,
            stats_task: None,
            _log_guards: Vec::new(),
        }
    }

    /// Loads, overrides from `PULSE_*` variables, and validates a config file.
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ServerError> {
        let loader = ConfigLoader::new().with_env_prefix(ENV_PREFIX);
        let mut config: ServerConfig = loader
            .load_file(path)
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        config
            .apply_env_overrides(ENV_PREFIX)
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        Ok(config)
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Returns the configuration the server was built with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Returns the gateway once initialized.
    #[must_use]
    pub fn gateway(&self) -> Option<&Arc<Gateway>> {
        self.gateway.as_ref()
    }

    /// Initializes telemetry and builds the component graph.
    pub async fn initialize(&mut self) -> Result<(), ServerError> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                return Err(ServerError::InvalidState(
                    "Server must be stopped to initialize".to_string(),
                ));
            }
            *state = ServerState::Starting;
        }

        self.init_logging()?;
        self.init_metrics();
        info!("Initializing Pulse server...");

        let gateway = Arc::new(build_gateway(&self.config)?);
        gateway.start();
        self.gateway = Some(gateway);

        info!("Pulse server initialized");
        Ok(())
    }

    fn init_logging(&mut self) -> Result<(), ServerError> {
        match init_logging(&self.config.logging) {
            Ok(guards) => {
                self._log_guards = guards;
                info!(level = %self.config.logging.level, "Logging initialized");
                Ok(())
            }
            // An embedding process may already own the global subscriber.
            Err(LoggingError::AlreadyInitialized(reason)) => {
                warn!(%reason, "Keeping the existing tracing subscriber");
                Ok(())
            }
            Err(e) => Err(ServerError::InitializationError(format!(
                "Failed to initialize logging: {e}"
            ))),
        }
    }

    fn init_metrics(&self) {
        if let Err(e) = init_metrics(&self.config.metrics) {
            warn!("Metrics initialization: {}", e);
        } else if self.config.metrics.enabled {
            info!("Metrics initialized");
        }
    }

    /// Feeds records from `source` until it is exhausted or a shutdown
    /// signal arrives, then shuts down gracefully.
    pub async fn run(&mut self, source: FeedSource) -> Result<FeedStats, ServerError> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Starting {
                return Err(ServerError::InvalidState(
                    "Server must be initialized before running".to_string(),
                ));
            }
            *state = ServerState::Running;
        }

        let gateway = self
            .gateway
            .clone()
            .ok_or_else(|| ServerError::InvalidState("Gateway not built".to_string()))?;

        let shutdown_ctrl = self.shutdown.clone();
        tokio::spawn(async move {
            setup_signal_handlers(shutdown_ctrl).await;
        });
        self.spawn_stats_logger(&gateway);

        let reader = match open_feed(&source).await {
            Ok(reader) => reader,
            Err(e) => {
                self.graceful_shutdown().await;
                return Err(e);
            }
        };

        info!(?source, "Pulse server running");
        let stats = run_feed(reader, &gateway, &self.shutdown).await;

        self.graceful_shutdown().await;
        Ok(stats)
    }

    fn spawn_stats_logger(&mut self, gateway: &Arc<Gateway>) {
        if !self.config.stats.enabled {
            return;
        }
        let interval = self.config.stats.interval;
        let gateway = Arc::downgrade(gateway);
        let shutdown = self.shutdown.clone();

        self.stats_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.wait_for_shutdown() => break,
                    _ = ticker.tick() => {}
                }
                let Some(gateway) = gateway.upgrade() else { break };
                log_stats(&gateway);
            }
        }));
    }

    async fn graceful_shutdown(&mut self) {
        {
            let mut state = self.state.write().await;
            *state = ServerState::ShuttingDown;
        }
        info!("Performing graceful shutdown...");
        self.shutdown.initiate_shutdown();

        if let Some(handle) = self.stats_task.take() {
            handle.abort();
        }

        if let Some(gateway) = self.gateway.take() {
            log_stats(&gateway);
            let timeout = self.config.shutdown.timeout;
            let teardown = tokio::task::spawn_blocking(move || gateway.shutdown());
            if tokio::time::timeout(timeout, teardown).await.is_err() {
                warn!(?timeout, "Gateway shutdown did not finish in time");
            }
        }

        {
            let mut state = self.state.write().await;
            *state = ServerState::Stopped;
        }
        self.shutdown.mark_complete();
        info!("Graceful shutdown complete");
    }

    /// Requests shutdown; `run` returns once teardown finishes.
    pub fn shutdown(&self) {
        self.shutdown.initiate_shutdown();
    }
}

impl std::fmt::Debug for PulseServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseServer")
            .field("gateway", &self.gateway)
            .field("shutdown_initiated", &self.shutdown.is_shutdown_initiated())
            .finish_non_exhaustive()
    }
}

/// Builds breakers, dispatcher, pipeline and gateway from configuration.
pub fn build_gateway(config: &ServerConfig) -> Result<Gateway, ServerError> {
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breakers.clone()));
    let dispatcher = Arc::new(AlertDispatcher::new(config.dispatch.clone(), breakers));

    if let Some(webhook) = &config.webhook {
        let handler = WebhookHandler::new(webhook)
            .map_err(|e| ServerError::InitializationError(e.to_string()))?;
        info!(url = %handler.url(), "Webhook delivery enabled");
        dispatcher.register_handler(Arc::new(handler));
    }

    let subscriptions = Arc::new(SubscriptionManager::new(config.subscriptions.clone()));
    let pipeline = AlertPipeline::new(subscriptions, dispatcher)
        .with_store(Arc::new(InMemoryStore::new()));

    Ok(Gateway::new(config.gateway.clone(), Arc::new(pipeline)))
}

async fn open_feed(
    source: &FeedSource,
) -> Result<Box<dyn AsyncBufRead + Unpin + Send>, ServerError> {
    match source {
        FeedSource::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
        FeedSource::File(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| {
                ServerError::RuntimeError(format!("Cannot open feed {}: {e}", path.display()))
            })?;
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

fn log_stats(gateway: &Gateway) {
    let stats = gateway.stats();
    info!(
        sessions = stats.sessions,
        pool_active = stats.pool.active,
        pool_idle = stats.pool.idle,
        disconnected = stats.reconnect.disconnected,
        buffered = stats.reconnect.buffered_messages,
        subscriptions = stats.subscriptions.total,
        dispatched = stats.dispatcher.dispatched,
        undelivered = stats.dispatcher.undelivered,
        open_breakers = stats.breakers.open,
        "Gateway stats"
    );
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A component failed to start.
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Lifecycle method called in the wrong state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure while running.
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}
