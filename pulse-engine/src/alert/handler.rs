//! Delivery handlers.
//!
//! Each [`DeliveryMethod`] has at most one handler registered with the
//! dispatcher. Handlers own their transport; the dispatcher bounds every call
//! with a timeout and a circuit breaker.

use super::types::Alert;
use async_trait::async_trait;
use pulse_core::error::DeliveryError;
use pulse_core::types::DeliveryMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Successful outcome of one delivery method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryReceipt {
    /// Reached `recipients` live endpoints.
    Delivered {
        /// Endpoints reached.
        recipients: usize,
        /// Endpoints that timed out and were buffered instead.
        #[serde(default)]
        timed_out: usize,
    },
    /// Accepted into an offline buffer for replay.
    Deferred {
        /// Buffers the alert was added to.
        buffered: usize,
        /// Endpoints that timed out before the alert was buffered.
        #[serde(default)]
        timed_out: usize,
    },
}

impl DeliveryReceipt {
    /// A single successful hand-off.
    pub const ONE: Self = Self::Delivered {
        recipients: 1,
        timed_out: 0,
    };

    /// Endpoints that exceeded their send timeout.
    ///
    /// The alert still counts as delivered, but the dispatcher records a
    /// breaker failure for the method.
    #[must_use]
    pub const fn timed_out(&self) -> usize {
        match self {
            Self::Delivered { timed_out, .. } | Self::Deferred { timed_out, .. } => *timed_out,
        }
    }
}

/// Delivers alerts over one method.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Method this handler serves.
    fn method(&self) -> DeliveryMethod;

    /// Delivers one alert.
    async fn deliver(&self, alert: &Alert) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Handler backed by a synchronous closure.
///
/// # Example
///
/// ```
/// use pulse_core::types::DeliveryMethod;
/// use pulse_engine::alert::{CallbackHandler, DeliveryReceipt};
///
/// let handler = CallbackHandler::new(DeliveryMethod::Sms, |alert| {
///     println!("sms to {}", alert.recipient);
///     Ok(DeliveryReceipt::ONE)
/// });
/// ```
pub struct CallbackHandler<F> {
    method: DeliveryMethod,
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&Alert) -> Result<DeliveryReceipt, DeliveryError> + Send + Sync,
{
    /// Wraps `callback` as the handler for `method`.
    pub fn new(method: DeliveryMethod, callback: F) -> Self {
        Self { method, callback }
    }
}

#[async_trait]
impl<F> DeliveryHandler for CallbackHandler<F>
where
    F: Fn(&Alert) -> Result<DeliveryReceipt, DeliveryError> + Send + Sync,
{
    fn method(&self) -> DeliveryMethod {
        self.method
    }

    async fn deliver(&self, alert: &Alert) -> Result<DeliveryReceipt, DeliveryError> {
        (self.callback)(alert)
    }
}

/// Hands alerts to an in-process consumer, such as a mail or SMS relay task.
///
/// A full queue applies backpressure, bounded by the dispatcher's timeout.
pub struct QueueHandler {
    method: DeliveryMethod,
    sender: mpsc::Sender<Alert>,
}

impl QueueHandler {
    /// Creates a handler and the receiving end of its queue.
    #[must_use]
    pub fn channel(method: DeliveryMethod, capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { method, sender }, receiver)
    }
}

#[async_trait]
impl DeliveryHandler for QueueHandler {
    fn method(&self) -> DeliveryMethod {
        self.method
    }

    async fn deliver(&self, alert: &Alert) -> Result<DeliveryReceipt, DeliveryError> {
        self.sender
            .send(alert.clone())
            .await
            .map_err(|_| DeliveryError::transport(self.method, "queue consumer has shut down"))?;
        Ok(DeliveryReceipt::ONE)
    }
}

/// Webhook endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoint receiving a JSON POST per alert.
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// HTTP client timeout.
    #[serde(default = "default_webhook_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

impl WebhookConfig {
    /// Creates a configuration for `url` with no extra headers.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout: default_webhook_timeout(),
        }
    }
}

/// Posts alerts as JSON to an HTTP endpoint.
pub struct WebhookHandler {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookHandler {
    /// Creates a handler from configuration.
    pub fn new(config: &WebhookConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DeliveryError::transport(DeliveryMethod::Webhook, e.to_string()))?;
        Ok(Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            client,
        })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryHandler for WebhookHandler {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Webhook
    }

    async fn deliver(&self, alert: &Alert) -> Result<DeliveryReceipt, DeliveryError> {
        let mut request = self.client.post(&self.url).json(alert);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::transport(DeliveryMethod::Webhook, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(alert = %alert.id, url = %self.url, "Webhook delivery successful");
            Ok(DeliveryReceipt::ONE)
        } else {
            Err(DeliveryError::transport(
                DeliveryMethod::Webhook,
                format!("HTTP {status}"),
            ))
        }
    }
}
