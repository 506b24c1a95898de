//! Alert priorities and delivery methods.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority attached to a subscription and the alerts it produces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Delivered first, typically price breakouts.
    High,
    /// Default priority.
    #[default]
    Medium,
    /// Informational alerts.
    Low,
}

impl Priority {
    /// Returns the priority as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel through which an alert is delivered.
///
/// The set is closed: every method has exactly one registered handler in the
/// dispatcher and one circuit breaker named after [`DeliveryMethod::dependency_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    /// Push to the recipient's live client sessions.
    #[serde(alias = "WEBSOCKET")]
    WebSocket,
    /// E-mail relay.
    #[serde(alias = "EMAIL")]
    Email,
    /// HTTP callback to an external endpoint.
    #[serde(alias = "WEBHOOK")]
    Webhook,
    /// SMS relay.
    #[serde(alias = "SMS")]
    Sms,
}

impl DeliveryMethod {
    /// All delivery methods, in dispatch order.
    pub const ALL: [Self; 4] = [Self::WebSocket, Self::Email, Self::Webhook, Self::Sms];

    /// Name of the downstream dependency guarded by a circuit breaker.
    #[must_use]
    pub const fn dependency_name(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Sms => "sms",
        }
    }

    /// Position of this method in [`DeliveryMethod::ALL`].
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::WebSocket => 0,
            Self::Email => 1,
            Self::Webhook => 2,
            Self::Sms => 3,
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dependency_name())
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            "sms" => Ok(Self::Sms),
            other => Err(format!("unknown delivery method: {other}")),
        }
    }
}
