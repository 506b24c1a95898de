//! Subscription lifecycle and record matching.

mod manager;
mod sink;
mod types;

pub use manager::{SubscriptionManager, SubscriptionManagerConfig, SubscriptionStats};
pub use sink::{CollectingErrorSink, ErrorSink, LoggingErrorSink};
pub use types::{NewSubscription, Subscription, SubscriptionMatch};
