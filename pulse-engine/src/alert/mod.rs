//! Alerts, delivery handlers and the dispatcher.

mod dispatcher;
mod handler;
mod types;

pub use dispatcher::{AlertDispatcher, DispatchConfig, DispatchReport, DispatcherStats, MethodStats};
pub use handler::{
    CallbackHandler, DeliveryHandler, DeliveryReceipt, QueueHandler, WebhookConfig, WebhookHandler,
};
pub use types::{Alert, AlertSource};
