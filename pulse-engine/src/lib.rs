//! # Pulse Engine
//!
//! Turns inbound market-data records into delivered alerts:
//!
//! - [`filter`]: conditions and AND/OR filter expressions
//! - [`subscription`]: per-user subscriptions evaluated against each record
//! - [`alert`]: alerts, delivery handlers and the breaker-guarded dispatcher
//! - [`store`]: optional persistence of subscriptions and alerts
//! - [`pipeline`]: identity-checked subscribe/unsubscribe and record processing
//!
//! # Example
//!
//! ```
//! use pulse_engine::filter::{FilterCondition, FilterExpression, FilterLogic, FilterOperator};
//! use pulse_core::types::Record;
//!
//! let filter = FilterExpression::new("moutai", FilterLogic::And)
//!     .with_condition(FilterCondition::new("symbol", FilterOperator::Eq, "600519"))
//!     .with_condition(FilterCondition::new("price", FilterOperator::Gt, 1800.0));
//!
//! let record = Record::new().with("symbol", "600519").with("price", 1850.0);
//! assert!(filter.matches(&record));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod alert;
pub mod filter;
pub mod pipeline;
pub mod store;
pub mod subscription;

pub use alert::{Alert, AlertDispatcher, DeliveryHandler, DeliveryReceipt, DispatchConfig};
pub use filter::{FilterCondition, FilterExpression, FilterLogic, FilterOperator};
pub use pipeline::AlertPipeline;
pub use store::{InMemoryStore, SubscriptionStore};
pub use subscription::{NewSubscription, Subscription, SubscriptionManager, SubscriptionManagerConfig};
