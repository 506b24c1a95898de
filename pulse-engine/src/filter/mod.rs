//! Condition and filter expression evaluation.
//!
//! Evaluation is pure: a condition never mutates the record and a missing
//! field is a non-match rather than an error. The only evaluation-time
//! failure is a pattern that does not compile, which can happen when an
//! expression was loaded without validation.

mod condition;
mod expression;
pub mod pattern;

pub use condition::{ConditionValue, FilterCondition, FilterOperator};
pub use expression::{FilterExpression, FilterLogic};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Evaluation-time filter failure, isolated to the subscription it occurs in.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterError {
    /// A pattern failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern as written.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// The operator cannot be applied to the condition's value.
    #[error("operator {operator} is not supported on field '{field}' with this value")]
    UnsupportedOperator {
        /// Field name.
        field: String,
        /// Operator name.
        operator: String,
    },
}
