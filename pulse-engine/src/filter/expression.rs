//! Boolean combinations of conditions.

use super::{FilterCondition, FilterError};
use pulse_core::error::ValidationError;
use pulse_core::types::Record;
use serde::{Deserialize, Serialize};

/// How conditions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterLogic {
    /// Every condition must match.
    #[default]
    #[serde(alias = "and")]
    And,
    /// At least one condition must match.
    #[serde(alias = "or")]
    Or,
}

/// An AND/OR combination of conditions.
///
/// Evaluation short-circuits left to right. The order only affects how much
/// work is done, never the outcome.
///
/// # Example
///
/// ```
/// use pulse_core::types::Record;
/// use pulse_engine::filter::{FilterCondition, FilterExpression, FilterLogic, FilterOperator};
///
/// let expr = FilterExpression::new("moutai", FilterLogic::And)
///     .with_condition(FilterCondition::new("symbol", FilterOperator::Eq, "600519"));
///
/// assert!(expr.matches(&Record::new().with("symbol", "600519").with("price", 10)));
/// assert!(!expr.matches(&Record::new().with("symbol", "000001")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpression {
    /// Expression id.
    #[serde(default = "generate_id")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Combination logic.
    #[serde(default)]
    pub logic: FilterLogic,
    /// Ordered conditions.
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    /// Disabled expressions never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

impl FilterExpression {
    /// Creates an enabled expression with no conditions.
    #[must_use]
    pub fn new(name: impl Into<String>, logic: FilterLogic) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            logic,
            conditions: Vec::new(),
            enabled: true,
        }
    }

    /// Appends a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Enables or disables the expression.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates every condition.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.conditions.iter().try_for_each(FilterCondition::validate)
    }

    /// Evaluates the expression, treating errors as no match.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.evaluate(record).unwrap_or(false)
    }

    /// Evaluates the expression against `record`.
    ///
    /// Returns `Ok(false)` immediately when disabled or empty. A condition
    /// error is returned only when no other condition decides the result.
    pub fn evaluate(&self, record: &Record) -> Result<bool, FilterError> {
        if !self.enabled || self.conditions.is_empty() {
            return Ok(false);
        }

        // The deciding value wins over a condition that failed to evaluate,
        // wherever it sits in the list.
        let decisive = matches!(self.logic, FilterLogic::Or);
        let mut first_error = None;
        for condition in &self.conditions {
            match condition.evaluate(record) {
                Ok(matched) if matched == decisive => return Ok(decisive),
                Ok(_) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(!decisive), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOperator;
    use proptest::prelude::*;

    fn price_above(v: i32) -> FilterCondition {
        FilterCondition::new("price", FilterOperator::Gt, v)
    }

    #[test]
    fn test_and_requires_all() {
        let expr = FilterExpression::new("e", FilterLogic::And)
            .with_condition(price_above(5))
            .with_condition(FilterCondition::new("symbol", FilterOperator::Eq, "600519"));
        assert!(expr.matches(&Record::new().with("price", 10).with("symbol", "600519")));
        assert!(!expr.matches(&Record::new().with("price", 10).with("symbol", "000001")));
    }

    #[test]
    fn test_or_requires_any() {
        let expr = FilterExpression::new("e", FilterLogic::Or)
            .with_condition(price_above(100))
            .with_condition(FilterCondition::new("symbol", FilterOperator::Eq, "6*"));
        assert!(expr.matches(&Record::new().with("price", 1).with("symbol", "600519")));
        assert!(!expr.matches(&Record::new().with("price", 1).with("symbol", "000001")));
    }

    #[test]
    fn test_empty_expression_never_fires() {
        let expr = FilterExpression::new("empty", FilterLogic::Or);
        assert_eq!(expr.evaluate(&Record::new().with("price", 1)), Ok(false));
    }

    #[test]
    fn test_short_circuit_skips_later_errors() {
        let broken = FilterCondition::new("symbol", FilterOperator::Match, "[");
        let and = FilterExpression::new("e", FilterLogic::And)
            .with_condition(price_above(100))
            .with_condition(broken.clone());
        assert_eq!(and.evaluate(&Record::new().with("price", 1).with("symbol", "x")), Ok(false));

        let or = FilterExpression::new("e", FilterLogic::Or)
            .with_condition(price_above(0))
            .with_condition(broken);
        assert_eq!(or.evaluate(&Record::new().with("price", 1).with("symbol", "x")), Ok(true));
    }

    #[test]
    fn test_broken_condition_position_does_not_matter() {
        let broken = FilterCondition::new("symbol", FilterOperator::Match, "[");
        let record = Record::new().with("price", 1).with("symbol", "x");

        for logic in [FilterLogic::And, FilterLogic::Or] {
            let decisive = price_above(if logic == FilterLogic::Or { 0 } else { 100 });
            let first = FilterExpression::new("e", logic)
                .with_condition(broken.clone())
                .with_condition(decisive.clone());
            let last = FilterExpression::new("e", logic)
                .with_condition(decisive)
                .with_condition(broken.clone());
            let expected = Ok(logic == FilterLogic::Or);
            assert_eq!(first.evaluate(&record), expected);
            assert_eq!(last.evaluate(&record), expected);
        }

        // Without a deciding condition the error surfaces.
        let or = FilterExpression::new("e", FilterLogic::Or)
            .with_condition(broken)
            .with_condition(price_above(100));
        assert!(or.evaluate(&record).is_err());
    }

    #[test]
    fn test_validate_reports_first_bad_condition() {
        let expr = FilterExpression::new("e", FilterLogic::And)
            .with_condition(price_above(1))
            .with_condition(FilterCondition::new("price", FilterOperator::Lt, "cheap"));
        assert!(matches!(
            expr.validate(),
            Err(ValidationError::OperatorMismatch { .. })
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let yaml = r#"
name: breakout
logic: and
conditions:
  - { field: symbol, operator: "==", value: "600519" }
  - { field: price, operator: ">", value: 9 }
"#;
        let expr: FilterExpression = serde_yaml::from_str(yaml).unwrap();
        assert!(expr.enabled);
        assert!(!expr.id.is_empty());
        assert!(expr.matches(&Record::new().with("symbol", "600519").with("price", 10)));
    }

    fn arb_condition() -> impl Strategy<Value = FilterCondition> {
        let field = prop::sample::select(vec!["a", "b", "c", "missing"]);
        let op = prop::sample::select(vec![
            FilterOperator::Eq,
            FilterOperator::Ne,
            FilterOperator::Gt,
            FilterOperator::Gte,
            FilterOperator::Lt,
            FilterOperator::Lte,
        ]);
        (field, op, -5i32..5).prop_map(|(f, op, v)| FilterCondition::new(f, op, v))
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        (-5i32..5, -5i32..5, "[a-z]{0,3}").prop_map(|(a, b, c)| {
            Record::new().with("a", a).with("b", b).with("c", c)
        })
    }

    proptest! {
        #[test]
        fn prop_and_is_commutative(
            conditions in prop::collection::vec(arb_condition(), 1..6),
            record in arb_record(),
            rotate in 0usize..6,
        ) {
            let mut expr = FilterExpression::new("p", FilterLogic::And);
            expr.conditions = conditions.clone();
            let expected = expr.evaluate(&record).unwrap();

            let mut reversed = conditions.clone();
            reversed.reverse();
            expr.conditions = reversed;
            prop_assert_eq!(expr.evaluate(&record).unwrap(), expected);

            let mut rotated = conditions;
            let k = rotate % rotated.len();
            rotated.rotate_left(k);
            expr.conditions = rotated;
            prop_assert_eq!(expr.evaluate(&record).unwrap(), expected);
        }

        #[test]
        fn prop_disabled_never_matches(
            conditions in prop::collection::vec(arb_condition(), 0..6),
            record in arb_record(),
            or in any::<bool>(),
        ) {
            let logic = if or { FilterLogic::Or } else { FilterLogic::And };
            let mut expr = FilterExpression::new("p", logic).with_enabled(false);
            expr.conditions = conditions;
            prop_assert_eq!(expr.evaluate(&record), Ok(false));
        }
    }
}
