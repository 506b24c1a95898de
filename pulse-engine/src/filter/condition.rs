//! Single-field predicates.

use super::FilterError;
use super::pattern;
use pulse_core::error::ValidationError;
use pulse_core::types::{FieldValue, Record};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Comparison operator of a [`FilterCondition`].
///
/// Deserializes from names (`"EQ"`, `"gte"`) or symbols (`"=="`, `">="`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    /// Equality, wildcard match for glob patterns, membership for lists.
    #[serde(alias = "eq", alias = "==")]
    Eq,
    /// Negated [`FilterOperator::Eq`].
    #[serde(alias = "ne", alias = "!=")]
    Ne,
    /// Numeric greater-than.
    #[serde(alias = "gt", alias = ">")]
    Gt,
    /// Numeric greater-or-equal.
    #[serde(alias = "gte", alias = ">=")]
    Gte,
    /// Numeric less-than.
    #[serde(alias = "lt", alias = "<")]
    Lt,
    /// Numeric less-or-equal.
    #[serde(alias = "lte", alias = "<=")]
    Lte,
    /// Regular expression search.
    #[serde(alias = "match", alias = "~")]
    Match,
    /// List membership.
    #[serde(alias = "in")]
    In,
}

impl FilterOperator {
    /// Returns the operator name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Gt => "GT",
            Self::Gte => "GTE",
            Self::Lt => "LT",
            Self::Lte => "LTE",
            Self::Match => "MATCH",
            Self::In => "IN",
        }
    }

    /// Returns true for the ordering operators.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    fn compare(self, actual: f64, expected: f64) -> bool {
        match self {
            Self::Gt => actual > expected,
            Self::Gte => actual >= expected,
            Self::Lt => actual < expected,
            Self::Lte => actual <= expected,
            _ => false,
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    /// A list; the condition becomes a membership test.
    List(Vec<FieldValue>),
    /// A single scalar.
    Scalar(FieldValue),
}

impl From<FieldValue> for ConditionValue {
    fn from(value: FieldValue) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<FieldValue>> for ConditionValue {
    fn from(values: Vec<FieldValue>) -> Self {
        Self::List(values)
    }
}

/// A predicate over one record field.
///
/// Conditions are stateless apart from a lazily compiled pattern cache.
///
/// # Example
///
/// ```
/// use pulse_core::types::Record;
/// use pulse_engine::filter::{FilterCondition, FilterOperator};
///
/// let condition = FilterCondition::new("price", FilterOperator::Gte, 10.0);
/// assert!(condition.matches(&Record::new().with("price", 12)));
/// assert!(!condition.matches(&Record::new().with("symbol", "600519")));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCondition {
    field: String,
    operator: FilterOperator,
    value: ConditionValue,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(skip)]
    pattern: OnceLock<Result<Regex, String>>,
}

impl PartialEq for FilterCondition {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
            && self.operator == other.operator
            && self.value == other.value
            && self.case_sensitive == other.case_sensitive
    }
}

impl FilterCondition {
    /// Creates a case-insensitive condition.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FieldValue>,
    ) -> Self {
        Self::with_value(field, operator, ConditionValue::Scalar(value.into()))
    }

    /// Creates a membership condition.
    #[must_use]
    pub fn one_of<V: Into<FieldValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::with_value(
            field,
            FilterOperator::In,
            ConditionValue::List(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Creates a condition from an explicit [`ConditionValue`].
    #[must_use]
    pub fn with_value(
        field: impl Into<String>,
        operator: FilterOperator,
        value: ConditionValue,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            case_sensitive: false,
            pattern: OnceLock::new(),
        }
    }

    /// Makes text comparisons case-sensitive.
    #[must_use]
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self.pattern = OnceLock::new();
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the operator.
    #[must_use]
    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &ConditionValue {
        &self.value
    }

    /// Returns true if text comparisons are case-sensitive.
    #[must_use]
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Checks that the operator makes sense for the value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.field.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "condition.field".to_string(),
            });
        }

        let mismatch = |reason: &str| ValidationError::OperatorMismatch {
            field: self.field.clone(),
            operator: self.operator.to_string(),
            reason: reason.to_string(),
        };

        match (&self.value, self.operator) {
            (ConditionValue::List(items), _) if items.is_empty() => {
                Err(mismatch("list value must not be empty"))
            }
            (ConditionValue::List(_), FilterOperator::Eq | FilterOperator::Ne | FilterOperator::In) => {
                Ok(())
            }
            (ConditionValue::List(_), _) => Err(mismatch("operator does not accept a list value")),
            (ConditionValue::Scalar(_), FilterOperator::In) => Err(mismatch("requires a list value")),
            (ConditionValue::Scalar(v), op) if op.is_numeric() => match v.as_f64() {
                Some(_) => Ok(()),
                None => Err(mismatch("requires a numeric value")),
            },
            (ConditionValue::Scalar(FieldValue::Text(_)), FilterOperator::Match) => {
                self.compiled_pattern().map(|_| ()).map_err(|e| match e {
                        FilterError::InvalidPattern { pattern, reason } => {
                            ValidationError::InvalidPattern { pattern, reason }
                        }
                        other => mismatch(&other.to_string()),
                    })
            }
            (ConditionValue::Scalar(_), FilterOperator::Match) => {
                Err(mismatch("requires a string pattern"))
            }
            (ConditionValue::Scalar(FieldValue::Null), _) => {
                Err(mismatch("cannot compare against null"))
            }
            (ConditionValue::Scalar(_), _) => Ok(()),
        }
    }

    /// Evaluates the condition, treating evaluation errors as no match.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.evaluate(record).unwrap_or(false)
    }

    /// Evaluates the condition against `record`.
    ///
    /// A missing or null field is never an error, it simply does not match.
    pub fn evaluate(&self, record: &Record) -> Result<bool, FilterError> {
        let Some(actual) = record.get(&self.field) else {
            return Ok(false);
        };

        match &self.value {
            ConditionValue::List(items) => {
                let member = items.iter().any(|item| self.values_equal(actual, item));
                match self.operator {
                    FilterOperator::Eq | FilterOperator::In => Ok(member),
                    FilterOperator::Ne => Ok(!member),
                    op => Err(FilterError::UnsupportedOperator {
                        field: self.field.clone(),
                        operator: op.to_string(),
                    }),
                }
            }
            ConditionValue::Scalar(expected) => match self.operator {
                FilterOperator::Eq | FilterOperator::In => self.scalar_equal(actual, expected),
                FilterOperator::Ne => self.scalar_equal(actual, expected).map(|eq| !eq),
                FilterOperator::Match => {
                    let Some(text) = actual.to_text() else {
                        return Ok(false);
                    };
                    Ok(self.compiled_pattern()?.is_match(&text))
                }
                op => Ok(match (actual.as_f64(), expected.as_f64()) {
                    (Some(a), Some(e)) => op.compare(a, e),
                    _ => false,
                }),
            },
        }
    }

    fn scalar_equal(&self, actual: &FieldValue, expected: &FieldValue) -> Result<bool, FilterError> {
        if let FieldValue::Text(glob) = expected
            && pattern::is_wildcard(glob)
        {
            let Some(text) = actual.to_text() else {
                return Ok(false);
            };
            return Ok(self.compiled_pattern()?.is_match(&text));
        }
        Ok(self.values_equal(actual, expected))
    }

    #[allow(clippy::float_cmp)]
    fn values_equal(&self, actual: &FieldValue, expected: &FieldValue) -> bool {
        match (actual, expected) {
            (_, FieldValue::Null) => false,
            (_, FieldValue::Number(e)) => actual.as_f64() == Some(*e),
            (FieldValue::Number(a), FieldValue::Text(e)) => {
                e.trim().parse::<f64>().is_ok_and(|e| e == *a)
            }
            (_, FieldValue::Text(e)) => actual.to_text().is_some_and(|a| self.text_equal(&a, e)),
            (_, FieldValue::Bool(e)) => match actual {
                FieldValue::Bool(a) => a == e,
                other => other
                    .to_text()
                    .is_some_and(|a| a.eq_ignore_ascii_case(&e.to_string())),
            },
        }
    }

    fn text_equal(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.to_lowercase() == b.to_lowercase()
        }
    }

    /// Pattern for `MATCH` or a wildcard `EQ`/`NE`, compiled once.
    fn compiled_pattern(&self) -> Result<&Regex, FilterError> {
        let result = self.pattern.get_or_init(|| {
            let source = match (&self.value, self.operator) {
                (ConditionValue::Scalar(FieldValue::Text(p)), FilterOperator::Match) => p.clone(),
                (ConditionValue::Scalar(FieldValue::Text(p)), _) => pattern::wildcard_to_regex(p),
                _ => return Err("condition has no pattern".to_string()),
            };
            pattern::compile(&source, self.case_sensitive).map_err(|e| e.to_string())
        });

        result.as_ref().map_err(|reason| FilterError::InvalidPattern {
            pattern: match &self.value {
                ConditionValue::Scalar(v) => v.to_string(),
                ConditionValue::List(_) => String::new(),
            },
            reason: reason.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick() -> Record {
        Record::new()
            .with("symbol", "600519")
            .with("name", "Kweichow Moutai")
            .with("price", 10)
            .with("halted", false)
    }

    #[test]
    fn test_exact_text_equality() {
        let cond = FilterCondition::new("symbol", FilterOperator::Eq, "600519");
        assert!(cond.matches(&tick()));
        assert!(!cond.matches(&Record::new().with("symbol", "000001")));
    }

    #[test]
    fn test_unknown_field_is_no_match() {
        let cond = FilterCondition::new("volume", FilterOperator::Gt, 1);
        assert_eq!(cond.evaluate(&tick()), Ok(false));
        let ne = FilterCondition::new("volume", FilterOperator::Ne, 1);
        assert_eq!(ne.evaluate(&tick()), Ok(false));
    }

    #[test]
    fn test_numeric_coercion_both_sides() {
        let record = Record::new().with("price", "10.5");
        assert!(FilterCondition::new("price", FilterOperator::Gt, 10).matches(&record));
        assert!(FilterCondition::new("price", FilterOperator::Lte, "10.5").matches(&record));
        assert!(!FilterCondition::new("name", FilterOperator::Gt, 1).matches(&tick()));
    }

    #[test]
    fn test_number_equals_numeric_text() {
        let cond = FilterCondition::new("price", FilterOperator::Eq, "10");
        assert!(cond.matches(&tick()));
        let cond = FilterCondition::new("symbol", FilterOperator::Eq, 600_519);
        assert!(cond.matches(&tick()));
    }

    #[test]
    fn test_case_sensitivity() {
        let insensitive = FilterCondition::new("name", FilterOperator::Eq, "kweichow moutai");
        assert!(insensitive.matches(&tick()));
        let sensitive = insensitive.clone().case_sensitive(true);
        assert!(!sensitive.matches(&tick()));
    }

    #[test]
    fn test_wildcard_equality() {
        assert!(FilterCondition::new("symbol", FilterOperator::Eq, "60*").matches(&tick()));
        assert!(FilterCondition::new("symbol", FilterOperator::Eq, "60051?").matches(&tick()));
        assert!(!FilterCondition::new("symbol", FilterOperator::Eq, "00*").matches(&tick()));
        assert!(FilterCondition::new("symbol", FilterOperator::Ne, "00*").matches(&tick()));
    }

    #[test]
    fn test_regex_match() {
        let cond = FilterCondition::new("name", FilterOperator::Match, "moutai$");
        assert!(cond.matches(&tick()));
        let cond = FilterCondition::new("name", FilterOperator::Match, "^Moutai");
        assert!(!cond.matches(&tick()));
    }

    #[test]
    fn test_list_membership() {
        let cond = FilterCondition::one_of("symbol", ["000001", "600519"]);
        assert!(cond.matches(&tick()));

        let not_in = FilterCondition::with_value(
            "symbol",
            FilterOperator::Ne,
            ConditionValue::List(vec!["600519".into()]),
        );
        assert!(!not_in.matches(&tick()));

        let eq_list = FilterCondition::with_value(
            "price",
            FilterOperator::Eq,
            ConditionValue::List(vec![5.into(), 10.into()]),
        );
        assert!(eq_list.matches(&tick()));
    }

    #[test]
    fn test_bool_equality() {
        assert!(FilterCondition::new("halted", FilterOperator::Eq, false).matches(&tick()));
        assert!(!FilterCondition::new("halted", FilterOperator::Eq, true).matches(&tick()));
    }

    #[test]
    fn test_validation() {
        assert!(FilterCondition::new("price", FilterOperator::Gt, 10).validate().is_ok());
        assert!(matches!(
            FilterCondition::new("", FilterOperator::Eq, "x").validate(),
            Err(ValidationError::EmptyField { .. })
        ));
        assert!(matches!(
            FilterCondition::new("price", FilterOperator::Gt, "high").validate(),
            Err(ValidationError::OperatorMismatch { .. })
        ));
        assert!(matches!(
            FilterCondition::new("name", FilterOperator::Match, 5).validate(),
            Err(ValidationError::OperatorMismatch { .. })
        ));
        assert!(matches!(
            FilterCondition::new("name", FilterOperator::Match, "(unclosed").validate(),
            Err(ValidationError::InvalidPattern { .. })
        ));
        assert!(matches!(
            FilterCondition::new("symbol", FilterOperator::In, "600519").validate(),
            Err(ValidationError::OperatorMismatch { .. })
        ));
        assert!(
            FilterCondition::with_value("price", FilterOperator::Gt, ConditionValue::List(vec![1.into()]))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_invalid_pattern_is_an_evaluation_error() {
        let cond = FilterCondition::new("name", FilterOperator::Match, "[");
        assert!(matches!(
            cond.evaluate(&tick()),
            Err(FilterError::InvalidPattern { .. })
        ));
        assert!(!cond.matches(&tick()));
    }

    #[test]
    fn test_deserialize_symbolic_operator() {
        let cond: FilterCondition =
            serde_json::from_str(r#"{"field":"price","operator":">=","value":10}"#).unwrap();
        assert_eq!(cond.operator(), FilterOperator::Gte);
        assert!(!cond.is_case_sensitive());

        let cond: FilterCondition =
            serde_json::from_str(r#"{"field":"symbol","operator":"IN","value":["a","b"]}"#).unwrap();
        assert!(matches!(cond.value(), ConditionValue::List(v) if v.len() == 2));
    }
}
