//! Built-in filter expressions
//!
//! ```json
//! {"op": "and", "children": [
//!   {"op": "term", "field": "key", "condition": "CONTAINS", "value": "web"},
//!   {"op": "term", "field": "effectiveTime", "condition": "GREATER_THAN", "value": "2024-01-01"}
//! ]}
//! ```
//!
//! Term values are text. Against time fields they are read as date-times,
//! against numeric values as numbers, otherwise compared as strings.
//! `BETWEEN` takes two comma-separated bounds, both inclusive.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::codec::Val;
use crate::store::{StoreError, StoreResult};

use super::{is_time_field, DateTimeSettings, Predicate, PredicateFactory, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqualTo,
    LessThan,
    LessThanOrEqualTo,
    Contains,
    Between,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Expression {
    /// Matches every row
    All,
    Term {
        field: String,
        condition: Condition,
        value: String,
    },
    And {
        children: Vec<Expression>,
    },
    Or {
        children: Vec<Expression>,
    },
    Not {
        child: Box<Expression>,
    },
}

impl Expression {
    pub fn term(field: impl Into<String>, condition: Condition, value: impl Into<String>) -> Self {
        Expression::Term {
            field: field.into(),
            condition,
            value: value.into(),
        }
    }

    /// Resolves literals up front so matching never parses text twice.
    pub fn compile(&self, settings: &DateTimeSettings) -> StoreResult<CompiledExpression> {
        Ok(match self {
            Expression::All => CompiledExpression::All,
            Expression::And { children } => CompiledExpression::And(
                children
                    .iter()
                    .map(|c| c.compile(settings))
                    .collect::<StoreResult<_>>()?,
            ),
            Expression::Or { children } => CompiledExpression::Or(
                children
                    .iter()
                    .map(|c| c.compile(settings))
                    .collect::<StoreResult<_>>()?,
            ),
            Expression::Not { child } => CompiledExpression::Not(Box::new(child.compile(settings)?)),
            Expression::Term {
                field,
                condition,
                value,
            } => {
                let operands = if *condition == Condition::Between {
                    let (low, high) = value.split_once(',').ok_or_else(|| {
                        StoreError::invalid_query(format!(
                            "BETWEEN on {} needs two comma-separated values, got '{}'",
                            field, value
                        ))
                    })?;
                    vec![
                        Operand::parse(field, low, settings)?,
                        Operand::parse(field, high, settings)?,
                    ]
                } else {
                    vec![Operand::parse(field, value, settings)?]
                };
                CompiledExpression::Term {
                    field: field.clone(),
                    condition: *condition,
                    operands,
                }
            }
        })
    }
}

/// A term literal in the forms it may be compared as
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    text: String,
    number: Option<f64>,
}

impl Operand {
    fn parse(field: &str, text: &str, settings: &DateTimeSettings) -> StoreResult<Self> {
        let text = text.trim();
        let number = if is_time_field(field) {
            Some(settings.parse_millis(text)? as f64)
        } else {
            text.parse::<f64>().ok()
        };
        Ok(Self {
            text: text.to_string(),
            number,
        })
    }

    fn compare(&self, val: &Val) -> Option<Ordering> {
        match val {
            Val::Null => None,
            Val::Boolean(b) => self.text.parse::<bool>().ok().map(|o| b.cmp(&o)),
            Val::String(s) => Some(s.as_str().cmp(self.text.as_str())),
            numeric => numeric.as_f64()?.partial_cmp(&self.number?),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledExpression {
    All,
    Term {
        field: String,
        condition: Condition,
        operands: Vec<Operand>,
    },
    And(Vec<CompiledExpression>),
    Or(Vec<CompiledExpression>),
    Not(Box<CompiledExpression>),
}

impl CompiledExpression {
    pub fn evaluate(&self, row: &dyn Row) -> bool {
        match self {
            CompiledExpression::All => true,
            CompiledExpression::And(children) => children.iter().all(|c| c.evaluate(row)),
            CompiledExpression::Or(children) => children.iter().any(|c| c.evaluate(row)),
            CompiledExpression::Not(child) => !child.evaluate(row),
            CompiledExpression::Term {
                field,
                condition,
                operands,
            } => {
                let Some(val) = row.value(field) else {
                    return false;
                };
                evaluate_term(&val, *condition, operands)
            }
        }
    }
}

fn evaluate_term(val: &Val, condition: Condition, operands: &[Operand]) -> bool {
    let Some(first) = operands.first() else {
        return false;
    };
    let ordering = first.compare(val);
    match condition {
        Condition::Equals => ordering == Some(Ordering::Equal),
        Condition::NotEquals => ordering != Some(Ordering::Equal),
        Condition::GreaterThan => ordering == Some(Ordering::Greater),
        Condition::GreaterThanOrEqualTo => {
            matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
        }
        Condition::LessThan => ordering == Some(Ordering::Less),
        Condition::LessThanOrEqualTo => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Condition::Contains => val.to_string().contains(&first.text),
        Condition::Between => {
            let upper = operands.get(1).and_then(|high| high.compare(val));
            matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
                && matches!(upper, Some(Ordering::Less | Ordering::Equal))
        }
    }
}

impl Predicate for CompiledExpression {
    fn matches(&self, row: &dyn Row) -> bool {
        self.evaluate(row)
    }
}

/// Factory for the built-in expression language
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionPredicateFactory;

impl PredicateFactory for ExpressionPredicateFactory {
    fn create(
        &self,
        criteria: &Expression,
        settings: &DateTimeSettings,
    ) -> StoreResult<Box<dyn Predicate>> {
        Ok(Box::new(criteria.compile(settings)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapRow(HashMap<&'static str, Val>);

    impl Row for MapRow {
        fn value(&self, field: &str) -> Option<Val> {
            self.0.get(field).cloned()
        }
    }

    fn row() -> MapRow {
        MapRow(HashMap::from([
            ("key", Val::string("web-01")),
            ("value", Val::Int(42)),
            ("effectiveTime", Val::Long(86_400_000)),
            ("flag", Val::Boolean(true)),
        ]))
    }

    fn matches(expression: Expression) -> bool {
        expression
            .compile(&DateTimeSettings::default())
            .unwrap()
            .evaluate(&row())
    }

    #[test]
    fn test_terms() {
        assert!(matches(Expression::term("key", Condition::Equals, "web-01")));
        assert!(matches(Expression::term("key", Condition::Contains, "web")));
        assert!(matches(Expression::term("value", Condition::GreaterThan, "41.5")));
        assert!(matches(Expression::term("value", Condition::Between, "40, 42")));
        assert!(!matches(Expression::term("value", Condition::LessThan, "42")));
        assert!(matches(Expression::term("flag", Condition::Equals, "true")));
        assert!(!matches(Expression::term("missing", Condition::NotEquals, "x")));
    }

    #[test]
    fn test_time_terms_accept_dates() {
        assert!(matches(Expression::term(
            "effectiveTime",
            Condition::Equals,
            "1970-01-02T00:00:00Z"
        )));
        assert!(matches(Expression::term(
            "effectiveTime",
            Condition::GreaterThanOrEqualTo,
            "1970-01-01"
        )));
    }

    #[test]
    fn test_boolean_operators() {
        let web = Expression::term("key", Condition::Contains, "web");
        let big = Expression::term("value", Condition::GreaterThan, "100");
        assert!(!matches(Expression::And {
            children: vec![web.clone(), big.clone()]
        }));
        assert!(matches(Expression::Or {
            children: vec![web, big.clone()]
        }));
        assert!(matches(Expression::Not { child: Box::new(big) }));
        assert!(matches(Expression::All));
    }

    #[test]
    fn test_json_form() {
        let json = r#"{"op": "and", "children": [
            {"op": "term", "field": "key", "condition": "EQUALS", "value": "web-01"},
            {"op": "not", "child": {"op": "all"}}
        ]}"#;
        let expression: Expression = serde_json::from_str(json).unwrap();
        assert!(!matches(expression));
    }

    #[test]
    fn test_invalid_literals() {
        let settings = DateTimeSettings::default();
        assert!(Expression::term("value", Condition::Between, "1")
            .compile(&settings)
            .is_err());
        assert!(Expression::term("insertTime", Condition::Equals, "soon")
            .compile(&settings)
            .is_err());
    }
}
