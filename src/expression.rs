//! Bound expressions evaluated against tuples.
//!
//! The planner hands the executors fully bound expressions: column
//! references are positional, so evaluation needs no catalog access. For
//! join predicates a column index addresses the concatenation of the left
//! and right rows.

use crate::access::value::{DataType, Value};
use crate::catalog::Schema;
use anyhow::{Result, bail};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Positional column reference.
    Column(usize),
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    pub fn column(index: usize) -> Self {
        Expression::Column(index)
    }

    pub fn literal(value: Value) -> Self {
        Expression::Literal(value)
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expression, right: Expression) -> Self {
        Self::compare(CompareOp::Equal, left, right)
    }

    pub fn evaluate(&self, row: &[Value]) -> Result<Value> {
        self.evaluate_with(&|index| row.get(index))
    }

    /// Evaluate against the concatenation of two rows without building it.
    pub fn evaluate_join(&self, left: &[Value], right: &[Value]) -> Result<Value> {
        self.evaluate_with(&|index| {
            if index < left.len() {
                left.get(index)
            } else {
                right.get(index - left.len())
            }
        })
    }

    fn evaluate_with<'a>(&self, lookup: &dyn Fn(usize) -> Option<&'a Value>) -> Result<Value> {
        match self {
            Expression::Column(index) => match lookup(*index) {
                Some(value) => Ok(value.clone()),
                None => bail!("Column {} out of range", index),
            },
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Compare { op, left, right } => {
                let left = left.evaluate_with(lookup)?;
                let right = right.evaluate_with(lookup)?;
                if left.is_null() || right.is_null() {
                    return Ok(Value::Null);
                }
                let ordering = left.compare(&right);
                let result = match op {
                    CompareOp::Equal => ordering == Ordering::Equal,
                    CompareOp::NotEqual => ordering != Ordering::Equal,
                    CompareOp::LessThan => ordering == Ordering::Less,
                    CompareOp::LessThanOrEqual => ordering != Ordering::Greater,
                    CompareOp::GreaterThan => ordering == Ordering::Greater,
                    CompareOp::GreaterThanOrEqual => ordering != Ordering::Less,
                };
                Ok(Value::Boolean(result))
            }
            Expression::And(left, right) => {
                match (left.evaluate_with(lookup)?, right.evaluate_with(lookup)?) {
                    (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(a && b)),
                    (Value::Boolean(false), _) | (_, Value::Boolean(false)) => {
                        Ok(Value::Boolean(false))
                    }
                    _ => Ok(Value::Null),
                }
            }
            Expression::Or(left, right) => {
                match (left.evaluate_with(lookup)?, right.evaluate_with(lookup)?) {
                    (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(a || b)),
                    (Value::Boolean(true), _) | (_, Value::Boolean(true)) => {
                        Ok(Value::Boolean(true))
                    }
                    _ => Ok(Value::Null),
                }
            }
            Expression::Not(inner) => match inner.evaluate_with(lookup)? {
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                Value::Null => Ok(Value::Null),
                other => bail!("NOT applied to non-boolean {:?}", other),
            },
        }
    }

    /// True only when the expression evaluates to boolean true; NULL and
    /// false both reject.
    pub fn matches(&self, row: &[Value]) -> Result<bool> {
        Ok(self.evaluate(row)? == Value::Boolean(true))
    }

    pub fn matches_join(&self, left: &[Value], right: &[Value]) -> Result<bool> {
        Ok(self.evaluate_join(left, right)? == Value::Boolean(true))
    }

    /// Static result type against an input schema.
    pub fn result_type(&self, schema: &Schema) -> DataType {
        match self {
            Expression::Column(index) => schema
                .columns
                .get(*index)
                .map(|c| c.data_type)
                .unwrap_or(DataType::Int32),
            Expression::Literal(value) => value.data_type().unwrap_or(DataType::Int32),
            Expression::Compare { .. }
            | Expression::And(_, _)
            | Expression::Or(_, _)
            | Expression::Not(_) => DataType::Boolean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Vec<Value> {
        vec![
            Value::Int32(5),
            Value::String("abc".to_string()),
            Value::Null,
        ]
    }

    #[test]
    fn test_column_and_literal() {
        assert_eq!(
            Expression::column(0).evaluate(&row()).unwrap(),
            Value::Int32(5)
        );
        assert_eq!(
            Expression::literal(Value::Boolean(true)).evaluate(&row()).unwrap(),
            Value::Boolean(true)
        );
        assert!(Expression::column(9).evaluate(&row()).is_err());
    }

    #[test]
    fn test_comparisons() {
        let expr = Expression::compare(
            CompareOp::GreaterThan,
            Expression::column(0),
            Expression::literal(Value::Int32(3)),
        );
        assert!(expr.matches(&row()).unwrap());

        let expr = Expression::equals(
            Expression::column(1),
            Expression::literal(Value::String("abc".to_string())),
        );
        assert!(expr.matches(&row()).unwrap());
    }

    #[test]
    fn test_null_comparisons_reject() {
        let expr = Expression::equals(
            Expression::column(2),
            Expression::literal(Value::Int32(1)),
        );
        assert_eq!(expr.evaluate(&row()).unwrap(), Value::Null);
        assert!(!expr.matches(&row()).unwrap());
    }

    #[test]
    fn test_logic_operators() {
        let t = Expression::literal(Value::Boolean(true));
        let f = Expression::literal(Value::Boolean(false));

        let and = Expression::And(Box::new(t.clone()), Box::new(f.clone()));
        assert!(!and.matches(&row()).unwrap());

        let or = Expression::Or(Box::new(t.clone()), Box::new(f.clone()));
        assert!(or.matches(&row()).unwrap());

        let not = Expression::Not(Box::new(f));
        assert!(not.matches(&row()).unwrap());
    }

    #[test]
    fn test_join_evaluation() {
        let left = vec![Value::Int32(1), Value::Int32(2)];
        let right = vec![Value::Int32(2), Value::Int32(3)];

        // left.1 == right.0, addressed through the concatenated row.
        let expr = Expression::equals(Expression::column(1), Expression::column(2));
        assert!(expr.matches_join(&left, &right).unwrap());

        let expr = Expression::equals(Expression::column(0), Expression::column(3));
        assert!(!expr.matches_join(&left, &right).unwrap());
    }
}
