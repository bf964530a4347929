//! Nested-loop join executor.

use crate::access::tuple::Tuple;
use crate::access::value::{Value, deserialize_values};
use crate::catalog::Schema;
use crate::executor::{Executor, synthetic_tuple};
use crate::expression::Expression;
use crate::planner::physical::JoinType;
use anyhow::Result;

/// Left-driven nested-loop join; the inner (right) side is materialized
/// on init. A left join emits a null-padded row for every left tuple with
/// no match.
pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Expression,
    join_type: JoinType,
    right_rows: Vec<Vec<Value>>,
    current_left: Option<Vec<Value>>,
    left_matched: bool,
    right_pos: usize,
    output_schema: Schema,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: Expression,
        join_type: JoinType,
    ) -> Self {
        Self {
            left,
            right,
            predicate,
            join_type,
            right_rows: Vec::new(),
            current_left: None,
            left_matched: false,
            right_pos: 0,
            output_schema: Schema::new(Vec::new()),
        }
    }

    fn emit(&self, left: &[Value], right: &[Value]) -> Tuple {
        let mut combined = left.to_vec();
        combined.extend_from_slice(right);
        synthetic_tuple(&combined)
    }

    fn null_padding(&self) -> Vec<Value> {
        vec![Value::Null; self.right.output_schema().len()]
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;

        self.right_rows.clear();
        while let Some(tuple) = self.right.next()? {
            self.right_rows.push(deserialize_values(&tuple.data)?);
        }

        let mut columns = self.left.output_schema().columns.clone();
        columns.extend(self.right.output_schema().columns.clone());
        self.output_schema = Schema::new(columns);

        self.current_left = None;
        self.right_pos = 0;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.current_left.is_none() {
                match self.left.next()? {
                    Some(tuple) => {
                        self.current_left = Some(deserialize_values(&tuple.data)?);
                        self.left_matched = false;
                        self.right_pos = 0;
                    }
                    None => return Ok(None),
                }
            }

            let left = self.current_left.as_ref().expect("left row present");
            while self.right_pos < self.right_rows.len() {
                let right = &self.right_rows[self.right_pos];
                self.right_pos += 1;
                if self.predicate.matches_join(left, right)? {
                    self.left_matched = true;
                    return Ok(Some(self.emit(left, right)));
                }
            }

            // Inner side exhausted for this left tuple.
            if self.join_type == JoinType::Left && !self.left_matched {
                let padded = self.emit(left, &self.null_padding());
                self.current_left = None;
                return Ok(Some(padded));
            }
            self.current_left = None;
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::collect_rows;
    use crate::executor::values::ValuesExecutor;

    fn left_side() -> ValuesExecutor {
        ValuesExecutor::new(vec![
            vec![Value::Int32(1), Value::String("a".into())],
            vec![Value::Int32(2), Value::String("b".into())],
            vec![Value::Int32(3), Value::String("c".into())],
        ])
    }

    fn right_side() -> ValuesExecutor {
        ValuesExecutor::new(vec![
            vec![Value::Int32(1), Value::Int32(100)],
            vec![Value::Int32(1), Value::Int32(200)],
            vec![Value::Int32(2), Value::Int32(300)],
        ])
    }

    fn on_id() -> Expression {
        Expression::equals(Expression::column(0), Expression::column(2))
    }

    #[test]
    fn test_inner_join() -> Result<()> {
        let mut executor = NestedLoopJoinExecutor::new(
            Box::new(left_side()),
            Box::new(right_side()),
            on_id(),
            JoinType::Inner,
        );
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][3], Value::Int32(100));
        assert_eq!(rows[1][3], Value::Int32(200));
        assert_eq!(rows[2][3], Value::Int32(300));

        Ok(())
    }

    #[test]
    fn test_left_join_pads_missing_matches() -> Result<()> {
        let mut executor = NestedLoopJoinExecutor::new(
            Box::new(left_side()),
            Box::new(right_side()),
            on_id(),
            JoinType::Left,
        );
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 4);
        // Left tuple 3 has no match and is padded with NULLs.
        assert_eq!(rows[3][0], Value::Int32(3));
        assert_eq!(rows[3][2], Value::Null);
        assert_eq!(rows[3][3], Value::Null);

        Ok(())
    }

    #[test]
    fn test_empty_inner_side() -> Result<()> {
        let mut inner = NestedLoopJoinExecutor::new(
            Box::new(left_side()),
            Box::new(ValuesExecutor::new(Vec::new())),
            on_id(),
            JoinType::Inner,
        );
        inner.init()?;
        assert!(collect_rows(&mut inner)?.is_empty());

        let mut left = NestedLoopJoinExecutor::new(
            Box::new(left_side()),
            Box::new(ValuesExecutor::new(Vec::new())),
            on_id(),
            JoinType::Left,
        );
        left.init()?;
        let rows = collect_rows(&mut left)?;
        assert_eq!(rows.len(), 3);

        Ok(())
    }
}
