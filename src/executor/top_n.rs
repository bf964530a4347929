//! Top-N executor.

use crate::access::tuple::Tuple;
use crate::access::value::{Value, deserialize_values};
use crate::catalog::Schema;
use crate::executor::sort::{compare_sort_keys, sort_keys};
use crate::executor::{Executor, synthetic_tuple};
use crate::expression::Expression;
use crate::planner::physical::SortOrder;
use anyhow::Result;
use std::cmp::Ordering;

/// Keeps the N best tuples in an insertion-sorted bounded list: each
/// input is placed by binary search and the worst entry is evicted once
/// the list overflows. Emits best to worst.
pub struct TopNExecutor {
    child: Box<dyn Executor>,
    order_bys: Vec<(Expression, SortOrder)>,
    n: usize,
    best: Vec<(Vec<Value>, Vec<Value>)>,
    cursor: usize,
}

impl TopNExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        order_bys: Vec<(Expression, SortOrder)>,
        n: usize,
    ) -> Self {
        Self {
            child,
            order_bys,
            n,
            best: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.best.clear();

        while let Some(tuple) = self.child.next()? {
            let values = deserialize_values(&tuple.data)?;
            let keys = sort_keys(&values, &self.order_bys)?;

            // Equal keys insert after their peers, keeping arrival order.
            let position = self
                .best
                .partition_point(|(existing, _)| {
                    compare_sort_keys(existing, &keys, &self.order_bys) != Ordering::Greater
                });
            if position >= self.n {
                continue;
            }
            self.best.insert(position, (keys, values));
            if self.best.len() > self.n {
                self.best.pop();
            }
        }

        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some((_, row)) = self.best.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(synthetic_tuple(row)))
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::collect_rows;
    use crate::executor::values::ValuesExecutor;

    fn scores() -> ValuesExecutor {
        ValuesExecutor::new(vec![
            vec![Value::Int32(50)],
            vec![Value::Int32(90)],
            vec![Value::Int32(10)],
            vec![Value::Int32(70)],
            vec![Value::Int32(30)],
        ])
    }

    #[test]
    fn test_top_n_descending() -> Result<()> {
        let mut executor = TopNExecutor::new(
            Box::new(scores()),
            vec![(Expression::column(0), SortOrder::Descending)],
            3,
        );
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(
            rows,
            vec![
                vec![Value::Int32(90)],
                vec![Value::Int32(70)],
                vec![Value::Int32(50)],
            ]
        );

        Ok(())
    }

    #[test]
    fn test_top_n_ascending() -> Result<()> {
        let mut executor = TopNExecutor::new(
            Box::new(scores()),
            vec![(Expression::column(0), SortOrder::Ascending)],
            2,
        );
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows, vec![vec![Value::Int32(10)], vec![Value::Int32(30)]]);

        Ok(())
    }

    #[test]
    fn test_n_larger_than_input() -> Result<()> {
        let mut executor = TopNExecutor::new(
            Box::new(scores()),
            vec![(Expression::column(0), SortOrder::Ascending)],
            100,
        );
        executor.init()?;

        assert_eq!(collect_rows(&mut executor)?.len(), 5);

        Ok(())
    }
}
