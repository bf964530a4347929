//! Sort executor.

use crate::access::tuple::Tuple;
use crate::access::value::{Value, deserialize_values};
use crate::catalog::Schema;
use crate::executor::{Executor, synthetic_tuple};
use crate::expression::Expression;
use crate::planner::physical::SortOrder;
use anyhow::Result;
use std::cmp::Ordering;

/// Materializes the child and stable-sorts by the order-by expressions.
/// Ascending is the default; descending reverses the comparison.
pub struct SortExecutor {
    child: Box<dyn Executor>,
    order_bys: Vec<(Expression, SortOrder)>,
    sorted: Vec<Vec<Value>>,
    cursor: usize,
}

/// Compare two precomputed sort-key rows under the given orders.
pub(crate) fn compare_sort_keys(
    a: &[Value],
    b: &[Value],
    order_bys: &[(Expression, SortOrder)],
) -> Ordering {
    for (index, (_, order)) in order_bys.iter().enumerate() {
        let ordering = a[index].compare(&b[index]);
        let ordering = match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Evaluate the order-by expressions against a row.
pub(crate) fn sort_keys(
    row: &[Value],
    order_bys: &[(Expression, SortOrder)],
) -> Result<Vec<Value>> {
    order_bys
        .iter()
        .map(|(expr, _)| expr.evaluate(row))
        .collect()
}

impl SortExecutor {
    pub fn new(child: Box<dyn Executor>, order_bys: Vec<(Expression, SortOrder)>) -> Self {
        Self {
            child,
            order_bys,
            sorted: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;

        let mut rows: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        while let Some(tuple) = self.child.next()? {
            let values = deserialize_values(&tuple.data)?;
            rows.push((sort_keys(&values, &self.order_bys)?, values));
        }

        rows.sort_by(|(a, _), (b, _)| compare_sort_keys(a, b, &self.order_bys));
        self.sorted = rows.into_iter().map(|(_, row)| row).collect();
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(row) = self.sorted.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(synthetic_tuple(row)))
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
