//! Filter executor.

use crate::access::tuple::Tuple;
use crate::access::value::deserialize_values;
use crate::catalog::Schema;
use crate::executor::Executor;
use crate::expression::Expression;
use anyhow::Result;

/// Passes through child tuples matching the predicate. Stateless; the
/// tuple and its record id are forwarded untouched.
pub struct FilterExecutor {
    predicate: Expression,
    child: Box<dyn Executor>,
}

impl FilterExecutor {
    pub fn new(predicate: Expression, child: Box<dyn Executor>) -> Self {
        Self { predicate, child }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            let values = deserialize_values(&tuple.data)?;
            if self.predicate.matches(&values)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::Value;
    use crate::executor::test_support::collect_rows;
    use crate::executor::values::ValuesExecutor;
    use crate::expression::CompareOp;

    #[test]
    fn test_filters_rows() -> Result<()> {
        let child = ValuesExecutor::new(vec![
            vec![Value::Int32(1)],
            vec![Value::Int32(5)],
            vec![Value::Int32(3)],
        ]);
        let predicate = Expression::compare(
            CompareOp::GreaterThanOrEqual,
            Expression::column(0),
            Expression::literal(Value::Int32(3)),
        );

        let mut executor = FilterExecutor::new(predicate, Box::new(child));
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int32(5));
        assert_eq!(rows[1][0], Value::Int32(3));

        Ok(())
    }

    #[test]
    fn test_null_predicate_rejects() -> Result<()> {
        let child = ValuesExecutor::new(vec![vec![Value::Null], vec![Value::Int32(1)]]);
        let predicate = Expression::equals(
            Expression::column(0),
            Expression::literal(Value::Int32(1)),
        );

        let mut executor = FilterExecutor::new(predicate, Box::new(child));
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 1);

        Ok(())
    }
}
