//! Projection executor.

use crate::access::tuple::Tuple;
use crate::access::value::deserialize_values;
use crate::catalog::{Column, Schema};
use crate::executor::{Executor, synthetic_tuple};
use crate::expression::Expression;
use anyhow::Result;

/// Evaluates one expression per output column against each child tuple.
pub struct ProjectionExecutor {
    expressions: Vec<Expression>,
    child: Box<dyn Executor>,
    output_schema: Schema,
}

impl ProjectionExecutor {
    pub fn new(expressions: Vec<Expression>, child: Box<dyn Executor>) -> Self {
        Self {
            expressions,
            child,
            output_schema: Schema::new(Vec::new()),
        }
    }
}

impl Executor for ProjectionExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()?;
        self.output_schema = Schema::new(
            self.expressions
                .iter()
                .enumerate()
                .map(|(i, expr)| {
                    Column::new(
                        format!("col{}", i),
                        expr.result_type(self.child.output_schema()),
                    )
                })
                .collect(),
        );
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(tuple) = self.child.next()? else {
            return Ok(None);
        };
        let values = deserialize_values(&tuple.data)?;
        let projected = self
            .expressions
            .iter()
            .map(|expr| expr.evaluate(&values))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(synthetic_tuple(&projected)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
