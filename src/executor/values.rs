//! Values executor: a constant row source, canonically insert's child.

use crate::access::tuple::Tuple;
use crate::access::value::{DataType, Value};
use crate::catalog::{Column, Schema};
use crate::executor::{Executor, synthetic_tuple};
use anyhow::Result;

pub struct ValuesExecutor {
    rows: Vec<Vec<Value>>,
    cursor: usize,
    output_schema: Schema,
}

impl ValuesExecutor {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        let output_schema = Schema::new(
            rows.first()
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .map(|(i, v)| {
                            Column::new(
                                format!("col{}", i),
                                v.data_type().unwrap_or(DataType::Int32),
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
        );
        Self {
            rows,
            cursor: 0,
            output_schema,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(synthetic_tuple(row)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
