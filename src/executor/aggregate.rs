//! Hash aggregation executor.

use crate::access::tuple::Tuple;
use crate::access::value::{DataType, Value, deserialize_values};
use crate::catalog::{Column, Schema};
use crate::executor::{Executor, synthetic_tuple};
use crate::expression::Expression;
use crate::planner::physical::AggregateFunction;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Groups child tuples by the group-by expressions and folds each
/// aggregate. Output rows are the group-by values followed by the
/// aggregate values; with no group-by clause an empty input still yields
/// the initial aggregate row (count 0, everything else NULL).
pub struct HashAggregateExecutor {
    child: Box<dyn Executor>,
    group_bys: Vec<Expression>,
    aggregates: Vec<(AggregateFunction, Expression)>,
    groups: Vec<(Vec<Value>, Vec<Value>)>,
    cursor: usize,
    output_schema: Schema,
    initialized: bool,
}

impl HashAggregateExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_bys: Vec<Expression>,
        aggregates: Vec<(AggregateFunction, Expression)>,
    ) -> Self {
        Self {
            child,
            group_bys,
            aggregates,
            groups: Vec::new(),
            cursor: 0,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }

    fn initial_values(&self) -> Vec<Value> {
        self.aggregates
            .iter()
            .map(|(function, _)| match function {
                AggregateFunction::CountStar => Value::Int32(0),
                _ => Value::Null,
            })
            .collect()
    }

    fn combine(accumulators: &mut [Value], functions: &[(AggregateFunction, Expression)], row: &[Value]) -> Result<()> {
        for (accumulator, (function, expr)) in accumulators.iter_mut().zip(functions) {
            let input = expr.evaluate(row)?;
            match function {
                AggregateFunction::CountStar => {
                    *accumulator = accumulator.add(&Value::Int32(1))?;
                }
                AggregateFunction::Count => {
                    if !input.is_null() {
                        *accumulator = match accumulator {
                            Value::Null => Value::Int32(1),
                            ref other => other.add(&Value::Int32(1))?,
                        };
                    }
                }
                AggregateFunction::Sum => {
                    if !input.is_null() {
                        *accumulator = match accumulator {
                            Value::Null => input,
                            ref other => other.add(&input)?,
                        };
                    }
                }
                AggregateFunction::Min => {
                    if !input.is_null() {
                        let replace = matches!(accumulator, Value::Null)
                            || input.compare(accumulator) == Ordering::Less;
                        if replace {
                            *accumulator = input;
                        }
                    }
                }
                AggregateFunction::Max => {
                    if !input.is_null() {
                        let replace = matches!(accumulator, Value::Null)
                            || input.compare(accumulator) == Ordering::Greater;
                        if replace {
                            *accumulator = input;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl Executor for HashAggregateExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;

        let child_schema = self.child.output_schema().clone();
        let mut columns: Vec<Column> = self
            .group_bys
            .iter()
            .enumerate()
            .map(|(i, expr)| {
                Column::new(format!("group{}", i), expr.result_type(&child_schema))
            })
            .collect();
        for (i, (function, expr)) in self.aggregates.iter().enumerate() {
            let data_type = match function {
                AggregateFunction::CountStar
                | AggregateFunction::Count
                | AggregateFunction::Sum => DataType::Int32,
                AggregateFunction::Min | AggregateFunction::Max => {
                    expr.result_type(&child_schema)
                }
            };
            columns.push(Column::new(format!("agg{}", i), data_type));
        }
        self.output_schema = Schema::new(columns);

        // Build the aggregation hash table, keeping first-seen group order.
        let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
        self.groups.clear();
        let mut saw_input = false;

        while let Some(tuple) = self.child.next()? {
            saw_input = true;
            let row = deserialize_values(&tuple.data)?;
            let key = self
                .group_bys
                .iter()
                .map(|expr| expr.evaluate(&row))
                .collect::<Result<Vec<_>>>()?;

            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    index.insert(key.clone(), self.groups.len());
                    self.groups.push((key, self.initial_values()));
                    self.groups.len() - 1
                }
            };
            Self::combine(&mut self.groups[slot].1, &self.aggregates, &row)?;
        }

        if !saw_input && self.group_bys.is_empty() {
            self.groups.push((Vec::new(), self.initial_values()));
        }

        self.cursor = 0;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        let Some((key, aggregates)) = self.groups.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let mut row = key.clone();
        row.extend(aggregates.iter().cloned());
        Ok(Some(synthetic_tuple(&row)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
