//! Nested-index join executor.

use crate::access::btree::key::encode_key;
use crate::access::tuple::Tuple;
use crate::access::value::{Value, deserialize_values};
use crate::catalog::{IndexInfo, IndexOid, Schema, TableInfo};
use crate::executor::{ExecutionContext, Executor, synthetic_tuple};
use crate::expression::Expression;
use crate::planner::physical::JoinType;
use anyhow::{Result, bail};
use std::sync::Arc;

/// Left-driven join that probes the inner table's B+ tree once per left
/// tuple instead of scanning it.
pub struct NestedIndexJoinExecutor {
    left: Box<dyn Executor>,
    index_oid: IndexOid,
    left_key: Expression,
    join_type: JoinType,
    context: ExecutionContext,
    index: Option<Arc<IndexInfo>>,
    inner_table: Option<Arc<TableInfo>>,
    output_schema: Schema,
    initialized: bool,
}

impl NestedIndexJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        index_oid: IndexOid,
        left_key: Expression,
        join_type: JoinType,
        context: ExecutionContext,
    ) -> Self {
        Self {
            left,
            index_oid,
            left_key,
            join_type,
            context,
            index: None,
            inner_table: None,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }

    fn emit(&self, left: &[Value], right: &[Value]) -> Tuple {
        let mut combined = left.to_vec();
        combined.extend_from_slice(right);
        synthetic_tuple(&combined)
    }
}

impl Executor for NestedIndexJoinExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.left.init()?;

        let index = self
            .context
            .catalog
            .index(self.index_oid)
            .ok_or_else(|| anyhow::anyhow!("Index {} not found", self.index_oid))?;
        let table = self
            .context
            .catalog
            .table(index.table_oid)
            .ok_or_else(|| anyhow::anyhow!("Table {} not found", index.table_oid))?;

        let mut columns = self.left.output_schema().columns.clone();
        columns.extend(table.schema.columns.clone());
        self.output_schema = Schema::new(columns);

        self.index = Some(index);
        self.inner_table = Some(table);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }
        let index = Arc::clone(self.index.as_ref().expect("initialized"));
        let table = Arc::clone(self.inner_table.as_ref().expect("initialized"));

        loop {
            let Some(tuple) = self.left.next()? else {
                return Ok(None);
            };
            let left_values = deserialize_values(&tuple.data)?;
            let key_value = self.left_key.evaluate(&left_values)?;

            // NULL join keys never match.
            let inner_row = if key_value.is_null() {
                None
            } else {
                let key = encode_key(&[key_value], index.key_size)?;
                match index.btree.get(&key)? {
                    Some(rid) => table
                        .heap
                        .get(rid)?
                        .map(|data| deserialize_values(&data))
                        .transpose()?,
                    None => None,
                }
            };

            match inner_row {
                Some(right_values) => {
                    return Ok(Some(self.emit(&left_values, &right_values)));
                }
                None if self.join_type == JoinType::Left => {
                    let padding = vec![Value::Null; table.schema.len()];
                    return Ok(Some(self.emit(&left_values, &padding)));
                }
                None => continue,
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::serialize_values;
    use crate::access::value::DataType;
    use crate::catalog::Column;
    use crate::executor::test_support::{TestDb, collect_rows};
    use crate::executor::values::ValuesExecutor;
    use crate::transaction::state::IsolationLevel;

    fn seed(db: &TestDb) -> Result<IndexOid> {
        let table = db.catalog.create_table(
            "users",
            Schema::new(vec![
                Column::new("id", DataType::Int32),
                Column::new("name", DataType::Varchar),
            ]),
        )?;
        for (id, name) in [(1, "alice"), (2, "bob")] {
            table.heap.insert(&serialize_values(&[
                Value::Int32(id),
                Value::String(name.to_string()),
            ]))?;
        }
        Ok(db
            .catalog
            .create_index("idx_users_id", "users", vec![0], 4, 16, 16)?
            .oid)
    }

    #[test]
    fn test_inner_probe() -> Result<()> {
        let db = TestDb::new()?;
        let index_oid = seed(&db)?;
        let ctx = db.context(IsolationLevel::ReadCommitted);

        let left = ValuesExecutor::new(vec![
            vec![Value::Int32(2)],
            vec![Value::Int32(9)],
            vec![Value::Int32(1)],
        ]);
        let mut executor = NestedIndexJoinExecutor::new(
            Box::new(left),
            index_oid,
            Expression::column(0),
            JoinType::Inner,
            ctx,
        );
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][2], Value::String("bob".into()));
        assert_eq!(rows[1][2], Value::String("alice".into()));

        Ok(())
    }

    #[test]
    fn test_left_probe_pads_misses() -> Result<()> {
        let db = TestDb::new()?;
        let index_oid = seed(&db)?;
        let ctx = db.context(IsolationLevel::ReadCommitted);

        let left = ValuesExecutor::new(vec![vec![Value::Int32(9)], vec![Value::Int32(1)]]);
        let mut executor = NestedIndexJoinExecutor::new(
            Box::new(left),
            index_oid,
            Expression::column(0),
            JoinType::Left,
            ctx,
        );
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], Value::Null);
        assert_eq!(rows[0][2], Value::Null);
        assert_eq!(rows[1][2], Value::String("alice".into()));

        Ok(())
    }
}
