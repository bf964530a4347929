//! Delete executor.

use crate::access::tuple::Tuple;
use crate::access::value::{DataType, Value, deserialize_values};
use crate::catalog::{Column, Schema, TableOid};
use crate::concurrency::lock_manager::LockMode;
use crate::executor::{ExecutionContext, Executor, check_grant, synthetic_tuple};
use crate::transaction::transaction::{IndexWriteRecord, TableWriteRecord, WriteType};
use anyhow::{Result, bail};

/// Tombstones every record id produced by its child (typically a scan or
/// filter over the target table), X-locking each row and removing it from
/// every index. Emits a single row with the number of deleted tuples.
pub struct DeleteExecutor {
    table_oid: TableOid,
    child: Box<dyn Executor>,
    context: ExecutionContext,
    output_schema: Schema,
    initialized: bool,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(
        table_oid: TableOid,
        child: Box<dyn Executor>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_oid,
            child,
            context,
            output_schema: Schema::new(vec![Column::new("deleted", DataType::Int32)]),
            initialized: false,
            done: false,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        check_grant(
            self.context.lock_manager.lock_table(
                &self.context.txn,
                LockMode::IntentionExclusive,
                self.table_oid,
            ),
            &self.context.txn,
        )?;
        self.child.init()?;
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let table = self
            .context
            .catalog
            .table(self.table_oid)
            .ok_or_else(|| anyhow::anyhow!("Table {} not found", self.table_oid))?;
        let indexes = self.context.catalog.table_indexes(self.table_oid);

        let mut count = 0;
        while let Some(tuple) = self.child.next()? {
            check_grant(
                self.context.lock_manager.lock_row(
                    &self.context.txn,
                    LockMode::Exclusive,
                    self.table_oid,
                    tuple.tuple_id,
                ),
                &self.context.txn,
            )?;

            if !table.heap.mark_delete(tuple.tuple_id)? {
                continue;
            }
            self.context.txn.record_table_write(TableWriteRecord {
                table_oid: self.table_oid,
                tuple_id: tuple.tuple_id,
                write_type: WriteType::Delete,
            });

            let values = deserialize_values(&tuple.data)?;
            for index in &indexes {
                let key = index.key_from_row(&values)?;
                index.btree.remove(&key)?;
                self.context.txn.record_index_write(IndexWriteRecord {
                    index_oid: index.oid,
                    key,
                    tuple_id: tuple.tuple_id,
                    write_type: WriteType::Delete,
                });
            }
            count += 1;
        }

        Ok(Some(synthetic_tuple(&[Value::Int32(count)])))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::btree::key::encode_key;
    use crate::access::serialize_values;
    use crate::executor::seq_scan::SeqScanExecutor;
    use crate::executor::test_support::{TestDb, collect_rows};
    use crate::expression::{CompareOp, Expression};
    use crate::transaction::state::IsolationLevel;

    fn seed(db: &TestDb) -> Result<TableOid> {
        let table = db.catalog.create_table(
            "users",
            Schema::new(vec![Column::new("id", DataType::Int32)]),
        )?;
        for id in 1..=4 {
            table.heap.insert(&serialize_values(&[Value::Int32(id)]))?;
        }
        Ok(table.oid)
    }

    #[test]
    fn test_delete_with_predicate() -> Result<()> {
        let db = TestDb::new()?;
        let oid = seed(&db)?;
        let ctx = db.context(IsolationLevel::ReadCommitted);

        let scan = SeqScanExecutor::new(
            oid,
            Some(Expression::compare(
                CompareOp::LessThanOrEqual,
                Expression::column(0),
                Expression::literal(Value::Int32(2)),
            )),
            ctx.clone(),
        );
        let mut executor = DeleteExecutor::new(oid, Box::new(scan), ctx.clone());
        executor.init()?;

        let rows = collect_rows(&mut executor)?;
        assert_eq!(rows, vec![vec![Value::Int32(2)]]);

        let table = db.catalog.table(oid).unwrap();
        let remaining: Vec<_> = table.heap.scan().collect::<Result<Vec<_>>>()?;
        assert_eq!(remaining.len(), 2);

        assert_eq!(
            ctx.txn.table_lock_mode(oid),
            Some(LockMode::IntentionExclusive)
        );

        Ok(())
    }

    #[test]
    fn test_delete_removes_index_entries() -> Result<()> {
        let db = TestDb::new()?;
        let oid = seed(&db)?;
        let index = db.catalog.create_index("idx", "users", vec![0], 4, 16, 16)?;
        let ctx = db.context(IsolationLevel::ReadCommitted);

        let scan = SeqScanExecutor::new(oid, None, ctx.clone());
        let mut executor = DeleteExecutor::new(oid, Box::new(scan), ctx);
        executor.init()?;
        let rows = collect_rows(&mut executor)?;
        assert_eq!(rows, vec![vec![Value::Int32(4)]]);

        for id in 1..=4 {
            let key = encode_key(&[Value::Int32(id)], 4)?;
            assert_eq!(index.btree.get(&key)?, None);
        }

        Ok(())
    }
}
