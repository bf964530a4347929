//! Insert executor.

use crate::access::tuple::Tuple;
use crate::access::value::{DataType, Value, deserialize_values};
use crate::catalog::{Column, Schema, TableOid};
use crate::concurrency::lock_manager::LockMode;
use crate::executor::{ExecutionContext, Executor, check_grant, synthetic_tuple};
use crate::transaction::transaction::{IndexWriteRecord, TableWriteRecord, WriteType};
use anyhow::{Result, bail};

/// Drains its child into the table heap, X-locking every new record id
/// and maintaining every index on the table. Emits a single row with the
/// number of inserted tuples.
pub struct InsertExecutor {
    table_oid: TableOid,
    child: Box<dyn Executor>,
    context: ExecutionContext,
    output_schema: Schema,
    initialized: bool,
    done: bool,
}

impl InsertExecutor {
    pub fn new(
        table_oid: TableOid,
        child: Box<dyn Executor>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_oid,
            child,
            context,
            output_schema: Schema::new(vec![Column::new("inserted", DataType::Int32)]),
            initialized: false,
            done: false,
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.child.init()?;
        check_grant(
            self.context.lock_manager.lock_table(
                &self.context.txn,
                LockMode::IntentionExclusive,
                self.table_oid,
            ),
            &self.context.txn,
        )?;
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
            let values = deserialize_values(&tuple.data)?;
            let tuple_id = table.heap.insert(&tuple.data)?;

            check_grant(
                self.context.lock_manager.lock_row(
                    &self.context.txn,
                    LockMode::Exclusive,
                    self.table_oid,
                    tuple_id,
                ),
                &self.context.txn,
            )?;
            self.context.txn.record_table_write(TableWriteRecord {
                table_oid: self.table_oid,
                tuple_id,
                write_type: WriteType::Insert,
            });

            for index in &indexes {
                let key = index.key_from_row(&values)?;
                index.btree.insert(&key, tuple_id)?;
                self.context.txn.record_index_write(IndexWriteRecord {
                    index_oid: index.oid,
                    key,
                    tuple_id,
                    write_type: WriteType::Insert,
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
