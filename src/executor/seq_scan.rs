//! Sequential scan executor.

use crate::access::heap::TableScanner;
use crate::access::tuple::Tuple;
use crate::access::value::deserialize_values;
use crate::catalog::{Schema, TableOid};
use crate::concurrency::lock_manager::LockMode;
use crate::executor::{ExecutionContext, Executor, check_grant};
use crate::expression::Expression;
use crate::transaction::state::IsolationLevel;
use anyhow::{Result, bail};

/// Scans a table heap in chain order, applying an optional pushed-down
/// predicate.
///
/// Takes an IS lock on the table (skipped under read-uncommitted, which
/// forbids the shared family) and, under repeatable read, an S lock on
/// every emitted row.
pub struct SeqScanExecutor {
    table_oid: TableOid,
    predicate: Option<Expression>,
    context: ExecutionContext,
    scanner: Option<TableScanner>,
    output_schema: Schema,
    initialized: bool,
}

impl SeqScanExecutor {
    pub fn new(
        table_oid: TableOid,
        predicate: Option<Expression>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            table_oid,
            predicate,
            context,
            scanner: None,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let table = self
            .context
            .catalog
            .table(self.table_oid)
            .ok_or_else(|| anyhow::anyhow!("Table {} not found", self.table_oid))?;

        // Any already-held table lock covers the read; requesting IS on
        // top of a stronger mode would be an illegal downgrade.
        if self.context.txn.isolation_level() != IsolationLevel::ReadUncommitted
            && self.context.txn.table_lock_mode(self.table_oid).is_none()
        {
            check_grant(
                self.context.lock_manager.lock_table(
                    &self.context.txn,
                    LockMode::IntentionShared,
                    self.table_oid,
                ),
                &self.context.txn,
            )?;
        }

        self.output_schema = table.schema.clone();
        self.scanner = Some(table.heap.scan());
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }
        let scanner = self.scanner.as_mut().expect("initialized");

        for row in scanner.by_ref() {
            let (tuple_id, data) = row?;
            let values = deserialize_values(&data)?;
            if let Some(predicate) = &self.predicate {
                if !predicate.matches(&values)? {
                    continue;
                }
            }

            if self.context.txn.isolation_level() == IsolationLevel::RepeatableRead
                && self
                    .context
                    .txn
                    .row_lock_mode(self.table_oid, tuple_id)
                    .is_none()
            {
                check_grant(
                    self.context.lock_manager.lock_row(
                        &self.context.txn,
                        LockMode::Shared,
                        self.table_oid,
                        tuple_id,
                    ),
                    &self.context.txn,
                )?;
            }

            return Ok(Some(Tuple::new(tuple_id, data)));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
