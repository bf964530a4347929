//! Index scan executor.

use crate::access::btree::iterator::BTreeIterator;
use crate::access::heap::TableHeap;
use crate::access::tuple::Tuple;
use crate::catalog::{IndexOid, Schema};
use crate::executor::{ExecutionContext, Executor};
use anyhow::{Result, bail};

/// Walks a B+ tree's leaf chain in key order, fetching each tuple from
/// the owning table heap by record id.
pub struct IndexScanExecutor {
    index_oid: IndexOid,
    context: ExecutionContext,
    iterator: Option<BTreeIterator>,
    heap: Option<TableHeap>,
    output_schema: Schema,
    initialized: bool,
}

impl IndexScanExecutor {
    pub fn new(index_oid: IndexOid, context: ExecutionContext) -> Self {
        Self {
            index_oid,
            context,
            iterator: None,
            heap: None,
            output_schema: Schema::new(Vec::new()),
            initialized: false,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

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

        self.output_schema = table.schema.clone();
        self.heap = Some(table.heap.clone());
        self.iterator = Some(index.btree.iter()?);
        self.initialized = true;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        if !self.initialized {
            bail!("Executor not initialized. Call init() first.");
        }
        let iterator = self.iterator.as_mut().expect("initialized");
        let heap = self.heap.as_ref().expect("initialized");

        for entry in iterator.by_ref() {
            let (_key, tuple_id) = entry?;
            // The heap skips tombstoned rows whose index entries have not
            // been cleaned up yet.
            if let Some(data) = heap.get(tuple_id)? {
                return Ok(Some(Tuple::new(tuple_id, data)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
