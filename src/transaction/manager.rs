//! Transaction lifecycle coordination.
//!
//! Owns the registry of live transactions that the deadlock detector
//! consults, and applies the write journals in reverse on abort.

use crate::catalog::Catalog;
use crate::concurrency::lock_manager::LockManager;
use crate::transaction::id::{TransactionId, TransactionIdGenerator};
use crate::transaction::state::{IsolationLevel, TransactionState};
use crate::transaction::transaction::{Transaction, WriteType};
use anyhow::Result;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct TransactionManager {
    id_generator: TransactionIdGenerator,
    transactions: RwLock<HashMap<TransactionId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            id_generator: TransactionIdGenerator::new(),
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Begin a new transaction in the growing phase.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = self.id_generator.next();
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.transactions.write().insert(id, Arc::clone(&txn));
        debug!("{} begins ({})", id, isolation_level);
        txn
    }

    pub fn get(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.transactions.read().get(&id).cloned()
    }

    /// Commit: the journals are discarded and every lock is released.
    pub fn commit(&self, txn: &Arc<Transaction>, lock_manager: &LockManager) -> Result<()> {
        txn.take_table_writes();
        txn.take_index_writes();
        txn.set_state(TransactionState::Committed);
        lock_manager.release_all(txn);
        info!("{} committed", txn.id());
        Ok(())
    }

    /// Abort: undo the write journals in reverse order, then release every
    /// lock.
    pub fn abort(
        &self,
        txn: &Arc<Transaction>,
        lock_manager: &LockManager,
        catalog: &Catalog,
    ) -> Result<()> {
        for record in txn.take_index_writes().into_iter().rev() {
            if let Some(index) = catalog.index(record.index_oid) {
                match record.write_type {
                    WriteType::Insert => index.btree.remove(&record.key)?,
                    WriteType::Delete => {
                        index.btree.insert(&record.key, record.tuple_id)?;
                    }
                }
            }
        }
        for record in txn.take_table_writes().into_iter().rev() {
            if let Some(table) = catalog.table(record.table_oid) {
                match record.write_type {
                    WriteType::Insert => {
                        table.heap.mark_delete(record.tuple_id)?;
                    }
                    WriteType::Delete => {
                        table.heap.rollback_delete(record.tuple_id)?;
                    }
                }
            }
        }

        txn.set_state(TransactionState::Aborted);
        lock_manager.release_all(txn);
        info!("{} aborted and rolled back", txn.id());
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
