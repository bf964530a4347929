//! Executor layer for query execution.
//!
//! Pull-based (Volcano) iterator model: every operator exposes `init` and
//! `next`, producing tuples one at a time. Leaf operators acquire
//! transactional locks through the lock manager and read pages through
//! the table heap and B+ tree.

use crate::access::tuple::{Tuple, TupleId};
use crate::access::value::{Value, serialize_values};
use crate::catalog::{Catalog, Schema};
use crate::concurrency::lock_manager::{AbortReason, LockManager, TransactionAbort};
use crate::transaction::manager::TransactionManager;
use crate::transaction::transaction::Transaction;
use anyhow::Result;
use std::sync::Arc;

pub mod aggregate;
pub mod delete;
pub mod filter;
pub mod hash_join;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_index_join;
pub mod nested_loop_join;
pub mod projection;
pub mod seq_scan;
pub mod sort;
pub mod top_n;
pub mod values;

pub use aggregate::HashAggregateExecutor;
pub use delete::DeleteExecutor;
pub use filter::FilterExecutor;
pub use hash_join::HashJoinExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use limit::LimitExecutor;
pub use nested_index_join::NestedIndexJoinExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use projection::ProjectionExecutor;
pub use seq_scan::SeqScanExecutor;
pub use sort::SortExecutor;
pub use top_n::TopNExecutor;
pub use values::ValuesExecutor;

/// Trait for all query executors.
pub trait Executor: Send {
    /// Initialize the executor. Must be called before `next()`.
    fn init(&mut self) -> Result<()>;

    /// Produce the next tuple, or None when exhausted.
    fn next(&mut self) -> Result<Option<Tuple>>;

    /// The schema of the produced tuples.
    fn output_schema(&self) -> &Schema;
}

/// Shared resources threaded through an executor tree.
#[derive(Clone)]
pub struct ExecutionContext {
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
}

impl ExecutionContext {
    pub fn new(
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            catalog,
            lock_manager,
            transaction_manager,
            txn,
        }
    }
}

/// Convert a lock-manager grant result into executor control flow: a
/// deadlock-victim wake-up surfaces as a `Deadlock` abort.
pub(crate) fn check_grant(
    result: Result<bool, TransactionAbort>,
    txn: &Arc<Transaction>,
) -> Result<()> {
    match result {
        Ok(true) => Ok(()),
        Ok(false) => Err(TransactionAbort {
            txn_id: txn.id(),
            reason: AbortReason::Deadlock,
        }
        .into()),
        Err(abort) => Err(abort.into()),
    }
}

/// A tuple synthesized by an operator (join, aggregate, count row) with no
/// backing record.
pub(crate) fn synthetic_tuple(values: &[Value]) -> Tuple {
    Tuple::new(TupleId::from_u64(0), serialize_values(values))
}
