//! Facade wiring the storage, concurrency, and execution subsystems.

use crate::access::value::Value;
use crate::catalog::Catalog;
use crate::concurrency::lock_manager::LockManager;
use crate::executor::ExecutionContext;
use crate::planner::physical::{PlanNode, execute_plan};
use crate::planner::optimizer::optimize;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::buffer::lru_k::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::manager::TransactionManager;
use crate::transaction::state::IsolationLevel;
use crate::transaction::transaction::Transaction;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Tunables consumed at startup.
#[derive(Debug, Clone)]
pub struct Options {
    pub pool_size: usize,
    pub replacer_k: usize,
    pub cycle_detection_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer_k: 2,
            cycle_detection_interval: Duration::from_millis(100),
        }
    }
}

pub struct Database {
    pub buffer_pool: BufferPoolManager,
    pub catalog: Arc<Catalog>,
    pub transaction_manager: Arc<TransactionManager>,
    pub lock_manager: Arc<LockManager>,
}

impl Database {
    pub fn create(path: &Path, options: Options) -> Result<Self> {
        Self::build(DiskManager::create(path)?, options)
    }

    pub fn open(path: &Path, options: Options) -> Result<Self> {
        Self::build(DiskManager::open(path)?, options)
    }

    fn build(disk: DiskManager, options: Options) -> Result<Self> {
        let replacer = Box::new(LruKReplacer::new(options.replacer_k));
        let buffer_pool = BufferPoolManager::new(disk, replacer, options.pool_size);
        let catalog = Arc::new(Catalog::new(buffer_pool.clone()));
        let transaction_manager = Arc::new(TransactionManager::new());
        let lock_manager = Arc::new(LockManager::new(
            Arc::clone(&transaction_manager),
            options.cycle_detection_interval,
        ));
        Ok(Self {
            buffer_pool,
            catalog,
            transaction_manager,
            lock_manager,
        })
    }

    /// Begin a transaction and package the shared resources for an
    /// executor tree.
    pub fn begin(&self, isolation: IsolationLevel) -> ExecutionContext {
        let txn = self.transaction_manager.begin(isolation);
        ExecutionContext::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.lock_manager),
            Arc::clone(&self.transaction_manager),
            txn,
        )
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.transaction_manager.commit(txn, &self.lock_manager)
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.transaction_manager
            .abort(txn, &self.lock_manager, &self.catalog)
    }

    /// Optimize and run a plan tree, collecting the produced rows.
    pub fn execute(&self, plan: PlanNode, ctx: &ExecutionContext) -> Result<Vec<Vec<Value>>> {
        let plan = optimize(plan, &self.catalog)?;
        execute_plan(&plan, ctx.clone())
    }

    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }
}
