//! The transaction object: lifecycle state, held-lock bookkeeping, and the
//! write journals consulted on rollback.

use crate::access::tuple::TupleId;
use crate::catalog::{IndexOid, TableOid};
use crate::concurrency::lock_manager::LockMode;
use crate::transaction::id::TransactionId;
use crate::transaction::state::{IsolationLevel, TransactionState};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Delete,
}

/// Journal entry for a heap modification, undone in reverse on abort.
#[derive(Debug, Clone)]
pub struct TableWriteRecord {
    pub table_oid: TableOid,
    pub tuple_id: TupleId,
    pub write_type: WriteType,
}

/// Journal entry for an index modification, undone in reverse on abort.
#[derive(Debug, Clone)]
pub struct IndexWriteRecord {
    pub index_oid: IndexOid,
    pub key: Vec<u8>,
    pub tuple_id: TupleId,
    pub write_type: WriteType,
}

/// A transaction. The owning thread is the only mutator except for the
/// deadlock detector, which may flip the state to `Aborted`.
pub struct Transaction {
    id: TransactionId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,

    shared_table_locks: Mutex<HashSet<TableOid>>,
    exclusive_table_locks: Mutex<HashSet<TableOid>>,
    intention_shared_table_locks: Mutex<HashSet<TableOid>>,
    intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,
    shared_intention_exclusive_table_locks: Mutex<HashSet<TableOid>>,

    shared_row_locks: Mutex<HashMap<TableOid, HashSet<TupleId>>>,
    exclusive_row_locks: Mutex<HashMap<TableOid, HashSet<TupleId>>>,

    table_writes: Mutex<Vec<TableWriteRecord>>,
    index_writes: Mutex<Vec<IndexWriteRecord>>,
}

impl Transaction {
    pub fn new(id: TransactionId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            shared_table_locks: Mutex::new(HashSet::new()),
            exclusive_table_locks: Mutex::new(HashSet::new()),
            intention_shared_table_locks: Mutex::new(HashSet::new()),
            intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_intention_exclusive_table_locks: Mutex::new(HashSet::new()),
            shared_row_locks: Mutex::new(HashMap::new()),
            exclusive_row_locks: Mutex::new(HashMap::new()),
            table_writes: Mutex::new(Vec::new()),
            index_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TransactionState::Aborted
    }

    fn table_set(&self, mode: LockMode) -> &Mutex<HashSet<TableOid>> {
        match mode {
            LockMode::Shared => &self.shared_table_locks,
            LockMode::Exclusive => &self.exclusive_table_locks,
            LockMode::IntentionShared => &self.intention_shared_table_locks,
            LockMode::IntentionExclusive => &self.intention_exclusive_table_locks,
            LockMode::SharedIntentionExclusive => {
                &self.shared_intention_exclusive_table_locks
            }
        }
    }

    pub fn hold_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.table_set(mode).lock().insert(oid);
    }

    pub fn release_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.table_set(mode).lock().remove(&oid);
    }

    /// The mode this transaction holds on `oid`, if any. A transaction
    /// holds at most one table lock per table.
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        for mode in [
            LockMode::SharedIntentionExclusive,
            LockMode::IntentionExclusive,
            LockMode::IntentionShared,
            LockMode::Exclusive,
            LockMode::Shared,
        ] {
            if self.table_set(mode).lock().contains(&oid) {
                return Some(mode);
            }
        }
        None
    }

    pub fn held_table_locks(&self) -> Vec<(TableOid, LockMode)> {
        let mut held = Vec::new();
        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::SharedIntentionExclusive,
            LockMode::Exclusive,
        ] {
            for &oid in self.table_set(mode).lock().iter() {
                held.push((oid, mode));
            }
        }
        held
    }

    fn row_set(&self, mode: LockMode) -> &Mutex<HashMap<TableOid, HashSet<TupleId>>> {
        match mode {
            LockMode::Shared => &self.shared_row_locks,
            LockMode::Exclusive => &self.exclusive_row_locks,
            _ => unreachable!("row locks are S or X only"),
        }
    }

    pub fn hold_row_lock(&self, mode: LockMode, oid: TableOid, rid: TupleId) {
        self.row_set(mode).lock().entry(oid).or_default().insert(rid);
    }

    pub fn release_row_lock(&self, mode: LockMode, oid: TableOid, rid: TupleId) {
        if let Some(set) = self.row_set(mode).lock().get_mut(&oid) {
            set.remove(&rid);
        }
    }

    pub fn row_lock_mode(&self, oid: TableOid, rid: TupleId) -> Option<LockMode> {
        let shared = self.shared_row_locks.lock();
        if shared.get(&oid).is_some_and(|s| s.contains(&rid)) {
            return Some(LockMode::Shared);
        }
        drop(shared);
        let exclusive = self.exclusive_row_locks.lock();
        if exclusive.get(&oid).is_some_and(|s| s.contains(&rid)) {
            return Some(LockMode::Exclusive);
        }
        None
    }

    /// True if any row lock on `oid` is still held (a table cannot be
    /// unlocked underneath them).
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let shared = self.shared_row_locks.lock();
        if shared.get(&oid).is_some_and(|s| !s.is_empty()) {
            return true;
        }
        drop(shared);
        let exclusive = self.exclusive_row_locks.lock();
        exclusive.get(&oid).is_some_and(|s| !s.is_empty())
    }

    pub fn held_row_locks(&self) -> Vec<(TableOid, TupleId, LockMode)> {
        let mut held = Vec::new();
        for (&oid, rids) in self.shared_row_locks.lock().iter() {
            for &rid in rids {
                held.push((oid, rid, LockMode::Shared));
            }
        }
        for (&oid, rids) in self.exclusive_row_locks.lock().iter() {
            for &rid in rids {
                held.push((oid, rid, LockMode::Exclusive));
            }
        }
        held
    }

    pub fn record_table_write(&self, record: TableWriteRecord) {
        self.table_writes.lock().push(record);
    }

    pub fn record_index_write(&self, record: IndexWriteRecord) {
        self.index_writes.lock().push(record);
    }

    pub fn take_table_writes(&self) -> Vec<TableWriteRecord> {
        std::mem::take(&mut self.table_writes.lock())
    }

    pub fn take_index_writes(&self) -> Vec<IndexWriteRecord> {
        std::mem::take(&mut self.index_writes.lock())
    }
}
