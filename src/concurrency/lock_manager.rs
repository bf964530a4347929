//! Hierarchical two-phase lock manager.
//!
//! Tables take any of the five modes; rows take only S or X and require a
//! covering table lock. Each locked object has a FIFO request queue with a
//! condition variable; an in-flight upgrade has absolute priority over new
//! grants. A background thread periodically builds a wait-for graph and
//! aborts the youngest transaction on every cycle it finds.

use crate::access::tuple::TupleId;
use crate::catalog::TableOid;
use crate::transaction::id::TransactionId;
use crate::transaction::manager::TransactionManager;
use crate::transaction::state::{IsolationLevel, TransactionState};
use crate::transaction::transaction::Transaction;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Lock modes, table-level unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The compatibility matrix (granted vs. requested).
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// The upgrade lattice: IS -> {S, X, IX, SIX}; S, IX -> {X, SIX};
    /// SIX -> {X}.
    pub fn can_upgrade_to(self, new_mode: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => matches!(
                new_mode,
                Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
            ),
            Shared | IntentionExclusive => {
                matches!(new_mode, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => matches!(new_mode, Exclusive),
            Exclusive => false,
        }
    }

    pub fn is_intention(self) -> bool {
        matches!(
            self,
            LockMode::IntentionShared
                | LockMode::IntentionExclusive
                | LockMode::SharedIntentionExclusive
        )
    }
}

/// Why a transaction was aborted by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    IncompatibleUpgrade,
    UpgradeConflict,
    AttemptedUnlockButNoLockHeld,
    AttemptedIntentionLockOnRow,
    TableUnlockedBeforeUnlockingRows,
    TableLockNotPresent,
    Deadlock,
}

/// Typed abort signal propagated out of the executors to the transaction
/// manager, which rolls the transaction back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbort {
    pub txn_id: TransactionId,
    pub reason: AbortReason,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TransactionId,
    mode: LockMode,
    granted: bool,
}

struct QueueState {
    queue: VecDeque<LockRequest>,
    /// Transaction currently upgrading on this object; while set, no new
    /// request is granted.
    upgrading: Option<TransactionId>,
}

struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

impl QueueState {
    /// Compatible with every granted request of other transactions.
    fn compatible_with_granted(&self, txn_id: TransactionId, mode: LockMode) -> bool {
        self.queue
            .iter()
            .filter(|r| r.granted && r.txn_id != txn_id)
            .all(|r| r.mode.is_compatible_with(mode))
    }

    /// FIFO fairness: the earliest ungranted request must be ours.
    fn is_earliest_waiter(&self, txn_id: TransactionId) -> bool {
        match self.queue.iter().find(|r| !r.granted) {
            Some(request) => request.txn_id == txn_id,
            None => true,
        }
    }

    fn remove(&mut self, txn_id: TransactionId) -> Option<LockRequest> {
        let pos = self.queue.iter().position(|r| r.txn_id == txn_id)?;
        let removed = self.queue.remove(pos);
        if self.upgrading == Some(txn_id) {
            self.upgrading = None;
        }
        removed
    }
}

struct LockManagerInner {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<TupleId, Arc<LockRequestQueue>>>,
    txn_manager: Arc<TransactionManager>,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
}

pub struct LockManager {
    inner: Arc<LockManagerInner>,
    detector: Option<JoinHandle<()>>,
}

impl LockManager {
    /// Build a lock manager whose background detector wakes every
    /// `cycle_detection_interval`.
    pub fn new(
        txn_manager: Arc<TransactionManager>,
        cycle_detection_interval: Duration,
    ) -> Self {
        let inner = Arc::new(LockManagerInner {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            txn_manager,
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
        });

        let detector_inner = Arc::clone(&inner);
        let detector = std::thread::Builder::new()
            .name("deadlock-detector".to_string())
            .spawn(move || detector_inner.run_cycle_detection(cycle_detection_interval))
            .expect("failed to spawn deadlock detector");

        Self {
            inner,
            detector: Some(detector),
        }
    }

    /// Acquire (or upgrade to) a table lock.
    ///
    /// `Ok(true)` on grant; `Ok(false)` only when the transaction was
    /// aborted by the deadlock detector while blocked; `Err` for rule
    /// violations, which also flip the transaction to `Aborted`.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        trace!("{} lock_table {:?} on table {}", txn.id(), mode, oid);
        if txn.is_aborted() {
            self.remove_table_request(txn, oid);
            return Ok(false);
        }

        self.isolation_check(txn, mode).map_err(|abort| {
            self.remove_table_request(txn, oid);
            abort
        })?;

        if let Some(held_mode) = txn.table_lock_mode(oid) {
            if held_mode == mode {
                return Ok(true);
            }
            return self.upgrade_table_lock(txn, held_mode, mode, oid);
        }

        let queue = self.table_queue(oid);
        let mut state = queue.state.lock().unwrap();
        state.queue.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if txn.is_aborted() {
                state.remove(txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
            if state.is_earliest_waiter(txn.id())
                && state.upgrading.is_none()
                && state.compatible_with_granted(txn.id(), mode)
            {
                let request = state
                    .queue
                    .iter_mut()
                    .find(|r| r.txn_id == txn.id())
                    .expect("own request still queued");
                request.granted = true;
                txn.hold_table_lock(mode, oid);
                queue.cv.notify_all();
                debug!("{} granted table {:?} on {}", txn.id(), mode, oid);
                return Ok(true);
            }
            state = queue.cv.wait(state).unwrap();
        }
    }

    fn upgrade_table_lock(
        &self,
        txn: &Arc<Transaction>,
        held_mode: LockMode,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        if !held_mode.can_upgrade_to(mode) {
            self.remove_table_request(txn, oid);
            return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
        }

        let queue = self.table_queue(oid);
        let mut state = queue.state.lock().unwrap();
        if state.upgrading.is_some_and(|u| u != txn.id()) {
            state.remove(txn.id());
            txn.release_table_lock(held_mode, oid);
            queue.cv.notify_all();
            drop(state);
            return Err(self.abort(txn, AbortReason::UpgradeConflict));
        }

        // Drop the held request; the rewritten one waits for compatibility
        // with everything still granted.
        state.upgrading = Some(txn.id());
        state.queue.retain(|r| r.txn_id != txn.id());
        txn.release_table_lock(held_mode, oid);

        loop {
            if txn.is_aborted() {
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
            if state.compatible_with_granted(txn.id(), mode) {
                state.queue.push_back(LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: true,
                });
                state.upgrading = None;
                txn.hold_table_lock(mode, oid);
                queue.cv.notify_all();
                debug!(
                    "{} upgraded table lock to {:?} on {}",
                    txn.id(),
                    mode,
                    oid
                );
                return Ok(true);
            }
            state = queue.cv.wait(state).unwrap();
        }
    }

    /// Release a table lock, applying the two-phase transition rules.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        trace!("{} unlock_table {}", txn.id(), oid);
        if txn.is_aborted() {
            self.remove_table_request(txn, oid);
            return Ok(false);
        }

        let Some(mode) = txn.table_lock_mode(oid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        self.apply_unlock_transition(txn, mode);

        let queue = self.table_queue(oid);
        let mut state = queue.state.lock().unwrap();
        state.remove(txn.id());
        txn.release_table_lock(mode, oid);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquire (or upgrade to) a row lock. Same return contract as
    /// `lock_table`.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: TupleId,
    ) -> Result<bool, TransactionAbort> {
        trace!("{} lock_row {:?} on {}/{}", txn.id(), mode, oid, rid);
        if txn.is_aborted() {
            self.remove_row_request(txn, rid);
            return Ok(false);
        }

        if mode.is_intention() {
            self.remove_row_request(txn, rid);
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        self.isolation_check(txn, mode).map_err(|abort| {
            self.remove_row_request(txn, rid);
            abort
        })?;

        // The covering table lock must already be there: any mode covers a
        // row S; only X/IX/SIX cover a row X.
        let table_mode = txn.table_lock_mode(oid);
        let covered = match mode {
            LockMode::Shared => table_mode.is_some(),
            LockMode::Exclusive => matches!(
                table_mode,
                Some(LockMode::Exclusive)
                    | Some(LockMode::IntentionExclusive)
                    | Some(LockMode::SharedIntentionExclusive)
            ),
            _ => unreachable!(),
        };
        if !covered {
            self.remove_row_request(txn, rid);
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }

        if let Some(held_mode) = txn.row_lock_mode(oid, rid) {
            if held_mode == mode {
                return Ok(true);
            }
            return self.upgrade_row_lock(txn, held_mode, mode, oid, rid);
        }

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock().unwrap();
        state.queue.push_back(LockRequest {
            txn_id: txn.id(),
            mode,
            granted: false,
        });

        loop {
            if txn.is_aborted() {
                state.remove(txn.id());
                queue.cv.notify_all();
                return Ok(false);
            }
            if state.is_earliest_waiter(txn.id())
                && state.upgrading.is_none()
                && state.compatible_with_granted(txn.id(), mode)
            {
                let request = state
                    .queue
                    .iter_mut()
                    .find(|r| r.txn_id == txn.id())
                    .expect("own request still queued");
                request.granted = true;
                txn.hold_row_lock(mode, oid, rid);
                queue.cv.notify_all();
                debug!("{} granted row {:?} on {}/{}", txn.id(), mode, oid, rid);
                return Ok(true);
            }
            state = queue.cv.wait(state).unwrap();
        }
    }

    fn upgrade_row_lock(
        &self,
        txn: &Arc<Transaction>,
        held_mode: LockMode,
        mode: LockMode,
        oid: TableOid,
        rid: TupleId,
    ) -> Result<bool, TransactionAbort> {
        if !held_mode.can_upgrade_to(mode) {
            self.remove_row_request(txn, rid);
            return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
        }

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock().unwrap();
        if state.upgrading.is_some_and(|u| u != txn.id()) {
            state.remove(txn.id());
            txn.release_row_lock(held_mode, oid, rid);
            queue.cv.notify_all();
            drop(state);
            return Err(self.abort(txn, AbortReason::UpgradeConflict));
        }

        state.upgrading = Some(txn.id());
        state.queue.retain(|r| r.txn_id != txn.id());
        txn.release_row_lock(held_mode, oid, rid);

        loop {
            if txn.is_aborted() {
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
            if state.compatible_with_granted(txn.id(), mode) {
                state.queue.push_back(LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: true,
                });
                state.upgrading = None;
                txn.hold_row_lock(mode, oid, rid);
                queue.cv.notify_all();
                return Ok(true);
            }
            state = queue.cv.wait(state).unwrap();
        }
    }

    /// Release a row lock, applying the two-phase transition rules.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: TupleId,
    ) -> Result<bool, TransactionAbort> {
        trace!("{} unlock_row {}/{}", txn.id(), oid, rid);
        if txn.is_aborted() {
            self.remove_row_request(txn, rid);
            return Ok(false);
        }

        let Some(mode) = txn.row_lock_mode(oid, rid) else {
            return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        self.apply_unlock_transition(txn, mode);

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock().unwrap();
        state.remove(txn.id());
        txn.release_row_lock(mode, oid, rid);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Drop every lock a finished transaction still holds (rows first, so
    /// the table-before-rows rule never trips). No 2PL transitions apply.
    pub fn release_all(&self, txn: &Arc<Transaction>) {
        for (oid, rid, mode) in txn.held_row_locks() {
            let queue = self.row_queue(rid);
            let mut state = queue.state.lock().unwrap();
            state.remove(txn.id());
            txn.release_row_lock(mode, oid, rid);
            queue.cv.notify_all();
        }
        for (oid, mode) in txn.held_table_locks() {
            let queue = self.table_queue(oid);
            let mut state = queue.state.lock().unwrap();
            state.remove(txn.id());
            txn.release_table_lock(mode, oid);
            queue.cv.notify_all();
        }
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        debug!("{} aborted: {:?}", txn.id(), reason);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// Lock acquisition rules per isolation level.
    fn isolation_check(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking
                    && !matches!(mode, LockMode::Shared | LockMode::IntentionShared)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
                if !matches!(mode, LockMode::Exclusive | LockMode::IntentionExclusive) {
                    return Err(
                        self.abort(txn, AbortReason::LockSharedOnReadUncommitted)
                    );
                }
            }
        }
        Ok(())
    }

    /// Growing -> Shrinking transitions on release.
    fn apply_unlock_transition(&self, txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let shrink = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if shrink {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.inner.table_lock_map.lock().unwrap();
        map.entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn row_queue(&self, rid: TupleId) -> Arc<LockRequestQueue> {
        let mut map = self.inner.row_lock_map.lock().unwrap();
        map.entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn remove_table_request(&self, txn: &Arc<Transaction>, oid: TableOid) {
        let queue = self.table_queue(oid);
        let mut state = queue.state.lock().unwrap();
        if let Some(request) = state.remove(txn.id()) {
            if request.granted {
                txn.release_table_lock(request.mode, oid);
            }
            queue.cv.notify_all();
        }
    }

    fn remove_row_request(&self, txn: &Arc<Transaction>, rid: TupleId) {
        let queue = self.row_queue(rid);
        let mut state = queue.state.lock().unwrap();
        if let Some(request) = state.remove(txn.id()) {
            if request.granted {
                for (oid, held_rid, mode) in txn.held_row_locks() {
                    if held_rid == rid {
                        txn.release_row_lock(mode, oid, rid);
                    }
                }
            }
            queue.cv.notify_all();
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        *self.inner.shutdown.lock().unwrap() = true;
        self.inner.shutdown_cv.notify_all();
        if let Some(handle) = self.detector.take() {
            let _ = handle.join();
        }
    }
}

impl LockManagerInner {
    fn run_cycle_detection(&self, interval: Duration) {
        loop {
            {
                let shutdown = self.shutdown.lock().unwrap();
                let (shutdown, _) = self
                    .shutdown_cv
                    .wait_timeout_while(shutdown, interval, |stop| !*stop)
                    .unwrap();
                if *shutdown {
                    return;
                }
            }
            self.detect_once();
        }
    }

    /// One detection sweep: rebuild the wait-for graph, abort the youngest
    /// transaction on each cycle until none remain, then clear the graph.
    fn detect_once(&self) {
        let graph = self.build_wait_for_graph();
        loop {
            let Some(victim) = self.find_cycle_victim(&graph) else {
                break;
            };
            debug!("deadlock detected, aborting {}", victim);
            if let Some(txn) = self.txn_manager.get(victim) {
                txn.set_state(TransactionState::Aborted);
            }
            self.wake_waiter(victim);
        }
    }

    /// Edges from every ungranted waiter to every granted holder, ordered
    /// for deterministic traversal.
    fn build_wait_for_graph(&self) -> BTreeMap<TransactionId, BTreeSet<TransactionId>> {
        let mut graph: BTreeMap<TransactionId, BTreeSet<TransactionId>> = BTreeMap::new();

        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_lock_map.lock().unwrap();
            let rows = self.row_lock_map.lock().unwrap();
            tables.values().chain(rows.values()).cloned().collect()
        };

        for queue in queues {
            let state = queue.state.lock().unwrap();
            let holders: Vec<TransactionId> = state
                .queue
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn_id)
                .collect();
            for waiter in state.queue.iter().filter(|r| !r.granted) {
                for &holder in &holders {
                    graph.entry(waiter.txn_id).or_default().insert(holder);
                }
            }
        }

        graph
    }

    /// Deterministic DFS (transactions ascending, children ascending); the
    /// victim is the highest-id transaction on the discovered cycle.
    fn find_cycle_victim(
        &self,
        graph: &BTreeMap<TransactionId, BTreeSet<TransactionId>>,
    ) -> Option<TransactionId> {
        let mut path: Vec<TransactionId> = Vec::new();

        for &start in graph.keys() {
            if self.is_aborted(start) {
                continue;
            }
            path.clear();
            path.push(start);
            if let Some(victim) = self.dfs(graph, start, &mut path) {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        &self,
        graph: &BTreeMap<TransactionId, BTreeSet<TransactionId>>,
        current: TransactionId,
        path: &mut Vec<TransactionId>,
    ) -> Option<TransactionId> {
        let Some(children) = graph.get(&current) else {
            return None;
        };
        for &child in children {
            if self.is_aborted(child) {
                continue;
            }
            if let Some(pos) = path.iter().position(|&t| t == child) {
                // path[pos..] is the cycle; the youngest member dies.
                return path[pos..].iter().max().copied();
            }
            path.push(child);
            if let Some(victim) = self.dfs(graph, child, path) {
                return Some(victim);
            }
            path.pop();
        }
        None
    }

    fn is_aborted(&self, txn_id: TransactionId) -> bool {
        match self.txn_manager.get(txn_id) {
            Some(txn) => txn.state() == TransactionState::Aborted,
            None => true,
        }
    }

    /// Broadcast the queues the victim is blocked on so it observes the
    /// aborted state and unwinds.
    fn wake_waiter(&self, victim: TransactionId) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let tables = self.table_lock_map.lock().unwrap();
            let rows = self.row_lock_map.lock().unwrap();
            tables.values().chain(rows.values()).cloned().collect()
        };
        for queue in queues {
            let state = queue.state.lock().unwrap();
            if state
                .queue
                .iter()
                .any(|r| r.txn_id == victim && !r.granted)
            {
                queue.cv.notify_all();
            }
        }
    }
}
