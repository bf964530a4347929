//! Per-page read/write latches for the B+ tree.
//!
//! Latches are short-term physical locks on pages, distinct from the lock
//! manager's transactional locks. The registry hands out `Arc`-backed
//! guards so a traversal can carry its latch set across stack frames.

use crate::storage::page::PageId;
use dashmap::DashMap;
use parking_lot::RwLock;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use std::sync::Arc;

pub type SharedLatch = ArcRwLockReadGuard<parking_lot::RawRwLock, ()>;
pub type ExclusiveLatch = ArcRwLockWriteGuard<parking_lot::RawRwLock, ()>;

pub struct LatchManager {
    latches: DashMap<PageId, Arc<RwLock<()>>>,
}

impl LatchManager {
    pub fn new() -> Self {
        Self {
            latches: DashMap::new(),
        }
    }

    fn latch(&self, page_id: PageId) -> Arc<RwLock<()>> {
        self.latches
            .entry(page_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub fn acquire_shared(&self, page_id: PageId) -> SharedLatch {
        self.latch(page_id).read_arc()
    }

    pub fn acquire_exclusive(&self, page_id: PageId) -> ExclusiveLatch {
        self.latch(page_id).write_arc()
    }

    /// Drop the registry entry for a deleted page.
    pub fn forget(&self, page_id: PageId) {
        self.latches.remove(&page_id);
    }
}

impl Default for LatchManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of exclusively latched pages a writer holds while descending.
/// Ancestors are released as soon as a child is proven safe; everything
/// left is released when the operation ends.
pub struct LatchCoupling {
    manager: Arc<LatchManager>,
    held: Vec<(PageId, ExclusiveLatch)>,
}

impl LatchCoupling {
    pub fn new(manager: Arc<LatchManager>) -> Self {
        Self {
            manager,
            held: Vec::new(),
        }
    }

    pub fn acquire(&mut self, page_id: PageId) {
        let latch = self.manager.acquire_exclusive(page_id);
        self.held.push((page_id, latch));
    }

    /// Release every latch acquired before `page_id`.
    pub fn release_ancestors_of(&mut self, page_id: PageId) {
        if let Some(pos) = self.held.iter().position(|(id, _)| *id == page_id) {
            self.held.drain(..pos);
        }
    }

    pub fn release_all(&mut self) {
        self.held.clear();
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

impl Drop for LatchCoupling {
    fn drop(&mut self) {
        self.release_all();
    }
}
