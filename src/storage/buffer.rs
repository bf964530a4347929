pub mod lru_k;
pub mod replacer;

use crate::storage::disk::{DiskManager, PAGE_SIZE};
use crate::storage::error::StorageError;
use crate::storage::hash_table::ExtendibleHashTable;
use crate::storage::page::PageId;
use anyhow::Result;
use log::trace;
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.fill(0);
    }
}

/// Bounded cache of fixed-size pages backed by the disk manager.
///
/// Frames are owned by the pool and loaned out through pin-counting guards;
/// a pinned frame is never evicted. The page table is the extendible hash
/// table, the eviction policy is whatever `Replacer` the pool was built
/// with (LRU-K in production).
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    frames: RwLock<Vec<Frame>>,
    state: Mutex<PoolState>,
    disk: Mutex<DiskManager>,
}

struct PoolState {
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, replacer: Box<dyn Replacer>, pool_size: usize) -> Self {
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        Self {
            inner: Arc::new(BufferPoolInner {
                page_table: ExtendibleHashTable::new(),
                frames: RwLock::new(frames),
                state: Mutex::new(PoolState {
                    free_list: (0..pool_size as FrameId).collect(),
                    replacer,
                }),
                disk: Mutex::new(disk),
            }),
        }
    }

    /// Allocate a brand-new page, pinned and writable.
    pub fn new_page(&self) -> Result<(PageId, PageWriteGuard)> {
        let mut state = self.inner.state.lock();
        let frame_id = self.obtain_frame(&mut state)?;

        let page_id = self.inner.disk.lock().allocate_page()?;

        let data = {
            let mut frames = self.inner.frames.write();
            let frame = &mut frames[frame_id as usize];
            frame.reset();
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(true, Ordering::SeqCst);
            frame.data.as_mut() as *mut [u8; PAGE_SIZE]
        };

        self.inner.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);
        trace!("new page {} in frame {}", page_id, frame_id);

        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                data,
            },
        ))
    }

    /// Pin a page for reading, loading it from disk if absent.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard> {
        let mut state = self.inner.state.lock();

        if let Some(frame_id) = self.inner.page_table.find(&page_id) {
            let frames = self.inner.frames.read();
            let frame = &frames[frame_id as usize];
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);

            let data = frame.data.as_ref() as *const [u8; PAGE_SIZE];
            return Ok(PageReadGuard {
                inner: self.inner.clone(),
                frame_id,
                data,
            });
        }

        let frame_id = self.obtain_frame(&mut state)?;

        let data = {
            let mut disk = self.inner.disk.lock();
            let mut frames = self.inner.frames.write();
            let frame = &mut frames[frame_id as usize];

            disk.read_page(page_id, frame.data.as_mut())?;
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(false, Ordering::SeqCst);
            frame.data.as_ref() as *const [u8; PAGE_SIZE]
        };

        self.inner.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(PageReadGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Pin a page for writing; the frame is marked dirty up front.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard> {
        let mut state = self.inner.state.lock();

        if let Some(frame_id) = self.inner.page_table.find(&page_id) {
            let mut frames = self.inner.frames.write();
            let frame = &mut frames[frame_id as usize];
            frame.pin_count.fetch_add(1, Ordering::SeqCst);
            frame.is_dirty.store(true, Ordering::SeqCst);
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);

            let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
            return Ok(PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                data,
            });
        }

        let frame_id = self.obtain_frame(&mut state)?;

        let data = {
            let mut disk = self.inner.disk.lock();
            let mut frames = self.inner.frames.write();
            let frame = &mut frames[frame_id as usize];

            disk.read_page(page_id, frame.data.as_mut())?;
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(true, Ordering::SeqCst);
            frame.data.as_mut() as *mut [u8; PAGE_SIZE]
        };

        self.inner.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Write a resident page back to disk and clear its dirty bit,
    /// regardless of pin state. Returns false for non-resident pages.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _state = self.inner.state.lock();
        let Some(frame_id) = self.inner.page_table.find(&page_id) else {
            return Ok(false);
        };

        let frames = self.inner.frames.read();
        let frame = &frames[frame_id as usize];
        let mut disk = self.inner.disk.lock();
        disk.write_page(page_id, frame.data.as_ref())?;
        frame.is_dirty.store(false, Ordering::SeqCst);
        Ok(true)
    }

    /// Flush every resident page.
    pub fn flush_all(&self) -> Result<()> {
        let _state = self.inner.state.lock();
        let frames = self.inner.frames.read();
        let mut disk = self.inner.disk.lock();

        for frame in frames.iter() {
            if let Some(page_id) = frame.page_id {
                disk.write_page(page_id, frame.data.as_ref())?;
                frame.is_dirty.store(false, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    /// Drop a page from the pool and deallocate it on disk. Dirty content
    /// is discarded. Returns false if the page is still pinned, true if the
    /// page was deleted or was never resident.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.inner.state.lock();
        let Some(frame_id) = self.inner.page_table.find(&page_id) else {
            return Ok(true);
        };

        {
            let frames = self.inner.frames.read();
            if frames[frame_id as usize].pin_count.load(Ordering::SeqCst) > 0 {
                return Ok(false);
            }
        }

        state.replacer.remove(frame_id);
        self.inner.page_table.remove(&page_id);
        {
            let mut frames = self.inner.frames.write();
            frames[frame_id as usize].reset();
        }
        state.free_list.push_back(frame_id);
        self.inner.disk.lock().deallocate_page(page_id);
        trace!("deleted page {} from frame {}", page_id, frame_id);

        Ok(true)
    }

    /// The frame currently holding a page, if resident. Intended for
    /// introspection and tests.
    pub fn frame_of(&self, page_id: PageId) -> Option<FrameId> {
        self.inner.page_table.find(&page_id)
    }

    /// Current pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let frame_id = self.inner.page_table.find(&page_id)?;
        let frames = self.inner.frames.read();
        Some(frames[frame_id as usize].pin_count.load(Ordering::SeqCst))
    }

    /// Get a usable frame from the free list, or evict one. The caller
    /// holds the pool state lock.
    fn obtain_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state
            .replacer
            .evict()
            .ok_or(StorageError::BufferPoolFull)?;

        let (old_page_id, is_dirty) = {
            let frames = self.inner.frames.read();
            let frame = &frames[frame_id as usize];
            (frame.page_id, frame.is_dirty.load(Ordering::SeqCst))
        };

        if let Some(old_page_id) = old_page_id {
            if is_dirty {
                let frames = self.inner.frames.read();
                let mut disk = self.inner.disk.lock();
                disk.write_page(old_page_id, frames[frame_id as usize].data.as_ref())?;
            }
            self.inner.page_table.remove(&old_page_id);
            trace!("evicted page {} from frame {}", old_page_id, frame_id);
        }

        let mut frames = self.inner.frames.write();
        frames[frame_id as usize].reset();

        Ok(frame_id)
    }
}

pub struct PageReadGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *const [u8; PAGE_SIZE],
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        unpin(&self.inner, self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<BufferPoolInner>,
    frame_id: FrameId,
    data: *mut [u8; PAGE_SIZE],
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.data }
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        unpin(&self.inner, self.frame_id);
    }
}

/// Release one pin; the frame becomes evictable when the count hits zero.
fn unpin(inner: &Arc<BufferPoolInner>, frame_id: FrameId) {
    let was_last = {
        let frames = inner.frames.read();
        frames[frame_id as usize]
            .pin_count
            .fetch_sub(1, Ordering::SeqCst)
            == 1
    };

    if was_last {
        // Re-check under the pool lock: another thread may have re-pinned
        // the frame between the decrement and this point.
        let mut state = inner.state.lock();
        let frames = inner.frames.read();
        if frames[frame_id as usize].pin_count.load(Ordering::SeqCst) == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
    }
}

// The raw data pointers are guarded by the pin count: a pinned frame is
// never reset or evicted, and the backing boxes are stable in memory.
unsafe impl Send for PageReadGuard {}
unsafe impl Sync for PageReadGuard {}
unsafe impl Send for PageWriteGuard {}
unsafe impl Sync for PageWriteGuard {}
