use crate::access::tuple::TupleId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeapPage, PageId};
use anyhow::{Result, bail};

/// Manages a table stored as a chain of heap pages.
#[derive(Clone)]
pub struct TableHeap {
    buffer_pool: BufferPoolManager,
    first_page_id: PageId,
}

impl TableHeap {
    /// Allocate the first page of a new table.
    pub fn create(buffer_pool: BufferPoolManager) -> Result<Self> {
        let (first_page_id, mut guard) = buffer_pool.new_page()?;
        let page = HeapPage::new();
        guard.copy_from_slice(page.data());
        drop(guard);

        Ok(Self {
            buffer_pool,
            first_page_id,
        })
    }

    /// Attach to an existing table chain.
    pub fn open(buffer_pool: BufferPoolManager, first_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            first_page_id,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, extending the chain when every page is full.
    pub fn insert(&self, tuple: &[u8]) -> Result<TupleId> {
        if tuple.len() > HeapPage::max_tuple_size() {
            bail!("Tuple of {} bytes does not fit in a page", tuple.len());
        }

        let mut current_page_id = self.first_page_id;
        loop {
            let mut guard = self.buffer_pool.fetch_page_write(current_page_id)?;
            let mut page = HeapPage::from_data(&guard);

            if let Some(slot_id) = page.insert_tuple(tuple) {
                guard.copy_from_slice(page.data());
                return Ok(TupleId::new(current_page_id, slot_id));
            }

            match page.next_page_id() {
                Some(next) => {
                    drop(guard);
                    current_page_id = next;
                }
                None => {
                    // Chain exhausted: append a fresh page.
                    let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
                    let mut new_page = HeapPage::new();
                    let slot_id = new_page
                        .insert_tuple(tuple)
                        .expect("fresh page must fit the tuple");
                    new_guard.copy_from_slice(new_page.data());
                    drop(new_guard);

                    page.set_next_page_id(Some(new_page_id));
                    guard.copy_from_slice(page.data());
                    return Ok(TupleId::new(new_page_id, slot_id));
                }
            }
        }
    }

    /// Read a live tuple; None for tombstones and unknown slots.
    pub fn get(&self, tuple_id: TupleId) -> Result<Option<Vec<u8>>> {
        let guard = self.buffer_pool.fetch_page(tuple_id.page_id)?;
        let page = HeapPage::from_data(&guard);
        Ok(page.tuple_at(tuple_id.slot_id).map(|t| t.to_vec()))
    }

    /// Tombstone a tuple. Returns false if it was absent or already dead.
    pub fn mark_delete(&self, tuple_id: TupleId) -> Result<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(tuple_id.page_id)?;
        let mut page = HeapPage::from_data(&guard);
        let deleted = page.mark_deleted(tuple_id.slot_id);
        if deleted {
            guard.copy_from_slice(page.data());
        }
        Ok(deleted)
    }

    /// Undo a tombstone (abort rollback path).
    pub fn rollback_delete(&self, tuple_id: TupleId) -> Result<bool> {
        let mut guard = self.buffer_pool.fetch_page_write(tuple_id.page_id)?;
        let mut page = HeapPage::from_data(&guard);
        let restored = page.clear_deleted(tuple_id.slot_id);
        if restored {
            guard.copy_from_slice(page.data());
        }
        Ok(restored)
    }

    /// Iterate every live tuple in chain order.
    pub fn scan(&self) -> TableScanner {
        TableScanner {
            buffer_pool: self.buffer_pool.clone(),
            current_page_id: Some(self.first_page_id),
            current_slot: 0,
        }
    }
}

/// Forward iterator over a table heap.
pub struct TableScanner {
    buffer_pool: BufferPoolManager,
    current_page_id: Option<PageId>,
    current_slot: u32,
}

impl Iterator for TableScanner {
    type Item = Result<(TupleId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page_id = self.current_page_id?;
            let page = match self.buffer_pool.fetch_page(page_id) {
                Ok(guard) => HeapPage::from_data(&guard),
                Err(e) => {
                    self.current_page_id = None;
                    return Some(Err(e));
                }
            };

            while self.current_slot < page.slot_count() {
                let slot = self.current_slot;
                self.current_slot += 1;
                if let Some(tuple) = page.tuple_at(slot) {
                    return Some(Ok((TupleId::new(page_id, slot), tuple.to_vec())));
                }
            }

            self.current_page_id = page.next_page_id();
            self.current_slot = 0;
        }
    }
}
