pub mod iterator;
pub mod key;
pub mod latch;

use self::iterator::BTreeIterator;
use self::latch::{LatchCoupling, LatchManager};
use crate::access::tuple::TupleId;
use crate::storage::PAGE_SIZE;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_internal_page::BTreeInternalPage;
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use crate::storage::page::{
    BTREE_INTERNAL_PAGE_TYPE, BTREE_LEAF_PAGE_TYPE, HeaderPage, PageId,
};
use anyhow::{Result, bail, ensure};
use log::trace;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Disk-backed B+ tree mapping fixed-width keys to record ids.
///
/// Unique keys only. The root page id lives in a latched cell and is
/// persisted through the header page under the index name. Writers are
/// serialized by a per-tree mutex above the page-latching protocol;
/// readers crab down with shared latches.
pub struct BPlusTree {
    name: String,
    buffer_pool: BufferPoolManager,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
    root: RwLock<Option<PageId>>,
    write_latch: Mutex<()>,
    latches: Arc<LatchManager>,
}

enum InsertResult {
    Done,
    Duplicate,
    Split(Vec<u8>, PageId),
}

impl BPlusTree {
    /// Create a new index and register it in the header page.
    pub fn create(
        name: impl Into<String>,
        buffer_pool: BufferPoolManager,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            key::is_supported_key_size(key_size),
            "Unsupported key size: {}",
            key_size
        );

        let mut guard = buffer_pool.fetch_page_write(PageId::HEADER)?;
        let mut header = HeaderPage::from_data(&guard);
        if !header.insert_record(&name, None) {
            bail!("Index '{}' already exists", name);
        }
        guard.copy_from_slice(header.data());
        drop(guard);

        Ok(Self {
            name,
            buffer_pool,
            key_size,
            leaf_max_size,
            internal_max_size,
            root: RwLock::new(None),
            write_latch: Mutex::new(()),
            latches: Arc::new(LatchManager::new()),
        })
    }

    /// Open an index previously registered in the header page.
    pub fn open(
        name: impl Into<String>,
        buffer_pool: BufferPoolManager,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        let guard = buffer_pool.fetch_page(PageId::HEADER)?;
        let header = HeaderPage::from_data(&guard);
        let root = match header.get_record(&name) {
            Some(root) => root,
            None => bail!("Index '{}' is not registered", name),
        };
        drop(guard);

        Ok(Self {
            name,
            buffer_pool,
            key_size,
            leaf_max_size,
            internal_max_size,
            root: RwLock::new(root),
            write_latch: Mutex::new(()),
            latches: Arc::new(LatchManager::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_none()
    }

    pub fn root_page_id(&self) -> Option<PageId> {
        *self.root.read()
    }

    /// Point lookup. Readers release the parent latch before taking the
    /// child's.
    pub fn get(&self, key: &[u8]) -> Result<Option<TupleId>> {
        ensure!(key.len() == self.key_size, "Key width mismatch");

        let root_guard = self.root.read();
        let Some(mut current) = *root_guard else {
            return Ok(None);
        };
        let mut latch = self.latches.acquire_shared(current);
        drop(root_guard);

        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            if page_type(&guard) == BTREE_LEAF_PAGE_TYPE {
                let leaf = BTreeLeafPage::from_data(&guard, self.key_size);
                drop(guard);
                let result = leaf.lookup(key).map(TupleId::from_u64);
                drop(latch);
                return Ok(result);
            }

            let internal = BTreeInternalPage::from_data(&guard, self.key_size);
            drop(guard);
            let child = internal.lookup(key);
            drop(latch);
            latch = self.latches.acquire_shared(child);
            current = child;
        }
    }

    /// Insert a unique key. Returns false if the key already exists.
    pub fn insert(&self, key: &[u8], rid: TupleId) -> Result<bool> {
        ensure!(key.len() == self.key_size, "Key width mismatch");
        let _writer = self.write_latch.lock();

        let root_id = *self.root.read();
        let Some(root_id) = root_id else {
            let (page_id, mut guard) = self.buffer_pool.new_page()?;
            let mut leaf = BTreeLeafPage::new(self.key_size, self.leaf_max_size);
            leaf.insert(key, rid.to_u64());
            guard.copy_from_slice(leaf.data());
            drop(guard);
            self.set_root(Some(page_id))?;
            trace!("index {}: started tree at {}", self.name, page_id);
            return Ok(true);
        };

        let mut coupling = LatchCoupling::new(Arc::clone(&self.latches));
        match self.insert_inner(root_id, key, rid, &mut coupling)? {
            InsertResult::Duplicate => Ok(false),
            InsertResult::Done => Ok(true),
            InsertResult::Split(separator, right_id) => {
                let (new_root_id, mut guard) = self.buffer_pool.new_page()?;
                let mut root =
                    BTreeInternalPage::new(self.key_size, self.internal_max_size);
                root.populate_new_root(root_id, &separator, right_id);
                guard.copy_from_slice(root.data());
                drop(guard);

                self.set_parent(root_id, Some(new_root_id))?;
                self.set_parent(right_id, Some(new_root_id))?;
                self.set_root(Some(new_root_id))?;
                trace!("index {}: new root {}", self.name, new_root_id);
                Ok(true)
            }
        }
    }

    fn insert_inner(
        &self,
        page_id: PageId,
        key: &[u8],
        rid: TupleId,
        coupling: &mut LatchCoupling,
    ) -> Result<InsertResult> {
        coupling.acquire(page_id);

        if self.page_type_of(page_id)? == BTREE_LEAF_PAGE_TYPE {
            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let mut leaf = BTreeLeafPage::from_data(&guard, self.key_size);

            // A leaf that stays within max_size after the insert cannot
            // split, so the ancestors are released.
            if leaf.size() < leaf.max_size() {
                coupling.release_ancestors_of(page_id);
            }

            if !leaf.insert(key, rid.to_u64()) {
                return Ok(InsertResult::Duplicate);
            }
            if leaf.size() <= leaf.max_size() {
                guard.copy_from_slice(leaf.data());
                return Ok(InsertResult::Done);
            }

            let (right_id, mut right_guard) = self.buffer_pool.new_page()?;
            let mut right = BTreeLeafPage::new(self.key_size, self.leaf_max_size);
            leaf.split_to(&mut right);
            right.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(Some(right_id));
            right.set_parent_page_id(leaf.parent_page_id());

            let separator = right.key_at(0).to_vec();
            right_guard.copy_from_slice(right.data());
            guard.copy_from_slice(leaf.data());
            Ok(InsertResult::Split(separator, right_id))
        } else {
            let internal = self.load_internal(page_id)?;
            if internal.size() < internal.max_size() {
                coupling.release_ancestors_of(page_id);
            }
            let child = internal.lookup(key);
            drop(internal);

            let (separator, new_child) = match self.insert_inner(child, key, rid, coupling)? {
                InsertResult::Split(separator, new_child) => (separator, new_child),
                other => return Ok(other),
            };

            let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
            let mut internal = BTreeInternalPage::from_data(&guard, self.key_size);
            internal.insert_node_after(child, &separator, new_child);

            if internal.size() <= internal.max_size() {
                guard.copy_from_slice(internal.data());
                drop(guard);
                self.set_parent(new_child, Some(page_id))?;
                return Ok(InsertResult::Done);
            }

            let (right_id, mut right_guard) = self.buffer_pool.new_page()?;
            let mut right =
                BTreeInternalPage::new(self.key_size, self.internal_max_size);
            let promoted = internal.split_to(&mut right);
            right.set_parent_page_id(internal.parent_page_id());

            guard.copy_from_slice(internal.data());
            right_guard.copy_from_slice(right.data());
            drop(guard);
            drop(right_guard);

            // The migrated children (and possibly the freshly split child)
            // hang under new pages now.
            if internal.child_index_of(new_child).is_some() {
                self.set_parent(new_child, Some(page_id))?;
            }
            for i in 0..right.size() {
                self.set_parent(right.child_at(i), Some(right_id))?;
            }

            Ok(InsertResult::Split(promoted, right_id))
        }
    }

    /// Remove a key; a miss is a no-op.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        ensure!(key.len() == self.key_size, "Key width mismatch");
        let _writer = self.write_latch.lock();

        let Some(root_id) = *self.root.read() else {
            return Ok(());
        };

        let mut coupling = LatchCoupling::new(Arc::clone(&self.latches));
        coupling.acquire(root_id);

        let mut current = root_id;
        while self.page_type_of(current)? == BTREE_INTERNAL_PAGE_TYPE {
            let internal = self.load_internal(current)?;
            let child = internal.lookup(key);
            drop(internal);

            coupling.acquire(child);
            if self.delete_safe(child)? {
                coupling.release_ancestors_of(child);
            }
            current = child;
        }

        let mut guard = self.buffer_pool.fetch_page_write(current)?;
        let mut leaf = BTreeLeafPage::from_data(&guard, self.key_size);
        if !leaf.remove(key) {
            return Ok(());
        }
        guard.copy_from_slice(leaf.data());
        drop(guard);

        self.fix_underflow(current, &mut coupling)
    }

    /// Restore the balance invariant for a page that may have underflowed,
    /// recursing into the parent when a merge removed a separator.
    fn fix_underflow(&self, page_id: PageId, coupling: &mut LatchCoupling) -> Result<()> {
        let root_id = (*self.root.read()).expect("tree is not empty");
        let is_leaf = self.page_type_of(page_id)? == BTREE_LEAF_PAGE_TYPE;

        if page_id == root_id {
            if is_leaf {
                let leaf = self.load_leaf(page_id)?;
                if leaf.size() == 0 {
                    self.set_root(None)?;
                    self.buffer_pool.delete_page(page_id)?;
                    self.latches.forget(page_id);
                    trace!("index {}: tree emptied", self.name);
                }
            } else {
                let root = self.load_internal(page_id)?;
                if root.size() == 1 {
                    // Demote: the lone child becomes the new root.
                    let child = root.child_at(0);
                    self.set_parent(child, None)?;
                    self.set_root(Some(child))?;
                    self.buffer_pool.delete_page(page_id)?;
                    self.latches.forget(page_id);
                    trace!("index {}: root demoted to {}", self.name, child);
                }
            }
            return Ok(());
        }

        let (size, min_size, parent_id) = if is_leaf {
            let leaf = self.load_leaf(page_id)?;
            (leaf.size(), leaf.min_size(), leaf.parent_page_id())
        } else {
            let internal = self.load_internal(page_id)?;
            (internal.size(), internal.min_size(), internal.parent_page_id())
        };
        if size >= min_size {
            return Ok(());
        }

        let parent_id = parent_id.expect("non-root page has a parent");
        let mut parent = self.load_internal(parent_id)?;
        let index = parent
            .child_index_of(page_id)
            .expect("page registered in its parent");

        // Prefer the right sibling; fall back to the left one.
        let (left_id, right_id, separator_index) = if index + 1 < parent.size() {
            (page_id, parent.child_at(index + 1), index + 1)
        } else {
            (parent.child_at(index - 1), page_id, index)
        };
        let sibling_id = if left_id == page_id { right_id } else { left_id };
        coupling.acquire(sibling_id);
        let separator = parent.key_at(separator_index).to_vec();

        if is_leaf {
            let mut left = self.load_leaf(left_id)?;
            let mut right = self.load_leaf(right_id)?;

            if left.size() + right.size() <= self.leaf_max_size {
                left.append_from(&right);
                self.store_leaf(left_id, &left)?;
                parent.remove_at(separator_index);
                self.store_internal(parent_id, &parent)?;
                self.buffer_pool.delete_page(right_id)?;
                self.latches.forget(right_id);
                self.fix_underflow(parent_id, coupling)
            } else {
                if page_id == left_id {
                    let (k, rid) = right.take_first();
                    left.push_back(&k, rid);
                    let new_separator = right.key_at(0).to_vec();
                    parent.set_key_at(separator_index, &new_separator);
                } else {
                    let (k, rid) = left.take_last();
                    right.push_front(&k, rid);
                    parent.set_key_at(separator_index, &k);
                }
                self.store_leaf(left_id, &left)?;
                self.store_leaf(right_id, &right)?;
                self.store_internal(parent_id, &parent)
            }
        } else {
            let mut left = self.load_internal(left_id)?;
            let mut right = self.load_internal(right_id)?;

            if left.size() + right.size() <= self.internal_max_size {
                let migrated_from = left.size();
                left.append_from(&right, &separator);
                self.store_internal(left_id, &left)?;
                for i in migrated_from..left.size() {
                    self.set_parent(left.child_at(i), Some(left_id))?;
                }
                parent.remove_at(separator_index);
                self.store_internal(parent_id, &parent)?;
                self.buffer_pool.delete_page(right_id)?;
                self.latches.forget(right_id);
                self.fix_underflow(parent_id, coupling)
            } else {
                if page_id == left_id {
                    let (next_key, child) = right.take_first();
                    left.push_back(&separator, child);
                    self.set_parent(child, Some(left_id))?;
                    parent.set_key_at(separator_index, &next_key);
                } else {
                    let (k, child) = left.take_last();
                    right.push_front(&separator, child);
                    self.set_parent(child, Some(right_id))?;
                    parent.set_key_at(separator_index, &k);
                }
                self.store_internal(left_id, &left)?;
                self.store_internal(right_id, &right)?;
                self.store_internal(parent_id, &parent)
            }
        }
    }

    /// Forward iterator from the leftmost leaf.
    pub fn iter(&self) -> Result<BTreeIterator> {
        let Some(root_id) = *self.root.read() else {
            return Ok(BTreeIterator::empty(
                self.buffer_pool.clone(),
                self.key_size,
            ));
        };

        let mut current = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            if page_type(&guard) == BTREE_LEAF_PAGE_TYPE {
                let leaf = BTreeLeafPage::from_data(&guard, self.key_size);
                drop(guard);
                return Ok(BTreeIterator::positioned(
                    self.buffer_pool.clone(),
                    self.key_size,
                    leaf,
                    0,
                ));
            }
            let internal = BTreeInternalPage::from_data(&guard, self.key_size);
            drop(guard);
            current = internal.child_at(0);
        }
    }

    /// Forward iterator positioned at `key`; empty if the key is absent.
    pub fn iter_from(&self, key: &[u8]) -> Result<BTreeIterator> {
        ensure!(key.len() == self.key_size, "Key width mismatch");
        let Some(root_id) = *self.root.read() else {
            return Ok(BTreeIterator::empty(
                self.buffer_pool.clone(),
                self.key_size,
            ));
        };

        let mut current = root_id;
        loop {
            let guard = self.buffer_pool.fetch_page(current)?;
            if page_type(&guard) == BTREE_LEAF_PAGE_TYPE {
                let leaf = BTreeLeafPage::from_data(&guard, self.key_size);
                drop(guard);
                return Ok(match leaf.key_index(key) {
                    Ok(index) => BTreeIterator::positioned(
                        self.buffer_pool.clone(),
                        self.key_size,
                        leaf,
                        index,
                    ),
                    Err(_) => {
                        BTreeIterator::empty(self.buffer_pool.clone(), self.key_size)
                    }
                });
            }
            let internal = BTreeInternalPage::from_data(&guard, self.key_size);
            drop(guard);
            current = internal.lookup(key);
        }
    }

    fn set_root(&self, root: Option<PageId>) -> Result<()> {
        *self.root.write() = root;
        let mut guard = self.buffer_pool.fetch_page_write(PageId::HEADER)?;
        let mut header = HeaderPage::from_data(&guard);
        header.update_record(&self.name, root);
        guard.copy_from_slice(header.data());
        Ok(())
    }

    fn set_parent(&self, page_id: PageId, parent: Option<PageId>) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        guard[12..16].copy_from_slice(&PageId::encode(parent).to_le_bytes());
        Ok(())
    }

    fn page_type_of(&self, page_id: PageId) -> Result<u32> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        Ok(page_type(&guard))
    }

    fn delete_safe(&self, page_id: PageId) -> Result<bool> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        if page_type(&guard) == BTREE_LEAF_PAGE_TYPE {
            let leaf = BTreeLeafPage::from_data(&guard, self.key_size);
            Ok(leaf.size() > leaf.min_size())
        } else {
            let internal = BTreeInternalPage::from_data(&guard, self.key_size);
            Ok(internal.size() > internal.min_size())
        }
    }

    fn load_leaf(&self, page_id: PageId) -> Result<BTreeLeafPage> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        Ok(BTreeLeafPage::from_data(&guard, self.key_size))
    }

    fn load_internal(&self, page_id: PageId) -> Result<BTreeInternalPage> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        Ok(BTreeInternalPage::from_data(&guard, self.key_size))
    }

    fn store_leaf(&self, page_id: PageId, page: &BTreeLeafPage) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        guard.copy_from_slice(page.data());
        Ok(())
    }

    fn store_internal(&self, page_id: PageId, page: &BTreeInternalPage) -> Result<()> {
        let mut guard = self.buffer_pool.fetch_page_write(page_id)?;
        guard.copy_from_slice(page.data());
        Ok(())
    }
}

fn page_type(data: &[u8; PAGE_SIZE]) -> u32 {
    u32::from_le_bytes(data[0..4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::lru_k::LruKReplacer;
    use crate::storage::disk::DiskManager;
    use tempfile::tempdir;

    fn create_test_pool(pool_size: usize) -> Result<BufferPoolManager> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let disk = DiskManager::create(&file_path)?;
        Ok(BufferPoolManager::new(
            disk,
            Box::new(LruKReplacer::new(2)),
            pool_size,
        ))
    }

    fn key(v: u32) -> Vec<u8> {
        key::encode_key(&[crate::access::value::Value::Int32(v as i32)], 4).unwrap()
    }

    fn rid(v: u64) -> TupleId {
        TupleId::from_u64(v)
    }

    #[test]
    fn test_insert_and_get() -> Result<()> {
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        assert!(tree.is_empty());
        assert!(tree.insert(&key(1), rid(10))?);
        assert!(tree.insert(&key(2), rid(20))?);

        assert_eq!(tree.get(&key(1))?, Some(rid(10)));
        assert_eq!(tree.get(&key(2))?, Some(rid(20)));
        assert_eq!(tree.get(&key(3))?, None);

        Ok(())
    }

    #[test]
    fn test_duplicate_insert_rejected() -> Result<()> {
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        assert!(tree.insert(&key(1), rid(10))?);
        assert!(!tree.insert(&key(1), rid(99))?);
        assert_eq!(tree.get(&key(1))?, Some(rid(10)));

        Ok(())
    }

    #[test]
    fn test_leaf_split_builds_expected_shape() -> Result<()> {
        // leaf_max_size = 4; inserting 1..=5 must leave an internal root
        // with separator 3 over leaves {1,2} and {3,4,5}.
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        for v in 1..=5u32 {
            assert!(tree.insert(&key(v), rid(v as u64))?);
        }

        let root_id = tree.root_page_id().unwrap();
        assert_eq!(tree.page_type_of(root_id)?, BTREE_INTERNAL_PAGE_TYPE);
        let root = tree.load_internal(root_id)?;
        assert_eq!(root.size(), 2);
        assert_eq!(root.key_at(1), key(3).as_slice());

        let left = tree.load_leaf(root.child_at(0))?;
        let right = tree.load_leaf(root.child_at(1))?;
        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 3);
        assert_eq!(left.key_at(0), key(1).as_slice());
        assert_eq!(left.key_at(1), key(2).as_slice());
        assert_eq!(right.key_at(0), key(3).as_slice());
        assert_eq!(right.key_at(2), key(5).as_slice());

        // Leaf chain: left -> right -> end.
        assert_eq!(left.next_page_id(), Some(root.child_at(1)));
        assert_eq!(right.next_page_id(), None);

        Ok(())
    }

    #[test]
    fn test_merge_on_delete_demotes_root() -> Result<()> {
        // Continue the split scenario: removing 1 then 2 collapses the tree
        // back to a single leaf root of height 1.
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        for v in 1..=5u32 {
            tree.insert(&key(v), rid(v as u64))?;
        }
        tree.remove(&key(1))?;
        tree.remove(&key(2))?;

        let root_id = tree.root_page_id().unwrap();
        assert_eq!(tree.page_type_of(root_id)?, BTREE_LEAF_PAGE_TYPE);
        let root = tree.load_leaf(root_id)?;
        assert_eq!(root.size(), 3);
        assert_eq!(root.key_at(0), key(3).as_slice());

        for v in 3..=5u32 {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64)));
        }

        Ok(())
    }

    #[test]
    fn test_odd_max_size_split_keeps_leaves_balanced() -> Result<()> {
        // leaf_max_size = 5: the sixth insert overflows the root leaf and
        // the split leaves 3/3, both at ceil(5/2) = 3.
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 5, 5)?;

        for v in 1..=6u32 {
            assert!(tree.insert(&key(v), rid(v as u64))?);
        }

        let root_id = tree.root_page_id().unwrap();
        assert_eq!(tree.page_type_of(root_id)?, BTREE_INTERNAL_PAGE_TYPE);
        let root = tree.load_internal(root_id)?;
        assert_eq!(root.size(), 2);

        let left = tree.load_leaf(root.child_at(0))?;
        let right = tree.load_leaf(root.child_at(1))?;
        assert_eq!(left.size(), 3);
        assert_eq!(right.size(), 3);
        assert!(left.size() >= left.min_size());
        assert!(right.size() >= right.min_size());
        assert_eq!(root.key_at(1), right.key_at(0));

        for v in 1..=6u32 {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64)));
        }

        Ok(())
    }

    #[test]
    fn test_odd_max_size_merge_on_underflow() -> Result<()> {
        // Continue from the 3/3 split: one removal drops the left leaf to
        // 2 < ceil(5/2), which must trigger the merge and root demotion.
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 5, 5)?;

        for v in 1..=6u32 {
            tree.insert(&key(v), rid(v as u64))?;
        }
        tree.remove(&key(1))?;

        let root_id = tree.root_page_id().unwrap();
        assert_eq!(tree.page_type_of(root_id)?, BTREE_LEAF_PAGE_TYPE);
        let root = tree.load_leaf(root_id)?;
        assert_eq!(root.size(), 5);
        for v in 2..=6u32 {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64)));
        }

        Ok(())
    }

    #[test]
    fn test_odd_max_size_random_workload() -> Result<()> {
        let pool = create_test_pool(64)?;
        let tree = BPlusTree::create("idx", pool, 4, 5, 5)?;

        for v in 1..=100u32 {
            assert!(tree.insert(&key(v), rid(v as u64))?);
        }
        for v in (1..=100u32).step_by(2) {
            tree.remove(&key(v))?;
        }
        for v in 1..=100u32 {
            let expected = if v % 2 == 0 { Some(rid(v as u64)) } else { None };
            assert_eq!(tree.get(&key(v))?, expected, "key {}", v);
        }

        let emitted: Vec<_> = tree.iter()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(emitted.len(), 50);

        Ok(())
    }

    #[test]
    fn test_insert_then_delete_empties_tree() -> Result<()> {
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        tree.insert(&key(7), rid(70))?;
        tree.remove(&key(7))?;

        assert!(tree.is_empty());
        assert_eq!(tree.get(&key(7))?, None);

        Ok(())
    }

    #[test]
    fn test_remove_missing_key_is_noop() -> Result<()> {
        let pool = create_test_pool(16)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        tree.insert(&key(1), rid(1))?;
        tree.remove(&key(42))?;
        assert_eq!(tree.get(&key(1))?, Some(rid(1)));

        Ok(())
    }

    #[test]
    fn test_multi_level_growth_and_shrink() -> Result<()> {
        let pool = create_test_pool(64)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        for v in 1..=64u32 {
            assert!(tree.insert(&key(v), rid(v as u64))?, "insert {}", v);
        }
        for v in 1..=64u32 {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64)), "get {}", v);
        }

        for v in 1..=64u32 {
            tree.remove(&key(v))?;
            assert_eq!(tree.get(&key(v))?, None, "removed {}", v);
        }
        assert!(tree.is_empty());

        Ok(())
    }

    #[test]
    fn test_random_workload() -> Result<()> {
        use rand::seq::SliceRandom;

        let pool = create_test_pool(64)?;
        let tree = BPlusTree::create("idx", pool, 4, 4, 4)?;

        let mut rng = rand::thread_rng();
        let mut keys: Vec<u32> = (0..200).collect();
        keys.shuffle(&mut rng);

        for &v in &keys {
            assert!(tree.insert(&key(v), rid(v as u64 + 1))?);
        }

        // The iterator must emit every key exactly once, in order.
        let emitted: Vec<Vec<u8>> = tree
            .iter()?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(emitted.len(), 200);
        let mut sorted = emitted.clone();
        sorted.sort();
        assert_eq!(emitted, sorted);

        keys.shuffle(&mut rng);
        for &v in &keys[..100] {
            tree.remove(&key(v))?;
        }
        for &v in &keys[..100] {
            assert_eq!(tree.get(&key(v))?, None);
        }
        for &v in &keys[100..] {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64 + 1)));
        }

        Ok(())
    }

    #[test]
    fn test_root_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");

        {
            let disk = DiskManager::create(&file_path)?;
            let pool = BufferPoolManager::new(disk, Box::new(LruKReplacer::new(2)), 16);
            let tree = BPlusTree::create("idx", pool.clone(), 4, 4, 4)?;
            for v in 1..=10u32 {
                tree.insert(&key(v), rid(v as u64))?;
            }
            pool.flush_all()?;
        }

        let disk = DiskManager::open(&file_path)?;
        let pool = BufferPoolManager::new(disk, Box::new(LruKReplacer::new(2)), 16);
        let tree = BPlusTree::open("idx", pool, 4, 4, 4)?;
        for v in 1..=10u32 {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64)));
        }

        Ok(())
    }

    #[test]
    fn test_concurrent_readers_during_writes() -> Result<()> {
        use std::sync::Arc;
        use std::thread;

        let pool = create_test_pool(64)?;
        let tree = Arc::new(BPlusTree::create("idx", pool, 4, 16, 16)?);

        for v in 0..100u32 {
            tree.insert(&key(v), rid(v as u64 + 1))?;
        }

        let writer = {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for v in 100..200u32 {
                    tree.insert(&key(v), rid(v as u64 + 1)).unwrap();
                }
            })
        };
        let mut readers = Vec::new();
        for _ in 0..3 {
            let tree = Arc::clone(&tree);
            readers.push(thread::spawn(move || {
                for v in 0..100u32 {
                    assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v as u64 + 1)));
                }
            }));
        }

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        for v in 0..200u32 {
            assert_eq!(tree.get(&key(v))?, Some(rid(v as u64 + 1)));
        }

        Ok(())
    }
}
