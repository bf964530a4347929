use crate::access::tuple::TupleId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_leaf_page::BTreeLeafPage;
use anyhow::Result;

/// Forward iterator over the leaf chain.
///
/// Holds a snapshot of one leaf at a time; advancing past the last entry
/// follows `next_page_id` to the right sibling. Deliberately not `Clone`:
/// a positioned iterator is rebuilt via the tree when a copy is needed.
pub struct BTreeIterator {
    buffer_pool: BufferPoolManager,
    key_size: usize,
    leaf: Option<BTreeLeafPage>,
    index: usize,
}

impl BTreeIterator {
    pub(crate) fn empty(buffer_pool: BufferPoolManager, key_size: usize) -> Self {
        Self {
            buffer_pool,
            key_size,
            leaf: None,
            index: 0,
        }
    }

    pub(crate) fn positioned(
        buffer_pool: BufferPoolManager,
        key_size: usize,
        leaf: BTreeLeafPage,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            key_size,
            leaf: Some(leaf),
            index,
        }
    }

    pub fn is_end(&self) -> bool {
        match &self.leaf {
            None => true,
            Some(leaf) => self.index >= leaf.size() && leaf.next_page_id().is_none(),
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(Vec<u8>, TupleId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf.as_ref()?;

            if self.index < leaf.size() {
                let key = leaf.key_at(self.index).to_vec();
                let rid = TupleId::from_u64(leaf.rid_at(self.index));
                self.index += 1;
                return Some(Ok((key, rid)));
            }

            match leaf.next_page_id() {
                Some(next) => match self.buffer_pool.fetch_page(next) {
                    Ok(guard) => {
                        self.leaf = Some(BTreeLeafPage::from_data(&guard, self.key_size));
                        self.index = 0;
                    }
                    Err(e) => {
                        self.leaf = None;
                        return Some(Err(e));
                    }
                },
                None => {
                    self.leaf = None;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::access::btree::BPlusTree;
    use crate::access::btree::key::encode_key;
    use crate::access::tuple::TupleId;
    use crate::access::value::Value;
    use crate::storage::buffer::BufferPoolManager;
    use crate::storage::buffer::lru_k::LruKReplacer;
    use crate::storage::disk::DiskManager;
    use anyhow::Result;
    use tempfile::tempdir;

    fn create_test_tree() -> Result<BPlusTree> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let disk = DiskManager::create(&file_path)?;
        let pool = BufferPoolManager::new(disk, Box::new(LruKReplacer::new(2)), 32);
        BPlusTree::create("idx", pool, 4, 4, 4)
    }

    fn key(v: u32) -> Vec<u8> {
        encode_key(&[Value::Int32(v as i32)], 4).unwrap()
    }

    #[test]
    fn test_empty_tree_iterates_nothing() -> Result<()> {
        let tree = create_test_tree()?;
        let mut iter = tree.iter()?;
        assert!(iter.is_end());
        assert!(iter.next().is_none());
        Ok(())
    }

    #[test]
    fn test_iterates_across_leaves_in_order() -> Result<()> {
        let tree = create_test_tree()?;
        for v in (1..=20u32).rev() {
            tree.insert(&key(v), TupleId::from_u64(v as u64))?;
        }

        let items: Vec<_> = tree.iter()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(items.len(), 20);
        for (i, (k, rid)) in items.iter().enumerate() {
            assert_eq!(k, &key(i as u32 + 1));
            assert_eq!(rid.to_u64(), i as u64 + 1);
        }

        Ok(())
    }

    #[test]
    fn test_iter_from_positions_at_key() -> Result<()> {
        let tree = create_test_tree()?;
        for v in 1..=10u32 {
            tree.insert(&key(v), TupleId::from_u64(v as u64))?;
        }

        let items: Vec<_> = tree.iter_from(&key(7))?.collect::<Result<Vec<_>>>()?;
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].0, key(7));
        assert_eq!(items[3].0, key(10));

        Ok(())
    }

    #[test]
    fn test_iter_from_missing_key_is_empty() -> Result<()> {
        let tree = create_test_tree()?;
        tree.insert(&key(1), TupleId::from_u64(1))?;

        let mut iter = tree.iter_from(&key(99))?;
        assert!(iter.next().is_none());

        Ok(())
    }
}
