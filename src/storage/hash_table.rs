//! Extendible hash table used as the buffer-pool page table.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const DEFAULT_BUCKET_SIZE: usize = 8;

/// A concurrent hash map with an extendible directory.
///
/// All operations run under a single mutex; buckets are shared between
/// directory slots by index, so two slots point at the same bucket iff they
/// agree on the bucket's low `local_depth` bits.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    global_depth: usize,
    bucket_size: usize,
    /// Directory of `2^global_depth` slots, each an index into `buckets`.
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_bucket_size(DEFAULT_BUCKET_SIZE)
    }

    pub fn with_bucket_size(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            inner: Mutex::new(Inner {
                global_depth: 0,
                bucket_size,
                directory: vec![0],
                buckets: vec![Bucket {
                    local_depth: 0,
                    items: Vec::new(),
                }],
            }),
        }
    }

    /// Look up the value stored for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.directory[inner.index_of(key)]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert `key -> value`, replacing any existing value for the key.
    /// Splits buckets (doubling the directory when needed) until the target
    /// bucket has room, so insertion never fails.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let bucket_size = inner.bucket_size;
        loop {
            let slot = inner.index_of(&key);
            let pos = inner.directory[slot];
            let bucket = &mut inner.buckets[pos];

            if let Some(entry) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
                return;
            }
            if bucket.items.len() < bucket_size {
                bucket.items.push((key, value));
                return;
            }
            inner.split(pos);
        }
    }

    /// Remove `key`, returning whether it was present. Buckets are never
    /// merged back.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let pos = inner.directory[inner.index_of(key)];
        let bucket = &mut inner.buckets[pos];
        match bucket.items.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                bucket.items.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.buckets.iter().map(|b| b.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Local depth of the bucket a directory slot points at (tests only).
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.directory[dir_index]].local_depth
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn index_of(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << self.global_depth) - 1)
    }

    /// Split the bucket at `pos`, doubling the directory first when the
    /// bucket is already at global depth.
    fn split(&mut self, pos: usize) {
        if self.buckets[pos].local_depth == self.global_depth {
            // Double the directory; the new half mirrors the old so every
            // existing bucket stays shared between its two images.
            let mirror = self.directory.clone();
            self.directory.extend(mirror);
            self.global_depth += 1;
        }

        let depth = self.buckets[pos].local_depth + 1;
        let discriminator = 1usize << (depth - 1);

        let items = std::mem::take(&mut self.buckets[pos].items);
        let new_pos = self.buckets.len();
        self.buckets.push(Bucket {
            local_depth: depth,
            items: Vec::new(),
        });
        self.buckets[pos].local_depth = depth;

        // Slots that agreed on the old low bits now diverge on the new bit.
        for slot in 0..self.directory.len() {
            if self.directory[slot] == pos && slot & discriminator != 0 {
                self.directory[slot] = new_pos;
            }
        }

        for (key, value) in items {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            if (hasher.finish() as usize) & discriminator != 0 {
                self.buckets[new_pos].items.push((key, value));
            } else {
                self.buckets[pos].items.push((key, value));
            }
        }
    }
}

impl<K, V> Default for ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
