//! Minimal catalog: table and index metadata handed to the executors.
//!
//! The engine core treats the catalog as an external collaborator; this
//! one keeps everything in memory and owns the table heaps and B+ trees.

use crate::access::btree::BPlusTree;
use crate::access::btree::key::encode_key;
use crate::access::heap::TableHeap;
use crate::access::value::{DataType, Value};
use crate::storage::buffer::BufferPoolManager;
use anyhow::{Result, bail};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type TableOid = u32;
pub type IndexOid = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: TableHeap,
}

pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_oid: TableOid,
    /// Positions of the key columns within the table schema.
    pub key_attrs: Vec<usize>,
    pub key_size: usize,
    pub btree: BPlusTree,
}

impl IndexInfo {
    /// Project the key columns out of a row and encode them for the tree.
    pub fn key_from_row(&self, row: &[Value]) -> Result<Vec<u8>> {
        let mut key_values = Vec::with_capacity(self.key_attrs.len());
        for &attr in &self.key_attrs {
            match row.get(attr) {
                Some(value) => key_values.push(value.clone()),
                None => bail!("Row has no column {}", attr),
            }
        }
        encode_key(&key_values, self.key_size)
    }
}

struct CatalogInner {
    tables: HashMap<TableOid, Arc<TableInfo>>,
    table_names: HashMap<String, TableOid>,
    indexes: HashMap<IndexOid, Arc<IndexInfo>>,
    index_names: HashMap<String, IndexOid>,
    table_indexes: HashMap<TableOid, Vec<IndexOid>>,
    next_table_oid: TableOid,
    next_index_oid: IndexOid,
}

pub struct Catalog {
    buffer_pool: BufferPoolManager,
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            inner: RwLock::new(CatalogInner {
                tables: HashMap::new(),
                table_names: HashMap::new(),
                indexes: HashMap::new(),
                index_names: HashMap::new(),
                table_indexes: HashMap::new(),
                next_table_oid: 0,
                next_index_oid: 0,
            }),
        }
    }

    pub fn create_table(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<TableInfo>> {
        let name = name.into();
        let mut inner = self.inner.write();
        if inner.table_names.contains_key(&name) {
            bail!("Table '{}' already exists", name);
        }

        let heap = TableHeap::create(self.buffer_pool.clone())?;
        let oid = inner.next_table_oid;
        inner.next_table_oid += 1;

        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema,
            heap,
        });
        inner.tables.insert(oid, Arc::clone(&info));
        inner.table_names.insert(name, oid);
        inner.table_indexes.insert(oid, Vec::new());
        Ok(info)
    }

    pub fn table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.inner.read().tables.get(&oid).cloned()
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let inner = self.inner.read();
        let oid = inner.table_names.get(name)?;
        inner.tables.get(oid).cloned()
    }

    /// Create a B+ tree over `key_attrs` of an existing table and backfill
    /// it from the current heap contents.
    pub fn create_index(
        &self,
        name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
        key_size: usize,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Arc<IndexInfo>> {
        let name = name.into();
        let table = self
            .table_by_name(table_name)
            .ok_or_else(|| anyhow::anyhow!("Table '{}' not found", table_name))?;

        let mut inner = self.inner.write();
        if inner.index_names.contains_key(&name) {
            bail!("Index '{}' already exists", name);
        }

        let btree = BPlusTree::create(
            name.clone(),
            self.buffer_pool.clone(),
            key_size,
            leaf_max_size,
            internal_max_size,
        )?;
        let oid = inner.next_index_oid;
        inner.next_index_oid += 1;

        let info = Arc::new(IndexInfo {
            oid,
            name: name.clone(),
            table_oid: table.oid,
            key_attrs,
            key_size,
            btree,
        });

        // Backfill from the live rows.
        for row in table.heap.scan() {
            let (tuple_id, data) = row?;
            let values = crate::access::value::deserialize_values(&data)?;
            let key = info.key_from_row(&values)?;
            info.btree.insert(&key, tuple_id)?;
        }

        inner.indexes.insert(oid, Arc::clone(&info));
        inner.index_names.insert(name, oid);
        inner
            .table_indexes
            .entry(table.oid)
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn index(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.inner.read().indexes.get(&oid).cloned()
    }

    pub fn index_by_name(&self, name: &str) -> Option<Arc<IndexInfo>> {
        let inner = self.inner.read();
        let oid = inner.index_names.get(name)?;
        inner.indexes.get(oid).cloned()
    }

    pub fn table_indexes(&self, oid: TableOid) -> Vec<Arc<IndexInfo>> {
        let inner = self.inner.read();
        inner
            .table_indexes
            .get(&oid)
            .map(|oids| {
                oids.iter()
                    .filter_map(|i| inner.indexes.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
