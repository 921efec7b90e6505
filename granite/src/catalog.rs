//! In-memory catalog: tables, their heaps, and hash indexes over single
//! columns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use stratum::hash_index::{default_hash, DiskHashIndex};
use stratum::hash_page::{
    bucket_capacity, EntryCodec, OrdComparator, HASH_DIRECTORY_MAX_DEPTH, HASH_HEADER_MAX_DEPTH,
};
use stratum::heap::TableHeap;
use stratum::{BufferPoolManager, Rid};

use crate::errors::ExecutionError;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

pub type TableOid = u32;
pub type IndexOid = u32;

/// Fixed eight-byte index key derived from a single column value. Integers
/// are order-preserving; varchars are truncated or zero-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexKey(pub [u8; 8]);

impl IndexKey {
    pub fn from_value(value: &Value) -> IndexKey {
        let mut buf = [0u8; 8];
        match value {
            Value::Null => {}
            Value::Boolean(v) => buf[7] = *v as u8,
            // Flip the sign bit so the byte order matches the numeric order.
            Value::Integer(v) => buf = (*v as u64 ^ (1 << 63)).to_be_bytes(),
            Value::Varchar(v) => {
                let n = v.len().min(8);
                buf[..n].copy_from_slice(&v.as_bytes()[..n]);
            }
        }
        IndexKey(buf)
    }
}

impl EntryCodec for IndexKey {
    const ENCODED_LEN: usize = 8;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.0);
    }

    fn decode_from(buf: &[u8]) -> Self {
        IndexKey(buf[..8].try_into().expect("8-byte index key"))
    }
}

pub type TableIndex = DiskHashIndex<IndexKey, Rid, OrdComparator>;

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    /// Column the index covers; all indexes are single-column.
    pub key_attr: usize,
    pub index: Arc<TableIndex>,
}

impl IndexInfo {
    pub fn key_for(&self, tuple: &Tuple) -> IndexKey {
        IndexKey::from_value(tuple.value(self.key_attr))
    }
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
    tables_by_oid: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    indexes: RwLock<HashMap<String, Arc<IndexInfo>>>,
    indexes_by_oid: RwLock<HashMap<IndexOid, Arc<IndexInfo>>>,
    next_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Catalog {
            bpm,
            tables: RwLock::new(HashMap::new()),
            tables_by_oid: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            indexes_by_oid: RwLock::new(HashMap::new()),
            next_oid: AtomicU32::new(1),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, ExecutionError> {
        let name = name.into();
        if self.tables.read().contains_key(&name) {
            return Err(ExecutionError::Internal(format!(
                "table {name} already exists"
            )));
        }
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let heap = Arc::new(TableHeap::create(self.bpm.clone())?);
        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema,
            heap,
        });
        self.tables.write().insert(name, info.clone());
        self.tables_by_oid.write().insert(oid, info.clone());
        crate::granite_debug_log!("[Catalog::create_table] {} -> oid {oid}", info.name);
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>, ExecutionError> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Result<Arc<TableInfo>, ExecutionError> {
        self.tables_by_oid
            .read()
            .get(&oid)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(format!("oid {oid}")))
    }

    /// Resolver handed to the transaction manager's commit.
    pub fn heap_of(&self, oid: TableOid) -> Option<Arc<TableHeap>> {
        self.tables_by_oid
            .read()
            .get(&oid)
            .map(|info| info.heap.clone())
    }

    /// Creates a single-column hash index and backfills it from the table's
    /// live rows. Stale entries left by later version churn are filtered by
    /// the index scan's visibility check, not here.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_attr: usize,
    ) -> Result<Arc<IndexInfo>, ExecutionError> {
        let index_name = index_name.into();
        if self.indexes.read().contains_key(&index_name) {
            return Err(ExecutionError::Internal(format!(
                "index {index_name} already exists"
            )));
        }
        let table = self.table(table_name)?;
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);

        let entry_len = IndexKey::ENCODED_LEN + <Rid as EntryCodec>::ENCODED_LEN;
        let index = Arc::new(TableIndex::new(
            self.bpm.clone(),
            OrdComparator,
            default_hash::<IndexKey>,
            HASH_HEADER_MAX_DEPTH,
            HASH_DIRECTORY_MAX_DEPTH,
            bucket_capacity(entry_len),
        )?);

        let info = Arc::new(IndexInfo {
            oid,
            name: index_name.clone(),
            table_name: table_name.to_string(),
            key_attr,
            index,
        });

        let mut iter = table.heap.make_iterator()?;
        while let Some((rid, meta, payload)) = iter.next()? {
            if meta.is_deleted {
                continue;
            }
            let tuple = Tuple::decode(&table.schema, &payload)?;
            info.index.insert(&info.key_for(&tuple), &rid)?;
        }

        self.indexes.write().insert(index_name, info.clone());
        self.indexes_by_oid.write().insert(oid, info.clone());
        crate::granite_debug_log!(
            "[Catalog::create_index] {} on {table_name}.#{key_attr} -> oid {oid}",
            info.name
        );
        Ok(info)
    }

    pub fn index_by_oid(&self, oid: IndexOid) -> Result<Arc<IndexInfo>, ExecutionError> {
        self.indexes_by_oid
            .read()
            .get(&oid)
            .cloned()
            .ok_or_else(|| ExecutionError::IndexNotFound(format!("oid {oid}")))
    }

    /// All indexes declared over a table.
    pub fn table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.indexes
            .read()
            .values()
            .filter(|info| info.table_name == table_name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, TypeId};
    use stratum::disk::DiskManager;
    use tempfile::tempdir;

    fn catalog(dir: &tempfile::TempDir) -> Catalog {
        let dm = DiskManager::open(dir.path().join("catalog.db")).unwrap();
        Catalog::new(Arc::new(BufferPoolManager::new(64, 2, dm)))
    }

    #[test]
    fn integer_index_keys_preserve_order() {
        let low = IndexKey::from_value(&Value::Integer(-5));
        let mid = IndexKey::from_value(&Value::Integer(0));
        let high = IndexKey::from_value(&Value::Integer(123));
        assert!(low < mid && mid < high);
    }

    #[test]
    fn tables_resolve_by_name_and_oid() {
        let dir = tempdir().unwrap();
        let catalog = catalog(&dir);
        let schema = Schema::new(vec![Column::new("a", TypeId::Integer)]);

        let info = catalog.create_table("t", schema.clone()).unwrap();
        assert_eq!(catalog.table("t").unwrap().oid, info.oid);
        assert_eq!(catalog.table_by_oid(info.oid).unwrap().name, "t");
        assert!(catalog.table("missing").is_err());
        assert!(catalog.create_table("t", schema).is_err());
    }

    #[test]
    fn index_backfills_existing_rows() {
        let dir = tempdir().unwrap();
        let catalog = catalog(&dir);
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer),
            Column::new("v", TypeId::Integer),
        ]);
        let table = catalog.create_table("t", schema.clone()).unwrap();

        let mut rids = Vec::new();
        for i in 0..5i64 {
            let tuple = Tuple::new(vec![Value::Integer(i), Value::Integer(i * 2)]);
            let rid = table
                .heap
                .insert_tuple(&stratum::TupleMeta::new(1, false), &tuple.encode(&schema))
                .unwrap()
                .unwrap();
            rids.push(rid);
        }

        let index = catalog.create_index("t_id_idx", "t", 0).unwrap();
        for (i, rid) in rids.iter().enumerate() {
            let key = IndexKey::from_value(&Value::Integer(i as i64));
            assert_eq!(index.index.get(&key).unwrap(), Some(*rid));
        }
        assert_eq!(catalog.table_indexes("t").len(), 1);
        assert!(catalog.table_indexes("other").is_empty());
    }
}
