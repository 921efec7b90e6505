#![allow(dead_code)]

use std::sync::Arc;

use granite::catalog::{Catalog, TableInfo};
use granite::executor::{execute, ExecutorContext};
use granite::plan::PlanNode;
use granite::tuple::Tuple;
use granite::types::{Column, Schema, TypeId, Value};
use stratum::disk::DiskManager;
use stratum::transaction::{IsolationLevel, Transaction, TransactionManager};
use stratum::BufferPoolManager;
use tempfile::TempDir;

/// One self-contained engine instance over a temp directory.
pub struct TestDb {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub txn_mgr: Arc<TransactionManager>,
    _dir: TempDir,
}

pub fn setup(name: &str) -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let dm = DiskManager::open(dir.path().join(format!("{name}.db"))).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(128, 2, dm));
    TestDb {
        catalog: Arc::new(Catalog::new(bpm.clone())),
        txn_mgr: Arc::new(TransactionManager::new()),
        bpm,
        _dir: dir,
    }
}

impl TestDb {
    pub fn begin(&self) -> Arc<Transaction> {
        self.txn_mgr.begin(IsolationLevel::SnapshotIsolation)
    }

    pub fn begin_serializable(&self) -> Arc<Transaction> {
        self.txn_mgr.begin(IsolationLevel::Serializable)
    }

    pub fn ctx(&self, txn: &Arc<Transaction>) -> ExecutorContext {
        ExecutorContext {
            bpm: self.bpm.clone(),
            catalog: self.catalog.clone(),
            txn_mgr: self.txn_mgr.clone(),
            txn: txn.clone(),
            is_delete: false,
        }
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> bool {
        let catalog = self.catalog.clone();
        self.txn_mgr
            .commit(txn, move |oid| catalog.heap_of(oid))
            .unwrap()
    }

    pub fn abort(&self, txn: &Arc<Transaction>) {
        self.txn_mgr.abort(txn).unwrap();
    }

    /// `(id INTEGER, v INTEGER)` table.
    pub fn create_id_v_table(&self, name: &str) -> Arc<TableInfo> {
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer),
            Column::new("v", TypeId::Integer),
        ]);
        self.catalog.create_table(name, schema).unwrap()
    }

    /// Runs an insert of integer row literals, returning the reported count.
    pub fn insert_rows(
        &self,
        txn: &Arc<Transaction>,
        table: &TableInfo,
        rows: Vec<Vec<i64>>,
    ) -> i64 {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::Integer).collect())
            .collect();
        let plan = PlanNode::Insert {
            table_oid: table.oid,
            child: Box::new(PlanNode::Values {
                schema: table.schema.clone(),
                rows,
            }),
        };
        let ctx = self.ctx(txn);
        let result = execute(&plan, &ctx).unwrap();
        result[0].0.value(0).as_integer().unwrap()
    }

    /// Full scan, visible rows as value vectors.
    pub fn scan(&self, txn: &Arc<Transaction>, table: &TableInfo) -> Vec<Vec<Value>> {
        let plan = PlanNode::SeqScan {
            table_oid: table.oid,
            filter: None,
        };
        let ctx = self.ctx(txn);
        execute(&plan, &ctx)
            .unwrap()
            .into_iter()
            .map(|(tuple, _)| tuple.values().to_vec())
            .collect()
    }

    pub fn scan_ints(&self, txn: &Arc<Transaction>, table: &TableInfo) -> Vec<Vec<i64>> {
        self.scan(txn, table)
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|v| v.as_integer().expect("integer cell"))
                    .collect()
            })
            .collect()
    }
}

/// Convenience for comparing executor output against expected integer rows.
pub fn rows_of(results: &[(Tuple, stratum::Rid)]) -> Vec<Vec<Value>> {
    results
        .iter()
        .map(|(tuple, _)| tuple.values().to_vec())
        .collect()
}
