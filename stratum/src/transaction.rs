//! Timestamp-ordered snapshot isolation: transactions, per-row undo chains,
//! the watermark over active read timestamps, and the transaction manager.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::heap::TableHeap;
use crate::page::TupleMeta;
use crate::{Rid, TXN_START_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    /// Hit a write-write conflict; may no longer commit.
    Tainted,
    Committed,
    Aborted,
}

/// Reference to an undo log: the transaction that wrote it plus its position
/// in that transaction's log array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoLink {
    pub prev_txn: u64,
    pub prev_log_idx: usize,
}

impl UndoLink {
    pub const INVALID: UndoLink = UndoLink {
        prev_txn: 0,
        prev_log_idx: 0,
    };

    pub fn is_valid(&self) -> bool {
        self.prev_txn >= TXN_START_ID
    }
}

/// Column-level pre-image of one write. `tuple` is encoded under the
/// projection of the table schema selected by `modified_fields`.
#[derive(Debug, Clone)]
pub struct UndoLog {
    pub is_deleted: bool,
    pub modified_fields: Vec<bool>,
    pub tuple: Vec<u8>,
    /// Timestamp of the version this log reconstructs to.
    pub ts: u64,
    pub prev_version: UndoLink,
}

pub type TableOid = u32;

pub struct Transaction {
    id: u64,
    isolation_level: IsolationLevel,
    read_ts: AtomicU64,
    commit_ts: AtomicU64,
    state: Mutex<TransactionState>,
    undo_logs: Mutex<Vec<UndoLog>>,
    write_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
}

impl Transaction {
    fn new(id: u64, isolation_level: IsolationLevel, read_ts: u64) -> Self {
        Transaction {
            id,
            isolation_level,
            read_ts: AtomicU64::new(read_ts),
            commit_ts: AtomicU64::new(0),
            state: Mutex::new(TransactionState::Running),
            undo_logs: Mutex::new(Vec::new()),
            write_set: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn read_ts(&self) -> u64 {
        self.read_ts.load(Ordering::SeqCst)
    }

    pub fn commit_ts(&self) -> u64 {
        self.commit_ts.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Marks the transaction as conflicted; a tainted transaction cannot
    /// commit and must be aborted.
    pub fn set_tainted(&self) {
        *self.state.lock() = TransactionState::Tainted;
    }

    /// Appends an undo log, returning its index for links.
    pub fn append_undo_log(&self, log: UndoLog) -> usize {
        let mut logs = self.undo_logs.lock();
        logs.push(log);
        logs.len() - 1
    }

    pub fn undo_log(&self, idx: usize) -> Option<UndoLog> {
        self.undo_logs.lock().get(idx).cloned()
    }

    /// Rewrites an undo log in place. Legal only for the owning transaction,
    /// and only to grow `modified_fields`; captured pre-image values never
    /// change.
    pub fn modify_undo_log(&self, idx: usize, log: UndoLog) {
        let mut logs = self.undo_logs.lock();
        logs[idx] = log;
    }

    pub fn undo_log_num(&self) -> usize {
        self.undo_logs.lock().len()
    }

    pub fn append_write_set(&self, oid: TableOid, rid: Rid) {
        self.write_set.lock().entry(oid).or_default().insert(rid);
    }

    pub fn write_set(&self) -> HashMap<TableOid, HashSet<Rid>> {
        self.write_set.lock().clone()
    }
}

/// Multiset of active read timestamps. The watermark is the minimum active
/// read timestamp, falling back to the last commit timestamp when no
/// transaction is running; undo logs below it are unreachable.
pub struct Watermark {
    commit_ts: u64,
    current_reads: BTreeMap<u64, usize>,
}

impl Watermark {
    pub fn new(commit_ts: u64) -> Self {
        Watermark {
            commit_ts,
            current_reads: BTreeMap::new(),
        }
    }

    pub fn commit_ts(&self) -> u64 {
        self.commit_ts
    }

    pub fn update_commit_ts(&mut self, commit_ts: u64) {
        self.commit_ts = commit_ts;
    }

    pub fn add_txn(&mut self, read_ts: u64) {
        debug_assert!(read_ts >= self.commit_ts, "read ts below commit ts");
        *self.current_reads.entry(read_ts).or_insert(0) += 1;
    }

    pub fn remove_txn(&mut self, read_ts: u64) {
        if let Some(count) = self.current_reads.get_mut(&read_ts) {
            *count -= 1;
            if *count == 0 {
                self.current_reads.remove(&read_ts);
            }
        }
    }

    pub fn watermark(&self) -> u64 {
        self.current_reads
            .first_key_value()
            .map(|(ts, _)| *ts)
            .unwrap_or(self.commit_ts)
    }
}

/// Process-wide transaction service: timestamp allocation, the transaction
/// map, the per-row version-link store and garbage collection.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    last_commit_ts: AtomicU64,
    txn_map: RwLock<HashMap<u64, Arc<Transaction>>>,
    running_txns: Mutex<Watermark>,
    commit_latch: Mutex<()>,
    undo_links: Mutex<HashMap<Rid, UndoLink>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(TXN_START_ID),
            last_commit_ts: AtomicU64::new(0),
            txn_map: RwLock::new(HashMap::new()),
            running_txns: Mutex::new(Watermark::new(0)),
            commit_latch: Mutex::new(()),
            undo_links: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a transaction reading as of the last commit.
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let mut txn_map = self.txn_map.write();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        let mut watermark = self.running_txns.lock();
        let read_ts = watermark.commit_ts();
        watermark.add_txn(read_ts);
        drop(watermark);

        let txn = Arc::new(Transaction::new(txn_id, isolation_level, read_ts));
        txn_map.insert(txn_id, txn.clone());
        crate::stratum_debug_log!(
            "[TxnManager::begin] txn {} read_ts {read_ts}",
            txn_id - TXN_START_ID
        );
        txn
    }

    pub fn get_txn(&self, txn_id: u64) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    /// Serializable validation hook. The conservative check re-reads the
    /// write set and demands this transaction still own every row it wrote;
    /// under first-updater-wins any interleaved writer would have tainted
    /// one side already.
    fn verify_txn<F>(&self, txn: &Transaction, table_of: &F) -> io::Result<bool>
    where
        F: Fn(TableOid) -> Option<Arc<TableHeap>>,
    {
        for (oid, rids) in txn.write_set() {
            let Some(table) = table_of(oid) else {
                return Ok(false);
            };
            for rid in rids {
                let meta = table.get_tuple_meta(rid)?;
                if meta.ts != txn.id() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Commits: allocates the commit timestamp, verifies serializable
    /// transactions, stamps every written row with the commit timestamp and
    /// retires the read timestamp from the watermark. Returns `Ok(false)`
    /// when verification rejects the transaction (it is aborted).
    pub fn commit<F>(&self, txn: &Arc<Transaction>, table_of: F) -> io::Result<bool>
    where
        F: Fn(TableOid) -> Option<Arc<TableHeap>>,
    {
        let commit_guard = self.commit_latch.lock();
        let commit_ts = self.last_commit_ts.load(Ordering::SeqCst) + 1;

        if txn.state() != TransactionState::Running {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transaction is not running",
            ));
        }

        if txn.isolation_level() == IsolationLevel::Serializable
            && !self.verify_txn(txn, &table_of)?
        {
            drop(commit_guard);
            self.abort(txn)?;
            return Ok(false);
        }

        // Replace the writer id with the real commit timestamp on every row
        // this transaction touched.
        for (oid, rids) in txn.write_set() {
            let table = table_of(oid).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown table oid {oid} in write set"),
                )
            })?;
            for rid in rids {
                let (meta, payload) = table.get_tuple(rid)?;
                let stamped = TupleMeta::new(commit_ts, meta.is_deleted);
                table.update_tuple_in_place(&stamped, &payload, rid)?;
            }
        }

        let _txn_map = self.txn_map.write();
        self.last_commit_ts.store(commit_ts, Ordering::SeqCst);
        txn.commit_ts.store(commit_ts, Ordering::SeqCst);
        *txn.state.lock() = TransactionState::Committed;

        let mut watermark = self.running_txns.lock();
        watermark.update_commit_ts(commit_ts);
        watermark.remove_txn(txn.read_ts());
        crate::stratum_debug_log!(
            "[TxnManager::commit] txn {} commit_ts {commit_ts}",
            txn.id() - TXN_START_ID
        );
        Ok(true)
    }

    /// Aborts a running or tainted transaction. Its writes are not rolled
    /// back physically; readers skip them through the version chain, and
    /// its undo logs stay reachable until garbage collection.
    pub fn abort(&self, txn: &Arc<Transaction>) -> io::Result<()> {
        let state = txn.state();
        if state != TransactionState::Running && state != TransactionState::Tainted {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transaction is not running or tainted",
            ));
        }

        let _txn_map = self.txn_map.write();
        *txn.state.lock() = TransactionState::Aborted;
        self.running_txns.lock().remove_txn(txn.read_ts());
        crate::stratum_debug_log!("[TxnManager::abort] txn {}", txn.id() - TXN_START_ID);
        Ok(())
    }

    /// Minimum read timestamp any live transaction may use.
    pub fn watermark(&self) -> u64 {
        self.running_txns.lock().watermark()
    }

    pub fn last_commit_ts(&self) -> u64 {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    /// Head of a row's version chain, if any.
    pub fn undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.undo_links.lock().get(&rid).copied()
    }

    pub fn update_undo_link(&self, rid: Rid, link: UndoLink) {
        self.undo_links.lock().insert(rid, link);
    }

    /// Resolves a link through the transaction map. A link into a collected
    /// transaction reads as end-of-chain.
    pub fn read_undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        if !link.is_valid() {
            return None;
        }
        let txn = self.get_txn(link.prev_txn)?;
        txn.undo_log(link.prev_log_idx)
    }

    /// Drops terminal transactions whose undo logs all sit below the
    /// watermark; no live transaction can reach them through any chain.
    pub fn garbage_collection(&self) {
        let watermark = self.watermark();
        let mut txn_map = self.txn_map.write();
        txn_map.retain(|_, txn| {
            let state = txn.state();
            if state != TransactionState::Committed && state != TransactionState::Aborted {
                return true;
            }
            let logs = txn.undo_logs.lock();
            let all_below = logs.iter().all(|log| log.ts < watermark);
            !all_below
        });
    }

    #[cfg(test)]
    fn txn_count(&self) -> usize {
        self.txn_map.read().len()
    }
}
