//! WritePrepared two-phase commit.
//!
//! `prepare` writes the transaction's batch to the WAL bracketed by
//! `BeginPrepare … EndPrepare(xid)` markers and inserts its data into
//! the memtable at the *prepare* sequences — durable, but invisible:
//! every read through this wrapper carries a snapshot checker that hides
//! sequences still sitting in the prepare heap or recorded as rolled
//! back.
//!
//! `commit` appends a `Commit(xid)` marker (which consumes one sequence,
//! the *commit sequence*) and moves the transaction's sequence range
//! from the prepare heap into a bounded commit cache mapping
//! `prepare_seq → commit_seq`. A reader at snapshot `S` sees a prepared
//! entry iff its transaction committed with `commit_seq <= S`.
//!
//! The commit cache evicts deterministically: committed entries only,
//! lowest prepare sequence first, in fixed-size chunks. Evicted ranges
//! are treated as long-committed (visible by plain sequence order),
//! which holds because eviction happens in prepare-sequence order long
//! after the commit point.
//!
//! Recovery: the engine's WAL replay surfaces prepared-but-unresolved
//! transactions; they re-enter the prepare heap (invisible) until the
//! application resolves them with [`WritePreparedTxnDb::commit_recovered`]
//! or [`WritePreparedTxnDb::rollback_recovered`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::batch::WriteBatch;
use crate::engine::Db;
use crate::engine::read::SnapshotChecker;
use crate::error::{Result, Status};
use crate::options::{ReadOptions, WriteOptions};
use crate::types::{DEFAULT_COLUMN_FAMILY_ID, SequenceNumber};

use super::{TransactionState, batch_overlay, resolve_overlay};

/// Maximum committed ranges retained before eviction.
const COMMIT_CACHE_CAPACITY: usize = 1 << 16;

/// Ranges evicted per overflow, lowest prepare sequence first.
const COMMIT_CACHE_EVICT_CHUNK: usize = 1 << 10;

#[derive(Debug, Clone)]
struct SeqRange {
    start: SequenceNumber,
    /// Exclusive.
    end: SequenceNumber,
}

impl SeqRange {
    fn contains(&self, seq: SequenceNumber) -> bool {
        seq >= self.start && seq < self.end
    }
}

#[derive(Default)]
struct TwoPcState {
    /// Prepared, unresolved ranges keyed by prepare sequence.
    prepare_heap: BTreeMap<SequenceNumber, (SeqRange, Vec<u8>)>,
    /// xid → prepare sequence, for commit/rollback lookup.
    by_xid: HashMap<Vec<u8>, SequenceNumber>,
    /// Committed ranges: prepare start → (range, commit sequence).
    commit_cache: BTreeMap<SequenceNumber, (SeqRange, SequenceNumber)>,
    /// Rolled-back ranges, permanently invisible.
    aborted: Vec<SeqRange>,
}

/// Database wrapper providing WritePrepared two-phase commit.
pub struct WritePreparedTxnDb {
    db: Db,
    state: Mutex<TwoPcState>,
}

impl WritePreparedTxnDb {
    /// Wrap a database, re-registering transactions the engine found
    /// prepared but unresolved in the WAL.
    pub fn new(db: Db) -> Self {
        let wrapper = Self {
            db: db.clone(),
            state: Mutex::new(TwoPcState::default()),
        };
        for recovered in db.recovered_transactions() {
            let mut state = wrapper.state.lock().expect("2pc state poisoned");
            let range = SeqRange {
                start: recovered.prepare_seq,
                end: recovered.end_seq,
            };
            info!(xid = ?recovered.xid, prepare_seq = recovered.prepare_seq,
                  "recovered prepared transaction awaiting resolution");
            state
                .by_xid
                .insert(recovered.xid.clone(), recovered.prepare_seq);
            state
                .prepare_heap
                .insert(recovered.prepare_seq, (range, recovered.xid));
        }
        wrapper
    }

    /// The wrapped database.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Start a transaction.
    pub fn begin(&self) -> WritePreparedTransaction<'_> {
        WritePreparedTransaction {
            txn_db: self,
            batch: WriteBatch::new(),
            xid: None,
            prepare_range: None,
            state: TransactionState::Started,
        }
    }

    /// Read with two-phase-commit visibility applied.
    pub fn get(&self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let checker = TwoPcChecker { state: &self.state };
        self.db
            .get_cf_with_checker(ro, DEFAULT_COLUMN_FAMILY_ID, key, Some(&checker))
    }

    /// Transactions prepared before a crash and still unresolved.
    pub fn unresolved_xids(&self) -> Vec<Vec<u8>> {
        let state = self.state.lock().expect("2pc state poisoned");
        state.by_xid.keys().cloned().collect()
    }

    /// Commit a transaction recovered from the WAL.
    pub fn commit_recovered(&self, xid: &[u8], wo: &WriteOptions) -> Result<()> {
        let mut commit_batch = WriteBatch::new();
        commit_batch.mark_commit(xid);
        let commit_seq = self.db.write_returning_seq(wo, commit_batch)?;
        self.apply_commit(xid, commit_seq)
    }

    /// Roll back a transaction recovered from the WAL.
    pub fn rollback_recovered(&self, xid: &[u8], wo: &WriteOptions) -> Result<()> {
        let mut rollback_batch = WriteBatch::new();
        rollback_batch.mark_rollback(xid);
        self.db.write(wo, rollback_batch)?;
        self.apply_rollback(xid)
    }

    fn register_prepare(&self, xid: Vec<u8>, range: SeqRange) {
        let mut state = self.state.lock().expect("2pc state poisoned");
        state.by_xid.insert(xid.clone(), range.start);
        state.prepare_heap.insert(range.start, (range, xid));
    }

    fn apply_commit(&self, xid: &[u8], commit_seq: SequenceNumber) -> Result<()> {
        let mut state = self.state.lock().expect("2pc state poisoned");
        let prepare_seq = state
            .by_xid
            .remove(xid)
            .ok_or_else(|| Status::invalid_argument("unknown transaction id"))?;
        let (range, _) = state
            .prepare_heap
            .remove(&prepare_seq)
            .ok_or_else(|| Status::invalid_argument("transaction not prepared"))?;
        state.commit_cache.insert(prepare_seq, (range, commit_seq));

        // Deterministic bound: committed entries only, lowest prepare
        // sequence first, whole chunks at a time.
        while state.commit_cache.len() > COMMIT_CACHE_CAPACITY {
            let victims: Vec<SequenceNumber> = state
                .commit_cache
                .keys()
                .take(COMMIT_CACHE_EVICT_CHUNK)
                .copied()
                .collect();
            for victim in victims {
                state.commit_cache.remove(&victim);
            }
        }

        debug!(xid = ?xid, prepare_seq, commit_seq, "transaction committed");
        Ok(())
    }

    fn apply_rollback(&self, xid: &[u8]) -> Result<()> {
        let mut state = self.state.lock().expect("2pc state poisoned");
        let prepare_seq = state
            .by_xid
            .remove(xid)
            .ok_or_else(|| Status::invalid_argument("unknown transaction id"))?;
        let (range, _) = state
            .prepare_heap
            .remove(&prepare_seq)
            .ok_or_else(|| Status::invalid_argument("transaction not prepared"))?;
        state.aborted.push(range);
        debug!(xid = ?xid, prepare_seq, "transaction rolled back");
        Ok(())
    }
}

/// Visibility rules for prepared data.
struct TwoPcChecker<'a> {
    state: &'a Mutex<TwoPcState>,
}

impl SnapshotChecker for TwoPcChecker<'_> {
    fn is_visible(&self, seq: SequenceNumber, snapshot: SequenceNumber) -> bool {
        let state = self.state.lock().expect("2pc state poisoned");

        for range in &state.aborted {
            if range.contains(seq) {
                return false;
            }
        }

        // Prepared but unresolved: invisible to everyone.
        if let Some((_, (range, _))) = state.prepare_heap.range(..=seq).next_back()
            && range.contains(seq)
        {
            return false;
        }

        // Committed: visible once the commit point is inside the
        // snapshot.
        if let Some((_, (range, commit_seq))) = state.commit_cache.range(..=seq).next_back()
            && range.contains(seq)
        {
            return *commit_seq <= snapshot;
        }

        // Plain writes (or evicted long-committed ranges).
        seq <= snapshot
    }
}

/// One WritePrepared transaction.
pub struct WritePreparedTransaction<'a> {
    txn_db: &'a WritePreparedTxnDb,
    batch: WriteBatch,
    xid: Option<Vec<u8>>,
    prepare_range: Option<SeqRange>,
    state: TransactionState,
}

impl WritePreparedTransaction<'_> {
    fn check_started(&self) -> Result<()> {
        match self.state {
            TransactionState::Started => Ok(()),
            _ => Err(Status::TransactionClosed),
        }
    }

    /// Buffer a put.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_started()?;
        self.batch.put(key, value);
        Ok(())
    }

    /// Buffer a delete.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_started()?;
        self.batch.delete(key);
        Ok(())
    }

    /// Buffer a merge operand.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_started()?;
        self.batch.merge(key, value);
        Ok(())
    }

    /// Read through the transaction's own batch, then the database with
    /// two-phase-commit visibility.
    pub fn get(&self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let overlay = batch_overlay(&self.batch, DEFAULT_COLUMN_FAMILY_ID, key)?;
        let below = self.txn_db.get(ro, key)?;
        let operator = self
            .txn_db
            .db
            .cf_merge_operator(DEFAULT_COLUMN_FAMILY_ID)?;
        resolve_overlay(overlay, below, key, operator.as_ref())
    }

    /// Make the transaction durable under `xid` without making it
    /// visible.
    pub fn prepare(&mut self, xid: &[u8], wo: &WriteOptions) -> Result<()> {
        self.check_started()?;

        // Even an empty transaction leaves a durable prepare record so
        // recovery can surface its xid.
        let count = self.batch.count() as u64;
        let mut prepared = WriteBatch::new();
        prepared.mark_begin_prepare();
        prepared.append_batch(&self.batch);
        prepared.mark_end_prepare(xid);

        let prepare_seq = self.txn_db.db.write_returning_seq(wo, prepared)?;
        let range = SeqRange {
            start: prepare_seq,
            end: prepare_seq + count.max(1),
        };
        self.txn_db.register_prepare(xid.to_vec(), range.clone());
        self.xid = Some(xid.to_vec());
        self.prepare_range = Some(range);
        self.state = TransactionState::Prepared;
        debug!(xid = ?xid, prepare_seq, "transaction prepared");
        Ok(())
    }

    /// Commit a prepared transaction.
    pub fn commit(mut self, wo: &WriteOptions) -> Result<()> {
        match self.state {
            TransactionState::Prepared => {}
            TransactionState::Started => {
                // One-phase shortcut: no prepare happened, write
                // directly.
                let batch = std::mem::take(&mut self.batch);
                let result = self.txn_db.db.write(wo, batch);
                self.state = TransactionState::Committed;
                return result;
            }
            _ => return Err(Status::TransactionClosed),
        }

        let xid = self.xid.clone().ok_or(Status::TransactionClosed)?;
        let mut commit_batch = WriteBatch::new();
        commit_batch.mark_commit(&xid);
        let commit_seq = self.txn_db.db.write_returning_seq(wo, commit_batch)?;
        self.txn_db.apply_commit(&xid, commit_seq)?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Roll back (prepared or not).
    pub fn rollback(mut self, wo: &WriteOptions) -> Result<()> {
        match self.state {
            TransactionState::Started => {
                self.batch.clear();
                self.state = TransactionState::RolledBack;
                Ok(())
            }
            TransactionState::Prepared => {
                let xid = self.xid.clone().ok_or(Status::TransactionClosed)?;
                let mut rollback_batch = WriteBatch::new();
                rollback_batch.mark_rollback(&xid);
                self.txn_db.db.write(wo, rollback_batch)?;
                self.txn_db.apply_rollback(&xid)?;
                self.state = TransactionState::RolledBack;
                Ok(())
            }
            _ => Err(Status::TransactionClosed),
        }
    }
}
