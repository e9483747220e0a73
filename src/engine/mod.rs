//! # The database engine
//!
//! [`Db`] composes every subsystem: the write-ahead log, per-column-
//! family memtables, the version set (MANIFEST), table files, the block
//! cache, snapshots, and the background flush/compaction pool.
//!
//! ## Concurrency model
//!
//! Parallel threads share the engine through one central mutex
//! ([`DbState`]) plus a few independently locked pieces: the WAL writer
//! (its own mutex, so fsync never blocks readers), the write queue, the
//! snapshot list, and the open-table cache. Background work runs on a
//! bounded worker pool fed by a crossbeam channel; shutdown is signalled
//! by an atomic token and drained with explicit shutdown jobs.
//!
//! Foreground writers may block only in the write queue, when the
//! immutable-memtable slots are full, or during a write stall. Readers
//! never block on writers: they snapshot `Arc`s to the memtables and the
//! current Version under the mutex and do all I/O outside it.
//!
//! ## Ordering guarantees
//!
//! Writes become visible in sequence order: the group-commit leader
//! assigns consecutive sequences, writes one WAL record, inserts into
//! the memtables, and only then publishes the new last sequence that
//! readers use as their default snapshot.

pub mod column_family;
pub mod flush;
pub mod iterator;
pub mod read;
pub mod snapshot;
pub mod write;

#[cfg(test)]
mod tests;

pub use column_family::ColumnFamilyHandle;
pub use iterator::DbIterator;
pub use snapshot::Snapshot;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info, warn};

use crate::batch::{BatchHandler, WriteBatch};
use crate::compaction::{self, Compaction, CompactionKind};
use crate::env::{
    Env, FileLock, FileType, current_file_name, lock_file_name, log_file_name, parse_file_name,
    table_file_name,
};
use crate::error::{Result, Status};
use crate::iterator::{InternalIterator, MergingIterator};
use crate::manifest::{ColumnFamilyData, FileMetaHandle, VersionEdit, VersionSet};
use crate::memtable::MemTable;
use crate::options::{ColumnFamilyOptions, CompactionStyle, Options, ReadOptions, WriteOptions};
use crate::sstable::Table;
use crate::types::{
    ColumnFamilyId, DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME, LookupKey,
    SequenceNumber, extract_user_key,
};
use crate::wal::{LogReader, LogWriter, ReplayMode};

use column_family::CfState;
use read::{GetContext, SnapshotChecker};
use snapshot::SnapshotList;
use write::{JoinOutcome, MemTableInserter, WriterHandle, WriteQueue};

/// How long a slowed-down write sleeps before proceeding.
const SLOWDOWN_DELAY: Duration = Duration::from_millis(1);

/// Background job descriptor.
enum BgJob {
    Flush(ColumnFamilyId),
    Compact(ColumnFamilyId),
    Shutdown,
}

/// A two-phase-commit transaction found unresolved during recovery.
#[derive(Debug, Clone)]
pub struct RecoveredTransaction {
    /// Application-chosen transaction id.
    pub xid: Vec<u8>,
    /// First sequence of the prepared section.
    pub prepare_seq: SequenceNumber,
    /// One past the prepared section's last sequence.
    pub end_seq: SequenceNumber,
}

/// WAL writer state, locked independently of the main mutex so fsync
/// does not stall readers.
struct LogState {
    writer: Option<LogWriter>,
    number: u64,
}

/// All mutable engine state behind the central mutex.
struct DbState {
    vset: VersionSet,
    cfs: HashMap<ColumnFamilyId, CfState>,
    bg_error: Option<Status>,
    pending_flush: HashSet<ColumnFamilyId>,
    pending_compaction: HashSet<ColumnFamilyId>,
    /// File numbers being written by in-flight jobs; protected from the
    /// obsolete-file sweep.
    pending_outputs: HashSet<u64>,
    lock: Option<FileLock>,
}

pub(crate) struct DbInner {
    env: Arc<dyn Env>,
    dbname: PathBuf,
    options: Options,

    state: Mutex<DbState>,
    /// Signalled when background work finishes or an immutable slot
    /// frees up.
    work_done: Condvar,

    log: Mutex<LogState>,
    write_queue: WriteQueue,
    last_sequence: AtomicU64,
    shutting_down: Arc<AtomicBool>,
    snapshots: Arc<SnapshotList>,

    /// Open table readers, keyed by file number.
    tables: Mutex<HashMap<u64, Arc<Table>>>,

    bg_sender: OnceLock<Sender<BgJob>>,
    bg_handles: Mutex<Vec<std::thread::JoinHandle<()>>>,

    /// Unresolved prepared transactions found during WAL replay.
    recovered_transactions: Mutex<Vec<RecoveredTransaction>>,
}

/// The database handle. Cheap to clone; all clones share one engine.
pub struct Db {
    inner: Arc<DbInner>,
}

impl Clone for Db {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Db {
    // --------------------------------------------------------------------------------------------
    // Open / close
    // --------------------------------------------------------------------------------------------

    /// Open (or create) a database with only the default column family.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Db> {
        let (db, _) = Self::open_with_column_families(path, options, Vec::new())?;
        Ok(db)
    }

    /// Open a database with extra column families.
    ///
    /// Every column family recorded in the MANIFEST must be listed (or
    /// it falls back to the default family's options); listed families
    /// missing from a fresh database are created.
    pub fn open_with_column_families(
        path: impl AsRef<Path>,
        options: Options,
        column_families: Vec<(String, ColumnFamilyOptions)>,
    ) -> Result<(Db, Vec<ColumnFamilyHandle>)> {
        let dbname = path.as_ref().to_path_buf();
        let env = Arc::clone(&options.env);
        env.create_dir_all(&dbname)?;

        let lock = env.lock_file(&lock_file_name(&dbname))?;
        let mut vset = VersionSet::new(Arc::clone(&env), &dbname);

        let exists = env.file_exists(&current_file_name(&dbname));
        if exists && options.error_if_exists {
            env.unlock_file(lock)?;
            return Err(Status::invalid_argument(format!(
                "database already exists: {}",
                dbname.display()
            )));
        }
        if !exists && !options.create_if_missing {
            env.unlock_file(lock)?;
            return Err(Status::invalid_argument(format!(
                "database does not exist: {}",
                dbname.display()
            )));
        }

        let mut descriptors: HashMap<String, ColumnFamilyOptions> = column_families
            .iter()
            .map(|(name, opts)| (name.clone(), opts.clone()))
            .collect();
        descriptors
            .entry(DEFAULT_COLUMN_FAMILY_NAME.to_string())
            .or_insert_with(|| options.cf_options.clone());

        let prepared = (|| -> Result<()> {
            if exists {
                vset.recover(&descriptors)?;
                // Families requested but absent from the MANIFEST are
                // new.
                for (name, cf_opts) in &column_families {
                    if vset.cf_id_by_name(name).is_none() {
                        let id = vset.cf_ids().iter().max().copied().unwrap_or(0) + 1;
                        vset.register_cf(id, name, cf_opts.clone())?;
                    }
                }
            } else {
                vset.register_cf(
                    DEFAULT_COLUMN_FAMILY_ID,
                    DEFAULT_COLUMN_FAMILY_NAME,
                    options.cf_options.clone(),
                )?;
                let mut next_id = 1;
                for (name, cf_opts) in &column_families {
                    if name != DEFAULT_COLUMN_FAMILY_NAME {
                        vset.register_cf(next_id, name, cf_opts.clone())?;
                        next_id += 1;
                    }
                }
                info!(db = %dbname.display(), "creating new database");
            }
            Ok(())
        })();
        if let Err(e) = prepared {
            env.unlock_file(lock)?;
            return Err(e);
        }

        let inner = Arc::new(DbInner {
            env: Arc::clone(&env),
            dbname: dbname.clone(),
            options,
            state: Mutex::new(DbState {
                vset,
                cfs: HashMap::new(),
                bg_error: None,
                pending_flush: HashSet::new(),
                pending_compaction: HashSet::new(),
                pending_outputs: HashSet::new(),
                lock: Some(lock),
            }),
            work_done: Condvar::new(),
            log: Mutex::new(LogState {
                writer: None,
                number: 0,
            }),
            write_queue: WriteQueue::new(),
            last_sequence: AtomicU64::new(0),
            shutting_down: Arc::new(AtomicBool::new(false)),
            snapshots: Arc::new(SnapshotList::new()),
            tables: Mutex::new(HashMap::new()),
            bg_sender: OnceLock::new(),
            bg_handles: Mutex::new(Vec::new()),
            recovered_transactions: Mutex::new(Vec::new()),
        });

        if let Err(e) = inner.recover_wal_and_install(exists) {
            // Never strand the process lock on a failed open, and never
            // let a poisoned mutex mask the original error.
            let mut state = inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(lock) = state.lock.take() {
                let _ = inner.env.unlock_file(lock);
            }
            return Err(e);
        }
        inner.start_background_workers();

        let handles = {
            let state = inner.lock_state()?;
            state
                .vset
                .cf_ids()
                .into_iter()
                .map(|id| {
                    let name = state.vset.cf(id).expect("listed id").name.clone();
                    ColumnFamilyHandle::new(id, name)
                })
                .collect()
        };

        info!(db = %dbname.display(), "database opened");
        Ok((Db { inner }, handles))
    }

    /// Flush everything, stop background work, release the lock.
    pub fn close(&self) -> Result<()> {
        let ids: Vec<ColumnFamilyId> = {
            let state = self.inner.lock_state()?;
            state.vset.cf_ids()
        };
        for id in ids {
            // Best effort: a background error should not leave the rest
            // unflushed.
            if let Err(e) = self.flush_cf(id) {
                warn!(cf = id, error = %e, "flush during close failed");
            }
        }

        self.inner
            .shutting_down
            .store(true, AtomicOrdering::Release);
        self.inner.work_done.notify_all();
        self.inner.stop_background_workers();

        {
            let mut log = self.inner.lock_log()?;
            if let Some(writer) = log.writer.as_mut() {
                writer.sync()?;
            }
        }

        let mut state = self.inner.lock_state()?;
        if let Some(lock) = state.lock.take() {
            self.inner.env.unlock_file(lock)?;
        }
        info!(db = %self.inner.dbname.display(), "database closed");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Apply a batch atomically.
    pub fn write(&self, opts: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.write_returning_seq(opts, batch).map(|_| ())
    }

    /// Apply a batch atomically, returning its base sequence (0 when the
    /// batch held no data operations).
    pub fn write_returning_seq(
        &self,
        opts: &WriteOptions,
        batch: WriteBatch,
    ) -> Result<SequenceNumber> {
        if self.inner.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(Status::ShuttingDown);
        }

        let handle = WriterHandle::new(batch, opts.sync, opts.disable_wal);
        match self.inner.write_queue.join(&handle) {
            JoinOutcome::Done => {
                handle.take_status()?;
                Ok(handle.assigned_seq.load(AtomicOrdering::Acquire))
            }
            JoinOutcome::Leader => {
                let result = self.inner.perform_group_write(&handle, opts.no_slowdown);
                result?;
                handle.take_status()?;
                Ok(handle.assigned_seq.load(AtomicOrdering::Acquire))
            }
        }
    }

    /// Put `key` in the default column family.
    pub fn put(&self, opts: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_cf(opts, DEFAULT_COLUMN_FAMILY_ID, key, value)
    }

    /// Put `key` in column family `cf`.
    pub fn put_cf(
        &self,
        opts: &WriteOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf, key, value);
        self.write(opts, batch)
    }

    /// Delete `key` in the default column family.
    pub fn delete(&self, opts: &WriteOptions, key: &[u8]) -> Result<()> {
        self.delete_cf(opts, DEFAULT_COLUMN_FAMILY_ID, key)
    }

    /// Delete `key` in column family `cf`.
    pub fn delete_cf(&self, opts: &WriteOptions, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf, key);
        self.write(opts, batch)
    }

    /// Remove exactly one version of `key`.
    pub fn single_delete(&self, opts: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.single_delete(key);
        self.write(opts, batch)
    }

    /// Record a merge operand for `key`.
    pub fn merge(&self, opts: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        self.merge_cf(opts, DEFAULT_COLUMN_FAMILY_ID, key, value)
    }

    /// Record a merge operand for `key` in column family `cf`.
    pub fn merge_cf(
        &self,
        opts: &WriteOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf, key, value);
        self.write(opts, batch)
    }

    /// Delete every key in `[begin, end)`.
    pub fn delete_range(&self, opts: &WriteOptions, begin: &[u8], end: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_range(begin, end);
        self.write(opts, batch)
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Point lookup in the default column family.
    pub fn get(&self, ro: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_cf(ro, DEFAULT_COLUMN_FAMILY_ID, key)
    }

    /// Point lookup in column family `cf`.
    pub fn get_cf(
        &self,
        ro: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.get_cf_with_checker(ro, cf, key, None)
    }

    /// Point lookup with a transaction-layer visibility override.
    pub fn get_cf_with_checker(
        &self,
        ro: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        checker: Option<&dyn SnapshotChecker>,
    ) -> Result<Option<Vec<u8>>> {
        self.inner.get_impl(ro, cf, key, checker)
    }

    /// Newest write sequence touching `key` (any record type, including
    /// covering range tombstones), ignoring snapshots. Used by
    /// optimistic-transaction validation.
    pub fn latest_sequence_for_key(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> Result<Option<SequenceNumber>> {
        self.inner.latest_sequence_for_key(cf, key)
    }

    /// Pin the current state for repeatable reads.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(
            Arc::clone(&self.inner.snapshots),
            self.inner.last_sequence.load(AtomicOrdering::Acquire),
        )
    }

    /// The last assigned sequence number.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.inner.last_sequence.load(AtomicOrdering::Acquire)
    }

    /// Ordered iterator over the default column family.
    pub fn iter(&self, ro: &ReadOptions) -> Result<DbIterator> {
        self.iter_cf(ro, DEFAULT_COLUMN_FAMILY_ID)
    }

    /// Ordered iterator over column family `cf`.
    pub fn iter_cf(&self, ro: &ReadOptions, cf: ColumnFamilyId) -> Result<DbIterator> {
        self.inner.iter_impl(ro, cf)
    }

    // --------------------------------------------------------------------------------------------
    // Column families
    // --------------------------------------------------------------------------------------------

    /// Create a column family.
    pub fn create_column_family(
        &self,
        name: &str,
        cf_options: ColumnFamilyOptions,
    ) -> Result<ColumnFamilyHandle> {
        let mut state = self.inner.lock_state()?;
        let id = state.vset.log_and_apply_cf_add(name, cf_options.clone())?;

        let icmp = state.vset.cf(id).expect("just created").icmp.clone();
        let log_number = self.inner.lock_log()?.number;
        state
            .cfs
            .insert(id, CfState::new(Arc::new(MemTable::new(icmp, log_number))));
        if let Some(cfd) = state.vset.cf_mut(id) {
            cfd.log_number = log_number;
        }
        Ok(ColumnFamilyHandle::new(id, name.to_string()))
    }

    /// Drop a column family. The default family cannot be dropped.
    pub fn drop_column_family(&self, handle: &ColumnFamilyHandle) -> Result<()> {
        let mut state = self.inner.lock_state()?;
        state.vset.log_and_apply_cf_drop(handle.id())?;
        state.cfs.remove(&handle.id());
        self.inner.purge_obsolete_files(&mut state);
        Ok(())
    }

    /// The merge operator configured for `cf`, if any.
    pub(crate) fn cf_merge_operator(
        &self,
        cf: ColumnFamilyId,
    ) -> Result<Option<Arc<dyn crate::merge::MergeOperator>>> {
        let state = self.inner.lock_state()?;
        let cfd = state
            .vset
            .cf(cf)
            .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
        Ok(cfd.options.merge_operator.clone())
    }

    /// Handle for an existing column family.
    pub fn column_family(&self, name: &str) -> Result<ColumnFamilyHandle> {
        let state = self.inner.lock_state()?;
        let id = state
            .vset
            .cf_id_by_name(name)
            .ok_or_else(|| Status::ColumnFamilyNotFound(name.to_string()))?;
        Ok(ColumnFamilyHandle::new(id, name.to_string()))
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------------------------------

    /// Flush the default column family and wait for it to finish.
    pub fn flush(&self) -> Result<()> {
        self.flush_cf(DEFAULT_COLUMN_FAMILY_ID)
    }

    /// Flush column family `cf` and wait for it to finish.
    pub fn flush_cf(&self, cf: ColumnFamilyId) -> Result<()> {
        self.inner.switch_memtable_if_nonempty(cf)?;
        self.inner.wait_for_flush(cf)
    }

    /// Synchronously compact the key range `[begin, end]` (`None` =
    /// unbounded) of the default column family down to the bottom level.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.compact_range_cf(DEFAULT_COLUMN_FAMILY_ID, begin, end)
    }

    /// Synchronously compact a key range of column family `cf`.
    pub fn compact_range_cf(
        &self,
        cf: ColumnFamilyId,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.flush_cf(cf)?;
        self.inner.compact_range_impl(cf, begin, end)
    }

    /// Tear down as if the process died: background workers stop,
    /// nothing is flushed, the WAL stays exactly as written, and the
    /// process lock is released so the database can be reopened.
    ///
    /// Recovery replays the WAL on the next open. Writes acknowledged
    /// with `sync = true` are guaranteed to survive.
    pub fn simulate_crash(&self) -> Result<()> {
        self.inner
            .shutting_down
            .store(true, AtomicOrdering::Release);
        self.inner.work_done.notify_all();
        self.inner.stop_background_workers();

        let mut state = self.inner.lock_state()?;
        if let Some(lock) = state.lock.take() {
            self.inner.env.unlock_file(lock)?;
        }
        warn!(db = %self.inner.dbname.display(), "crash simulated; lock released");
        Ok(())
    }

    /// Unresolved two-phase-commit transactions found during recovery.
    pub fn recovered_transactions(&self) -> Vec<RecoveredTransaction> {
        match self.inner.recovered_transactions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine internals
// ------------------------------------------------------------------------------------------------

impl DbInner {
    // ---------------------------------------------------------------------
    // Lock plumbing
    // ---------------------------------------------------------------------

    /// Take the central mutex. A poisoned lock means another thread
    /// panicked mid-update; surface that as the sticky background
    /// failure it is instead of cascading the panic.
    fn lock_state(&self) -> Result<MutexGuard<'_, DbState>> {
        self.state
            .lock()
            .map_err(|_| Status::Background("database mutex poisoned".into()))
    }

    /// Take the WAL writer mutex.
    fn lock_log(&self) -> Result<MutexGuard<'_, LogState>> {
        self.log
            .lock()
            .map_err(|_| Status::Background("WAL mutex poisoned".into()))
    }

    /// Take the open-table cache mutex.
    fn lock_tables(&self) -> Result<MutexGuard<'_, HashMap<u64, Arc<Table>>>> {
        self.tables
            .lock()
            .map_err(|_| Status::Background("table cache mutex poisoned".into()))
    }

    // ---------------------------------------------------------------------
    // Recovery
    // ---------------------------------------------------------------------

    /// Replay WALs into fresh memtables, flush them to L0, start a new
    /// WAL, write a MANIFEST snapshot, and sweep obsolete files.
    fn recover_wal_and_install(self: &Arc<Self>, existed: bool) -> Result<()> {
        let mut state = self.lock_state()?;
        let state = &mut *state;

        // 1. Replay, oldest log first.
        if existed {
            let min_log = state.vset.min_log_number();
            let mut wal_numbers: Vec<u64> = self
                .env
                .list_dir(&self.dbname)?
                .iter()
                .filter_map(|name| parse_file_name(name))
                .filter(|(ty, num)| *ty == FileType::WalFile && *num >= min_log)
                .map(|(_, num)| num)
                .collect();
            wal_numbers.sort_unstable();

            for wal_number in wal_numbers {
                self.replay_one_wal(state, wal_number)?;
            }
        }

        // 2. Flush every non-empty recovery memtable straight to L0.
        let cf_ids = state.vset.cf_ids();
        for cf_id in cf_ids.clone() {
            let Some(cf_state) = state.cfs.get(&cf_id) else {
                continue;
            };
            let mem = Arc::clone(&cf_state.mem);
            if mem.is_empty() {
                continue;
            }
            let file_number = state.vset.new_file_number();
            let cfd = state.vset.cf(cf_id).expect("listed id");
            let meta = flush::build_table(
                &self.env,
                &self.dbname,
                &cfd.options,
                &self.options.rate_limiter,
                &mem,
                file_number,
            )?;
            if let Some(meta) = meta {
                let new_last = state.vset.last_sequence().max(meta.largest_seq);
                state.vset.set_last_sequence(new_last);
                let cfd = state.vset.cf_mut(cf_id).expect("listed id");
                let edit = VersionEdit {
                    column_family: cf_id,
                    new_files: vec![(0, meta)],
                    ..Default::default()
                };
                cfd.current = crate::manifest::apply_edit(&cfd.icmp, &cfd.current, &edit)?;
            }
        }

        // 3. Fresh WAL; all replayed logs are now disposable.
        let wal_number = state.vset.new_file_number();
        let wal_file = self.env.new_writable_file(&log_file_name(&self.dbname, wal_number))?;
        {
            let mut log = self.lock_log()?;
            log.writer = Some(LogWriter::new(wal_file));
            log.number = wal_number;
        }

        state.cfs.clear();
        for cf_id in cf_ids {
            let cfd = state.vset.cf_mut(cf_id).expect("listed id");
            cfd.log_number = wal_number;
            let icmp = cfd.icmp.clone();
            state
                .cfs
                .insert(cf_id, CfState::new(Arc::new(MemTable::new(icmp, wal_number))));
        }

        self.last_sequence
            .store(state.vset.last_sequence(), AtomicOrdering::Release);

        // 4. Durable snapshot of the recovered state, then the sweep.
        state.vset.write_snapshot_new_manifest()?;
        self.purge_obsolete_files(state);
        Ok(())
    }

    /// Replay one WAL segment into recovery memtables.
    fn replay_one_wal(self: &Arc<Self>, state: &mut DbState, wal_number: u64) -> Result<()> {
        let path = log_file_name(&self.dbname, wal_number);
        let file = self.env.new_sequential_file(&path)?;
        let mut reader = LogReader::new(file, ReplayMode::TolerateTornTail);

        // Memtables for families whose data in this log is not yet
        // flushed.
        let mut mems: HashMap<ColumnFamilyId, Arc<MemTable>> = HashMap::new();
        for cf_id in state.vset.cf_ids() {
            let cfd = state.vset.cf(cf_id).expect("listed id");
            if cfd.log_number > wal_number {
                continue;
            }
            let mem = state
                .cfs
                .entry(cf_id)
                .or_insert_with(|| {
                    CfState::new(Arc::new(MemTable::new(cfd.icmp.clone(), wal_number)))
                })
                .mem
                .clone();
            mems.insert(cf_id, mem);
        }

        let mut records = 0u64;
        while let Some(record) = reader.read_record()? {
            let batch = WriteBatch::from_data(record)?;
            let base_seq = batch.sequence();
            let count = batch.count() as u64;

            let mut inserter = ReplayInserter {
                inner: MemTableInserter {
                    seq: base_seq,
                    mems: &mems,
                    ignore_missing_cfs: true,
                },
                prepared: Vec::new(),
                current_prepare_start: None,
            };
            batch.iterate(&mut inserter)?;
            self.record_recovered_transactions(inserter.prepared)?;

            if count > 0 {
                let new_last = state.vset.last_sequence().max(base_seq + count - 1);
                state.vset.set_last_sequence(new_last);
            }
            records += 1;
        }

        if reader.tail_truncated() {
            warn!(wal = wal_number, "torn tail record dropped during WAL replay");
        }
        info!(wal = wal_number, records, "WAL segment replayed");
        Ok(())
    }

    fn record_recovered_transactions(&self, events: Vec<TwoPcEvent>) -> Result<()> {
        let mut recovered = self
            .recovered_transactions
            .lock()
            .map_err(|_| Status::Background("recovered transaction list poisoned".into()))?;
        for event in events {
            match event {
                TwoPcEvent::Prepared(txn) => recovered.push(txn),
                TwoPcEvent::Resolved(xid) => {
                    recovered.retain(|t| t.xid != xid);
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Background pool
    // ---------------------------------------------------------------------

    fn start_background_workers(self: &Arc<Self>) {
        let (tx, rx): (Sender<BgJob>, Receiver<BgJob>) = unbounded();
        self.bg_sender.set(tx).ok().expect("workers started twice");

        let mut handles = self
            .bg_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for worker in 0..self.options.max_background_jobs.max(1) {
            let inner = Arc::clone(self);
            let rx = rx.clone();
            handles.push(std::thread::spawn(move || {
                inner.background_worker_loop(worker, rx);
            }));
        }
    }

    fn stop_background_workers(self: &Arc<Self>) {
        let worker_count = {
            let handles = self
                .bg_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            handles.len()
        };
        if let Some(tx) = self.bg_sender.get() {
            for _ in 0..worker_count {
                let _ = tx.send(BgJob::Shutdown);
            }
        }
        let handles: Vec<_> = {
            let mut guard = self
                .bg_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn background_worker_loop(self: Arc<Self>, worker: usize, rx: Receiver<BgJob>) {
        debug!(worker, "background worker started");
        while let Ok(job) = rx.recv() {
            match job {
                BgJob::Shutdown => break,
                BgJob::Flush(cf) => self.background_flush(cf),
                BgJob::Compact(cf) => self.background_compaction(cf),
            }
        }
        debug!(worker, "background worker stopped");
    }

    /// Queue work for anything that needs it. Caller holds the mutex.
    fn maybe_schedule_work(&self, state: &mut DbState) {
        if self.shutting_down.load(AtomicOrdering::Acquire) {
            return;
        }
        let Some(tx) = self.bg_sender.get() else {
            return;
        };

        for cf_id in state.vset.cf_ids() {
            if state
                .cfs
                .get(&cf_id)
                .is_some_and(|cf| !cf.imms.is_empty())
                && state.pending_flush.insert(cf_id)
            {
                let _ = tx.send(BgJob::Flush(cf_id));
            }

            let cfd = state.vset.cf(cf_id);
            if let Some(cfd) = cfd
                && !cfd.options.disable_auto_compactions
                && self.compaction_needed(cfd)
                && state.pending_compaction.insert(cf_id)
            {
                let _ = tx.send(BgJob::Compact(cf_id));
            }
        }
    }

    fn compaction_needed(&self, cfd: &ColumnFamilyData) -> bool {
        let opts = &cfd.options;
        match opts.compaction_style {
            CompactionStyle::Level => {
                if cfd.current.num_files(0) >= opts.level0_file_num_compaction_trigger {
                    return true;
                }
                (1..opts.num_levels - 1).any(|level| {
                    cfd.current.total_file_size(level) > opts.max_bytes_for_level(level)
                })
            }
            CompactionStyle::Universal => {
                let runs = cfd.current.num_files(0)
                    + (1..opts.num_levels)
                        .filter(|&l| cfd.current.num_files(l) > 0)
                        .count();
                runs >= opts.level0_file_num_compaction_trigger
            }
            // TTL expiry is checked when a pick actually runs; scheduling
            // off the size bound alone keeps the scheduler from spinning
            // on a quiet database.
            CompactionStyle::Fifo => cfd.current.total_file_size(0) > opts.max_table_files_size,
        }
    }

    fn set_background_error(&self, state: &mut DbState, error: Status) {
        error!(error = %error, "background error latched");
        if state.bg_error.is_none() {
            state.bg_error = Some(error);
        }
        self.work_done.notify_all();
    }

    // ---------------------------------------------------------------------
    // Flush
    // ---------------------------------------------------------------------

    fn background_flush(self: &Arc<Self>, cf_id: ColumnFamilyId) {
        let result = self.flush_oldest_immutable(cf_id);
        let Ok(mut state) = self.lock_state() else {
            error!(cf = cf_id, "database mutex poisoned; flush result dropped");
            return;
        };
        state.pending_flush.remove(&cf_id);
        if let Err(e) = result {
            if !matches!(e, Status::ShuttingDown) {
                self.set_background_error(&mut state, e);
            }
        } else {
            self.work_done.notify_all();
            self.maybe_schedule_work(&mut state);
        }
    }

    /// Drain the oldest immutable memtable of `cf_id` into an L0 table.
    fn flush_oldest_immutable(self: &Arc<Self>, cf_id: ColumnFamilyId) -> Result<()> {
        loop {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                return Err(Status::ShuttingDown);
            }

            let (mem, file_number, cf_options) = {
                let mut state = self.lock_state()?;
                if let Some(e) = &state.bg_error {
                    return Err(e.clone());
                }
                let Some(cf_state) = state.cfs.get(&cf_id) else {
                    return Ok(());
                };
                let Some(mem) = cf_state.imms.first().cloned() else {
                    return Ok(());
                };
                let Some(cfd) = state.vset.cf(cf_id) else {
                    return Ok(());
                };
                let options = cfd.options.clone();
                let number = state.vset.new_file_number();
                state.pending_outputs.insert(number);
                (mem, number, options)
            };

            let build_result = flush::build_table(
                &self.env,
                &self.dbname,
                &cf_options,
                &self.options.rate_limiter,
                &mem,
                file_number,
            );

            let mut state = self.lock_state()?;
            state.pending_outputs.remove(&file_number);
            let meta = build_result?;

            // The WAL gate after dropping this memtable: the minimum
            // log still referenced by anything in memory.
            let remaining_log_gate = {
                let cf_state = state.cfs.get(&cf_id);
                let log_number = self.lock_log()?.number;
                cf_state
                    .map(|cf| {
                        cf.imms
                            .iter()
                            .skip(1)
                            .map(|m| m.log_number())
                            .chain(std::iter::once(cf.mem.log_number()))
                            .min()
                            .unwrap_or(log_number)
                    })
                    .unwrap_or(log_number)
            };

            if state.vset.cf(cf_id).is_none() {
                // The family was dropped while the table was building;
                // the output is an orphan for the sweep.
                return Ok(());
            }

            let mut edit = VersionEdit {
                column_family: cf_id,
                log_number: Some(remaining_log_gate),
                ..Default::default()
            };
            if let Some(meta) = &meta {
                let new_last = state.vset.last_sequence().max(meta.largest_seq);
                state.vset.set_last_sequence(new_last);
                edit.new_files.push((0, meta.clone()));
            }

            state.vset.log_and_apply(cf_id, &mut edit)?;

            if let Some(cf_state) = state.cfs.get_mut(&cf_id)
                && !cf_state.imms.is_empty()
            {
                cf_state.imms.remove(0);
            }

            self.last_sequence
                .store(state.vset.last_sequence(), AtomicOrdering::Release);
            self.purge_obsolete_files(&mut state);
            self.work_done.notify_all();
            self.maybe_schedule_work(&mut state);

            let more = state
                .cfs
                .get(&cf_id)
                .is_some_and(|cf| !cf.imms.is_empty());
            if !more {
                return Ok(());
            }
        }
    }

    /// Move the active memtable to the immutable list and start a new
    /// WAL segment.
    fn switch_memtable_if_nonempty(self: &Arc<Self>, cf_id: ColumnFamilyId) -> Result<()> {
        let mut state = self.lock_state()?;
        let Some(cf_state) = state.cfs.get(&cf_id) else {
            return Err(Status::ColumnFamilyNotFound(format!("id {cf_id}")));
        };
        if cf_state.mem.is_empty() {
            return Ok(());
        }
        self.switch_memtable_locked(&mut state, cf_id)?;
        self.maybe_schedule_work(&mut state);
        Ok(())
    }

    fn switch_memtable_locked(
        self: &Arc<Self>,
        state: &mut DbState,
        cf_id: ColumnFamilyId,
    ) -> Result<()> {
        let wal_number = state.vset.new_file_number();
        let wal_file = self
            .env
            .new_writable_file(&log_file_name(&self.dbname, wal_number))?;

        let icmp = state
            .vset
            .cf(cf_id)
            .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf_id}")))?
            .icmp
            .clone();

        {
            let mut log = self.lock_log()?;
            if let Some(writer) = log.writer.as_mut() {
                writer.sync()?;
            }
            log.writer = Some(LogWriter::new(wal_file));
            log.number = wal_number;
        }

        let cf_state = state.cfs.get_mut(&cf_id).expect("checked above");
        let old = std::mem::replace(
            &mut cf_state.mem,
            Arc::new(MemTable::new(icmp, wal_number)),
        );
        cf_state.imms.push(old);
        debug!(cf = cf_id, wal = wal_number, "memtable switched");
        Ok(())
    }

    /// Block until `cf_id` has no immutable memtables (or fail with the
    /// latched background error).
    fn wait_for_flush(&self, cf_id: ColumnFamilyId) -> Result<()> {
        let mut state = self.lock_state()?;
        loop {
            if let Some(e) = &state.bg_error {
                return Err(e.clone());
            }
            let pending = state
                .cfs
                .get(&cf_id)
                .is_some_and(|cf| !cf.imms.is_empty());
            if !pending {
                return Ok(());
            }
            self.maybe_schedule_work(&mut state);
            let (next, _) = self
                .work_done
                .wait_timeout(state, Duration::from_millis(100))
                .map_err(|_| Status::Background("database mutex poisoned".into()))?;
            state = next;
        }
    }

    // ---------------------------------------------------------------------
    // Group commit
    // ---------------------------------------------------------------------

    fn perform_group_write(
        self: &Arc<Self>,
        leader: &Arc<WriterHandle>,
        no_slowdown: bool,
    ) -> Result<()> {
        let room = self.make_room_for_write(no_slowdown);
        let group = self.write_queue.build_group(leader);

        let result = match room {
            Err(e) => Err(e),
            Ok(()) => self.write_group(&group),
        };

        self.write_queue.finish_group(&group, &result);
        result
    }

    fn write_group(self: &Arc<Self>, group: &[Arc<WriterHandle>]) -> Result<()> {
        // Merge the group into one WAL payload, remembering each
        // writer's base offset.
        let mut merged: Option<WriteBatch> = None;
        let mut offsets: Vec<u64> = Vec::with_capacity(group.len());
        for writer in group {
            let batch = writer
                .batch
                .lock()
                .map_err(|_| Status::corruption("writer batch lock poisoned"))?
                .take()
                .ok_or_else(|| Status::corruption("writer batch missing"))?;
            match &mut merged {
                None => {
                    offsets.push(0);
                    merged = Some(batch);
                }
                Some(m) => {
                    offsets.push(m.count() as u64);
                    m.append_batch(&batch);
                }
            }
        }
        let mut merged = merged.ok_or_else(|| Status::corruption("empty write group"))?;

        let base_seq = self.last_sequence.load(AtomicOrdering::Acquire) + 1;
        let count = merged.count() as u64;
        merged.set_sequence(base_seq);
        for (writer, offset) in group.iter().zip(&offsets) {
            writer
                .assigned_seq
                .store(base_seq + offset, AtomicOrdering::Release);
        }

        let disable_wal = group.iter().all(|w| w.disable_wal);
        let sync = group.iter().any(|w| w.sync);

        if !disable_wal {
            let mut log = self.lock_log()?;
            let writer = log
                .writer
                .as_mut()
                .ok_or_else(|| Status::corruption("WAL writer not open"))?;
            writer.add_record(merged.data())?;
            if sync {
                writer.sync()?;
            } else {
                writer.flush()?;
            }
        }

        // Snapshot the active memtables, then insert outside the mutex.
        let mems: HashMap<ColumnFamilyId, Arc<MemTable>> = {
            let state = self.lock_state()?;
            state
                .cfs
                .iter()
                .map(|(id, cf)| (*id, Arc::clone(&cf.mem)))
                .collect()
        };
        let mut inserter = MemTableInserter {
            seq: base_seq,
            mems: &mems,
            ignore_missing_cfs: false,
        };
        merged.iterate(&mut inserter)?;

        // Marker-only batches (2PC commit/rollback records) consume one
        // sequence so commit points are ordered against snapshots. That
        // sequence is attached to no key, so replay regressing past it
        // cannot collide two durable internal keys.
        let consumed = if count > 0 {
            count
        } else if merged.has_2pc_markers() {
            1
        } else {
            0
        };
        if consumed > 0 {
            let new_last = base_seq + consumed - 1;
            {
                let mut state = self.lock_state()?;
                state.vset.set_last_sequence(new_last);
            }
            self.last_sequence.store(new_last, AtomicOrdering::Release);
        }
        Ok(())
    }

    /// Apply stall rules and switch full memtables before a write.
    fn make_room_for_write(self: &Arc<Self>, no_slowdown: bool) -> Result<()> {
        let mut slowdown_applied = false;
        let mut state = self.lock_state()?;

        loop {
            if self.shutting_down.load(AtomicOrdering::Acquire) {
                return Err(Status::ShuttingDown);
            }
            if let Some(e) = &state.bg_error {
                return Err(Status::Background(e.to_string()));
            }

            // Stall triggers observe the default column family's L0.
            let (l0_files, opts) = {
                let cfd = state
                    .vset
                    .cf(DEFAULT_COLUMN_FAMILY_ID)
                    .ok_or_else(|| Status::corruption("default column family missing"))?;
                (cfd.current.num_files(0), cfd.options.clone())
            };

            if l0_files >= opts.level0_stop_writes_trigger {
                if no_slowdown {
                    return Err(Status::Busy("level-0 stop trigger reached".into()));
                }
                debug!(l0_files, "write stopped on level-0 trigger");
                self.maybe_schedule_work(&mut state);
                let (next, _) = self
                    .work_done
                    .wait_timeout(state, Duration::from_millis(100))
                    .map_err(|_| Status::Background("database mutex poisoned".into()))?;
                state = next;
                continue;
            }

            if !slowdown_applied && l0_files >= opts.level0_slowdown_writes_trigger {
                if no_slowdown {
                    return Err(Status::Busy("level-0 slowdown trigger reached".into()));
                }
                slowdown_applied = true;
                drop(state);
                std::thread::sleep(SLOWDOWN_DELAY);
                state = self.lock_state()?;
                continue;
            }

            // Memtable capacity per column family.
            let mut switched_any = false;
            let mut must_wait = false;
            for cf_id in state.vset.cf_ids() {
                let Some(cfd) = state.vset.cf(cf_id) else {
                    continue;
                };
                let write_buffer_size = cfd.options.write_buffer_size;
                let max_write_buffers = cfd.options.max_write_buffer_number;
                let Some(cf_state) = state.cfs.get(&cf_id) else {
                    continue;
                };
                if cf_state.mem.approximate_memory_usage() < write_buffer_size {
                    continue;
                }
                if cf_state.imms.len() + 1 >= max_write_buffers {
                    must_wait = true;
                    break;
                }
                self.switch_memtable_locked(&mut state, cf_id)?;
                switched_any = true;
            }

            if must_wait {
                if no_slowdown {
                    return Err(Status::Busy("immutable memtable slots full".into()));
                }
                self.maybe_schedule_work(&mut state);
                let (next, _) = self
                    .work_done
                    .wait_timeout(state, Duration::from_millis(100))
                    .map_err(|_| Status::Background("database mutex poisoned".into()))?;
                state = next;
                continue;
            }
            if switched_any {
                self.maybe_schedule_work(&mut state);
            }
            return Ok(());
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Open (or fetch) the table reader for `file_number`.
    fn table(
        &self,
        file_number: u64,
        cf_options: &ColumnFamilyOptions,
        icmp: &crate::comparator::InternalKeyComparator,
    ) -> Result<Arc<Table>> {
        {
            let tables = self.lock_tables()?;
            if let Some(table) = tables.get(&file_number) {
                return Ok(Arc::clone(table));
            }
        }

        let path = table_file_name(&self.dbname, file_number);
        let file = self.env.new_random_access_file(&path)?;
        let table = Arc::new(Table::open(
            file,
            file_number,
            icmp.clone(),
            cf_options,
            self.options.block_cache.clone(),
        )?);

        let mut tables = self.lock_tables()?;
        Ok(Arc::clone(tables.entry(file_number).or_insert(table)))
    }

    fn get_impl(
        &self,
        ro: &ReadOptions,
        cf: ColumnFamilyId,
        key: &[u8],
        checker: Option<&dyn SnapshotChecker>,
    ) -> Result<Option<Vec<u8>>> {
        let snapshot_seq = ro
            .snapshot
            .unwrap_or_else(|| self.last_sequence.load(AtomicOrdering::Acquire));
        let lkey = LookupKey::new(key, snapshot_seq);

        // Pin the read sources under the mutex, then search outside it.
        let (mems, version, cf_options, icmp, merge_operator) = {
            let state = self.lock_state()?;
            let cfd = state
                .vset
                .cf(cf)
                .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
            let cf_state = state
                .cfs
                .get(&cf)
                .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
            (
                cf_state.read_order(),
                Arc::clone(&cfd.current),
                cfd.options.clone(),
                cfd.icmp.clone(),
                cfd.options.merge_operator.clone(),
            )
        };

        let mut ctx = GetContext::new(key, snapshot_seq, merge_operator, checker);

        for mem in &mems {
            if mem.get(&lkey, &mut ctx)? {
                return ctx.finish();
            }
        }

        // L0: newest file first, every file may contain the key.
        for file in version.files(0) {
            if !file_may_contain(&icmp, file, key) {
                continue;
            }
            let table = self.table(file.number, &cf_options, &icmp)?;
            if table.get(&lkey, &mut ctx, ro)? {
                return ctx.finish();
            }
        }

        // Deeper levels: at most one candidate file per level.
        for level in 1..version.num_levels() {
            let files = version.files(level);
            if files.is_empty() {
                continue;
            }
            let idx = files.partition_point(|f| {
                icmp.compare_user_keys(extract_user_key(&f.largest), key)
                    == std::cmp::Ordering::Less
            });
            if idx >= files.len() {
                continue;
            }
            let file = &files[idx];
            if !file_may_contain(&icmp, file, key) {
                continue;
            }
            let table = self.table(file.number, &cf_options, &icmp)?;
            if table.get(&lkey, &mut ctx, ro)? {
                return ctx.finish();
            }
        }

        ctx.finish()
    }

    fn latest_sequence_for_key(
        &self,
        cf: ColumnFamilyId,
        key: &[u8],
    ) -> Result<Option<SequenceNumber>> {
        // A read at the max sequence sees the newest version of
        // everything; track the winning entry's sequence.
        let ro = ReadOptions::default();
        let snapshot_seq = crate::types::MAX_SEQUENCE_NUMBER;
        let lkey = LookupKey::new(key, snapshot_seq);

        let (mems, version, cf_options, icmp) = {
            let state = self.lock_state()?;
            let cfd = state
                .vset
                .cf(cf)
                .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
            let cf_state = state
                .cfs
                .get(&cf)
                .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
            (
                cf_state.read_order(),
                Arc::clone(&cfd.current),
                cfd.options.clone(),
                cfd.icmp.clone(),
            )
        };

        let mut best: Option<SequenceNumber> = None;
        let mut consider = |seq: SequenceNumber| {
            if best.is_none_or(|b| seq > b) {
                best = Some(seq);
            }
        };

        // Point entries: the first matching entry in any source is that
        // source's newest.
        for mem in &mems {
            let mut iter = mem.iter();
            iter.seek(lkey.internal_key());
            if iter.valid() {
                let parsed = crate::types::parse_internal_key(iter.key())?;
                if icmp.compare_user_keys(parsed.user_key, key) == std::cmp::Ordering::Equal {
                    consider(parsed.sequence);
                }
            }
            let tombs = mem.range_tombstones();
            consider_tombstones(&tombs, &icmp, key, &mut consider);
        }

        for level in 0..version.num_levels() {
            for file in version.files(level) {
                if !file_may_contain(&icmp, file, key) {
                    continue;
                }
                let table = self.table(file.number, &cf_options, &icmp)?;
                let mut iter = table.iter(&ro);
                iter.seek(lkey.internal_key());
                if iter.valid() {
                    let parsed = crate::types::parse_internal_key(iter.key())?;
                    if icmp.compare_user_keys(parsed.user_key, key) == std::cmp::Ordering::Equal
                    {
                        consider(parsed.sequence);
                    }
                }
                consider_tombstones(table.range_tombstones(), &icmp, key, &mut consider);
            }
        }

        Ok(best)
    }

    fn iter_impl(self: &Arc<Self>, ro: &ReadOptions, cf: ColumnFamilyId) -> Result<DbIterator> {
        let snapshot_seq = ro
            .snapshot
            .unwrap_or_else(|| self.last_sequence.load(AtomicOrdering::Acquire));

        let (mems, version, cf_options, icmp) = {
            let state = self.lock_state()?;
            let cfd = state
                .vset
                .cf(cf)
                .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
            let cf_state = state
                .cfs
                .get(&cf)
                .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf}")))?;
            (
                cf_state.read_order(),
                Arc::clone(&cfd.current),
                cfd.options.clone(),
                cfd.icmp.clone(),
            )
        };

        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        let mut tombstones: Vec<(Vec<u8>, Vec<u8>, SequenceNumber)> = Vec::new();

        for mem in &mems {
            children.push(Box::new(mem.iter()));
            tombstones.extend(mem.range_tombstones());
        }
        for level in 0..version.num_levels() {
            for file in version.files(level) {
                let table = self.table(file.number, &cf_options, &icmp)?;
                tombstones.extend_from_slice(table.range_tombstones());
                children.push(Box::new(table.iter(ro)));
            }
        }

        let inner = MergingIterator::new(icmp.clone(), children);
        let snapshot = Snapshot::new(Arc::clone(&self.snapshots), snapshot_seq);
        Ok(DbIterator::new(
            icmp,
            inner,
            snapshot_seq,
            cf_options.merge_operator.clone(),
            tombstones,
            cf_options.prefix_extractor.clone(),
            ro,
            snapshot,
        ))
    }

    // ---------------------------------------------------------------------
    // Compaction
    // ---------------------------------------------------------------------

    fn background_compaction(self: &Arc<Self>, cf_id: ColumnFamilyId) {
        let result = self.run_one_compaction(cf_id, None, None, false);
        let Ok(mut state) = self.lock_state() else {
            error!(cf = cf_id, "database mutex poisoned; compaction result dropped");
            return;
        };
        state.pending_compaction.remove(&cf_id);
        match result {
            Err(e) if !matches!(e, Status::ShuttingDown) => {
                self.set_background_error(&mut state, e);
            }
            _ => {
                self.work_done.notify_all();
                self.maybe_schedule_work(&mut state);
            }
        }
    }

    fn compact_range_impl(
        self: &Arc<Self>,
        cf_id: ColumnFamilyId,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        // One compaction per column family at a time: wait out any
        // scheduled background run before taking the slot.
        {
            let mut state = self.lock_state()?;
            loop {
                if self.shutting_down.load(AtomicOrdering::Acquire) {
                    return Err(Status::ShuttingDown);
                }
                if let Some(e) = &state.bg_error {
                    return Err(e.clone());
                }
                if state.pending_compaction.insert(cf_id) {
                    break;
                }
                let (next, _) = self
                    .work_done
                    .wait_timeout(state, Duration::from_millis(100))
                    .map_err(|_| Status::Background("database mutex poisoned".into()))?;
                state = next;
            }
        }

        let result = self.run_one_compaction(cf_id, begin, end, true);

        let mut state = self.lock_state()?;
        state.pending_compaction.remove(&cf_id);
        self.work_done.notify_all();
        self.maybe_schedule_work(&mut state);
        result
    }

    /// Pick and execute one compaction. `manual` forces a full-range
    /// merge regardless of triggers.
    fn run_one_compaction(
        self: &Arc<Self>,
        cf_id: ColumnFamilyId,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        manual: bool,
    ) -> Result<()> {
        let compaction = {
            let state = self.lock_state()?;
            let Some(cfd) = state.vset.cf(cf_id) else {
                return Ok(());
            };
            if manual {
                pick_manual_compaction(cfd, begin, end)
            } else {
                match cfd.options.compaction_style {
                    CompactionStyle::Level => compaction::leveled::pick(cfd),
                    CompactionStyle::Universal => compaction::universal::pick(cfd),
                    CompactionStyle::Fifo => {
                        let now = self.env.now_micros() / 1_000_000;
                        let tables = self.lock_tables()?;
                        compaction::fifo::pick(cfd, now, &|number| {
                            tables.get(&number).map(|t| t.properties().creation_time)
                        })
                    }
                }
            }
        };
        let Some(compaction) = compaction else {
            return Ok(());
        };

        match compaction.kind {
            CompactionKind::Drop => self.apply_drop_compaction(&compaction),
            CompactionKind::Merge => self.run_merge_compaction(&compaction),
        }
    }

    fn apply_drop_compaction(self: &Arc<Self>, compaction: &Compaction) -> Result<()> {
        let mut state = self.lock_state()?;
        let mut edit = VersionEdit {
            column_family: compaction.cf_id,
            ..Default::default()
        };
        for file in &compaction.inputs[0] {
            edit.deleted_files.push((compaction.start_level, file.number));
        }
        state.vset.log_and_apply(compaction.cf_id, &mut edit)?;
        info!(
            cf = compaction.cf_id,
            dropped = compaction.inputs[0].len(),
            "FIFO compaction dropped oldest files"
        );
        self.purge_obsolete_files(&mut state);
        Ok(())
    }

    fn run_merge_compaction(self: &Arc<Self>, compaction: &Compaction) -> Result<()> {
        let (cf_options, icmp) = {
            let state = self.lock_state()?;
            let Some(cfd) = state.vset.cf(compaction.cf_id) else {
                return Ok(());
            };
            (cfd.options.clone(), cfd.icmp.clone())
        };

        // Open every input table and aggregate their range tombstones.
        let mut input_tables: Vec<Arc<Table>> = Vec::new();
        let mut range_tombstones: Vec<(Vec<u8>, Vec<u8>, SequenceNumber)> = Vec::new();
        for file in compaction.all_inputs() {
            let table = self.table(file.number, &cf_options, &icmp)?;
            range_tombstones.extend_from_slice(table.range_tombstones());
            input_tables.push(table);
        }

        let iter_config = compaction::iter::CompactionIterConfig {
            icmp: icmp.clone(),
            snapshots: self.snapshots.live(),
            bottommost: compaction.bottommost,
            merge_operator: cf_options.merge_operator.clone(),
            compaction_filter: cf_options.compaction_filter.clone(),
            output_level: compaction.output_level,
            range_tombstones,
        };

        let job_ctx = compaction::job::JobContext {
            env: Arc::clone(&self.env),
            dbname: self.dbname.clone(),
            options: cf_options.clone(),
            iter_config,
            max_output_file_size: compaction.max_output_file_size,
            rate_limiter: Arc::clone(&self.options.rate_limiter),
            shutting_down: Arc::clone(&self.shutting_down),
        };

        let ro = ReadOptions::default();
        let tables_for_iter = input_tables.clone();
        let iter_icmp = icmp.clone();
        let make_input = move || -> Result<Box<dyn InternalIterator>> {
            let children: Vec<Box<dyn InternalIterator>> = tables_for_iter
                .iter()
                .map(|t| Box::new(t.iter(&ro)) as Box<dyn InternalIterator>)
                .collect();
            Ok(Box::new(MergingIterator::new(iter_icmp.clone(), children)))
        };

        let inner_for_alloc = Arc::clone(self);
        let allocated: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let allocated_for_closure = Arc::clone(&allocated);
        let alloc = move || -> Result<u64> {
            let mut state = inner_for_alloc.lock_state()?;
            let number = state.vset.new_file_number();
            state.pending_outputs.insert(number);
            allocated_for_closure
                .lock()
                .map_err(|_| Status::Background("allocation list mutex poisoned".into()))?
                .push(number);
            Ok(number)
        };

        let boundaries = self.subcompaction_boundaries(compaction, &icmp);
        let outputs = compaction::job::run(&job_ctx, &make_input, &alloc, &boundaries);

        let mut state = self.lock_state()?;
        {
            let allocated = allocated
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for number in allocated.iter() {
                state.pending_outputs.remove(number);
            }
        }
        // Any file a failed job left behind is an orphan; the next
        // sweep or recovery reclaims it.
        let outputs = outputs?;

        let mut edit = VersionEdit {
            column_family: compaction.cf_id,
            ..Default::default()
        };
        // Inputs may span levels (manual and universal compactions);
        // delete each file from the level it currently occupies.
        let input_numbers: HashSet<u64> =
            compaction.all_inputs().map(|f| f.number).collect();
        {
            let Some(cfd) = state.vset.cf(compaction.cf_id) else {
                // Dropped mid-compaction; the outputs become orphans.
                return Ok(());
            };
            for level in 0..cfd.current.num_levels() {
                for file in cfd.current.files(level) {
                    if input_numbers.contains(&file.number) {
                        edit.deleted_files.push((level, file.number));
                    }
                }
            }
        }
        for meta in &outputs {
            edit.new_files.push((compaction.output_level, meta.clone()));
            state.pending_outputs.remove(&meta.number);
        }
        if let Some((level, key)) = &compaction.compact_pointer {
            edit.compact_pointers.push((*level, key.clone()));
        }

        state.vset.log_and_apply(compaction.cf_id, &mut edit)?;

        // Drop evicted readers and sweep the replaced files. The edit
        // is already durable, so a poisoned cache only costs eviction.
        if let Ok(mut tables) = self.lock_tables() {
            for file in compaction.all_inputs() {
                tables.remove(&file.number);
            }
        }
        info!(
            cf = compaction.cf_id,
            from_level = compaction.start_level,
            to_level = compaction.output_level,
            inputs = compaction.num_input_files(),
            outputs = outputs.len(),
            "compaction installed"
        );
        self.purge_obsolete_files(&mut state);
        Ok(())
    }

    /// Split points for parallel subcompactions, taken from input file
    /// boundaries.
    fn subcompaction_boundaries(
        &self,
        compaction: &Compaction,
        icmp: &crate::comparator::InternalKeyComparator,
    ) -> Vec<Vec<u8>> {
        let max = self.options.max_subcompactions.max(1);
        if max <= 1 {
            return Vec::new();
        }

        let mut keys: Vec<Vec<u8>> = compaction
            .all_inputs()
            .map(|f| extract_user_key(&f.smallest).to_vec())
            .collect();
        keys.sort_by(|a, b| icmp.compare_user_keys(a, b));
        keys.dedup();
        if keys.len() <= 1 {
            return Vec::new();
        }

        // Drop the first boundary (it is the global start) and thin the
        // rest down to at most max - 1 split points.
        keys.remove(0);
        let want = max - 1;
        if keys.len() > want {
            let step = keys.len() / want;
            keys = keys
                .into_iter()
                .step_by(step.max(1))
                .take(want)
                .collect();
        }
        keys
    }

    // ---------------------------------------------------------------------
    // Obsolete file sweep
    // ---------------------------------------------------------------------

    /// Delete files no live Version references: old WALs, superseded
    /// MANIFESTs, orphaned tables. Best effort per file.
    fn purge_obsolete_files(&self, state: &mut DbState) {
        let live = state.vset.live_file_numbers();
        let min_log = state.vset.min_log_number();
        let Ok(current_log) = self.lock_log().map(|log| log.number) else {
            warn!("WAL mutex poisoned; skipping obsolete-file sweep");
            return;
        };
        let manifest_number = state.vset.manifest_file_number();

        let entries = match self.env.list_dir(&self.dbname) {
            Ok(entries) => entries,
            Err(e) => {
                // Losing the listing means losing GC, not correctness.
                self.set_background_error(state, e);
                return;
            }
        };

        for name in entries {
            let Some((ty, number)) = parse_file_name(&name) else {
                continue;
            };
            let keep = match ty {
                FileType::WalFile => number >= min_log || number == current_log,
                FileType::TableFile => {
                    live.contains(&number) || state.pending_outputs.contains(&number)
                }
                FileType::ManifestFile => number >= manifest_number,
                FileType::TempFile => state.pending_outputs.contains(&number),
                FileType::CurrentFile
                | FileType::LockFile
                | FileType::OptionsFile
                | FileType::BlobFile => true,
            };
            if keep {
                continue;
            }

            let path = self.dbname.join(&name);
            match self.env.remove_file(&path) {
                Ok(()) => debug!(file = %name, "obsolete file removed"),
                Err(e) => warn!(file = %name, error = %e, "obsolete file removal failed"),
            }
            if ty == FileType::TableFile
                && let Ok(mut tables) = self.lock_tables()
            {
                tables.remove(&number);
            }
        }
    }
}

/// Whether `file`'s user-key range could contain `key`.
fn file_may_contain(
    icmp: &crate::comparator::InternalKeyComparator,
    file: &FileMetaHandle,
    key: &[u8],
) -> bool {
    icmp.compare_user_keys(key, extract_user_key(&file.smallest)) != std::cmp::Ordering::Less
        && icmp.compare_user_keys(key, extract_user_key(&file.largest))
            != std::cmp::Ordering::Greater
}

fn consider_tombstones(
    tombstones: &[(Vec<u8>, Vec<u8>, SequenceNumber)],
    icmp: &crate::comparator::InternalKeyComparator,
    key: &[u8],
    consider: &mut impl FnMut(SequenceNumber),
) {
    for (start, end, seq) in tombstones {
        if icmp.compare_user_keys(start, key) != std::cmp::Ordering::Greater
            && icmp.compare_user_keys(key, end) == std::cmp::Ordering::Less
        {
            consider(*seq);
        }
    }
}

/// Manual compaction: every file overlapping `[begin, end]`, merged to
/// the deepest level.
fn pick_manual_compaction(
    cfd: &ColumnFamilyData,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Option<Compaction> {
    let output_level = cfd.options.num_levels - 1;
    let mut start_inputs = Vec::new();
    for level in 0..output_level {
        start_inputs.extend(cfd.current.overlapping_files(&cfd.icmp, level, begin, end));
    }
    let output_inputs = cfd
        .current
        .overlapping_files(&cfd.icmp, output_level, begin, end);

    if start_inputs.is_empty() && output_inputs.len() <= 1 {
        return None;
    }

    Some(Compaction {
        cf_id: cfd.id,
        kind: CompactionKind::Merge,
        start_level: 0,
        output_level,
        bottommost: true,
        inputs: [start_inputs, output_inputs],
        max_output_file_size: cfd.options.target_file_size(output_level),
        compact_pointer: None,
    })
}

// ------------------------------------------------------------------------------------------------
// Replay-time 2PC tracking
// ------------------------------------------------------------------------------------------------

enum TwoPcEvent {
    Prepared(RecoveredTransaction),
    Resolved(Vec<u8>),
}

/// Batch handler used during WAL replay: inserts like the runtime
/// inserter and records two-phase-commit markers for the transaction
/// layer.
struct ReplayInserter<'a> {
    inner: MemTableInserter<'a>,
    prepared: Vec<TwoPcEvent>,
    current_prepare_start: Option<SequenceNumber>,
}

impl BatchHandler for ReplayInserter<'_> {
    fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(cf, key, value)
    }

    fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
        self.inner.delete(cf, key)
    }

    fn single_delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
        self.inner.single_delete(cf, key)
    }

    fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.merge(cf, key, value)
    }

    fn delete_range(&mut self, cf: ColumnFamilyId, begin: &[u8], end: &[u8]) -> Result<()> {
        self.inner.delete_range(cf, begin, end)
    }

    fn mark_begin_prepare(&mut self) -> Result<()> {
        self.current_prepare_start = Some(self.inner.seq);
        Ok(())
    }

    fn mark_end_prepare(&mut self, xid: &[u8]) -> Result<()> {
        let prepare_seq = self.current_prepare_start.take().unwrap_or(self.inner.seq);
        // An empty section still spans the one sequence its markers
        // consumed at runtime.
        let end_seq = self.inner.seq.max(prepare_seq + 1);
        self.prepared.push(TwoPcEvent::Prepared(RecoveredTransaction {
            xid: xid.to_vec(),
            prepare_seq,
            end_seq,
        }));
        Ok(())
    }

    fn mark_commit(&mut self, xid: &[u8]) -> Result<()> {
        self.prepared.push(TwoPcEvent::Resolved(xid.to_vec()));
        Ok(())
    }

    fn mark_rollback(&mut self, xid: &[u8]) -> Result<()> {
        self.prepared.push(TwoPcEvent::Resolved(xid.to_vec()));
        Ok(())
    }
}
