//! Write queue and group commit.
//!
//! Concurrent writers enqueue; the front writer becomes the *leader*. It
//! claims a prefix of compatible neighbors (same `disable_wal` class, no
//! 2PC-marker batches merged with anything, bounded total size),
//! concatenates their batches into one WAL record, assigns consecutive
//! sequences starting at the group's base, writes and optionally syncs
//! the WAL, inserts every op into the memtables, then wakes the group.
//!
//! Non-leaders block on the queue's condvar until the leader marks them
//! done; batches linearize by their base sequences, in WAL record order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};

use crate::batch::{BatchHandler, WriteBatch};
use crate::error::{Result, Status};
use crate::memtable::MemTable;
use crate::types::{ColumnFamilyId, SequenceNumber, ValueType};

/// Stop growing a group past this many batch bytes.
const MAX_GROUP_BYTES: usize = 1 << 20;

/// One queued write.
pub(crate) struct WriterHandle {
    /// Taken by the leader when it builds the group.
    pub batch: Mutex<Option<WriteBatch>>,
    pub sync: bool,
    pub disable_wal: bool,
    pub done: AtomicBool,
    pub status: Mutex<Option<Status>>,
    /// Base sequence the leader assigned to this writer's batch.
    pub assigned_seq: AtomicU64,
    /// Content flag mirrored out of the batch (the leader may have
    /// taken the batch by the time anyone asks).
    pub has_2pc_markers: bool,
}

impl WriterHandle {
    pub fn new(batch: WriteBatch, sync: bool, disable_wal: bool) -> Arc<Self> {
        let has_2pc_markers = batch.has_2pc_markers();
        Arc::new(Self {
            batch: Mutex::new(Some(batch)),
            sync,
            disable_wal,
            done: AtomicBool::new(false),
            status: Mutex::new(None),
            assigned_seq: AtomicU64::new(0),
            has_2pc_markers,
        })
    }

    fn finish(&self, status: Result<()>) {
        if let Err(e) = status
            && let Ok(mut slot) = self.status.lock()
        {
            *slot = Some(e);
        }
        self.done.store(true, AtomicOrdering::Release);
    }

    /// Take the recorded error, if any.
    pub fn take_status(&self) -> Result<()> {
        match self.status.lock() {
            Ok(mut slot) => match slot.take() {
                Some(e) => Err(e),
                None => Ok(()),
            },
            Err(_) => Err(Status::corruption("writer status lock poisoned")),
        }
    }
}

/// The outcome of joining the queue.
pub(crate) enum JoinOutcome {
    /// Another leader completed this write.
    Done,
    /// This writer is now the leader and must perform the group write.
    Leader,
}

/// FIFO queue of pending writers with a single condvar.
pub(crate) struct WriteQueue {
    queue: Mutex<VecDeque<Arc<WriterHandle>>>,
    cv: Condvar,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    /// Enqueue and block until done or promoted to leader.
    pub fn join(&self, writer: &Arc<WriterHandle>) -> JoinOutcome {
        let mut queue = self.queue.lock().expect("write queue poisoned");
        queue.push_back(Arc::clone(writer));

        loop {
            if writer.done.load(AtomicOrdering::Acquire) {
                return JoinOutcome::Done;
            }
            if queue
                .front()
                .is_some_and(|front| Arc::ptr_eq(front, writer))
            {
                return JoinOutcome::Leader;
            }
            queue = self.cv.wait(queue).expect("write queue poisoned");
        }
    }

    /// Claim the leader's group: a prefix of compatible writers.
    pub fn build_group(&self, leader: &Arc<WriterHandle>) -> Vec<Arc<WriterHandle>> {
        let queue = self.queue.lock().expect("write queue poisoned");
        debug_assert!(queue.front().is_some_and(|f| Arc::ptr_eq(f, leader)));

        let mut group = vec![Arc::clone(leader)];
        if leader.has_2pc_markers {
            // Marker batches travel alone: their WAL record layout is
            // scanned by transaction recovery.
            return group;
        }

        let mut size: usize = leader
            .batch
            .lock()
            .ok()
            .and_then(|b| b.as_ref().map(|b| b.approximate_size()))
            .unwrap_or(0);

        for candidate in queue.iter().skip(1) {
            if candidate.has_2pc_markers {
                break;
            }
            if candidate.disable_wal != leader.disable_wal {
                break;
            }
            if candidate.sync && !leader.sync {
                // A sync writer must not be silently downgraded.
                break;
            }
            let candidate_size = candidate
                .batch
                .lock()
                .ok()
                .and_then(|b| b.as_ref().map(|b| b.approximate_size()))
                .unwrap_or(0);
            if size + candidate_size > MAX_GROUP_BYTES {
                break;
            }
            size += candidate_size;
            group.push(Arc::clone(candidate));
        }
        group
    }

    /// Mark the group done, pop it, and promote the next leader.
    pub fn finish_group(&self, group: &[Arc<WriterHandle>], status: &Result<()>) {
        let mut queue = self.queue.lock().expect("write queue poisoned");
        for writer in group {
            debug_assert!(queue.front().is_some_and(|f| Arc::ptr_eq(f, writer)));
            queue.pop_front();
            writer.finish(status.clone());
        }
        self.cv.notify_all();
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable insertion
// ------------------------------------------------------------------------------------------------

/// Applies batch ops to the column families' active memtables,
/// assigning consecutive sequences from the batch's base.
pub(crate) struct MemTableInserter<'a> {
    /// Next sequence to assign.
    pub seq: SequenceNumber,
    /// Active memtable per column family.
    pub mems: &'a HashMap<ColumnFamilyId, Arc<MemTable>>,
    /// Replay mode: ops addressed at a dropped column family are
    /// skipped instead of failing the write.
    pub ignore_missing_cfs: bool,
}

impl MemTableInserter<'_> {
    fn mem(&self, cf: ColumnFamilyId) -> Result<Option<&Arc<MemTable>>> {
        match self.mems.get(&cf) {
            Some(mem) => Ok(Some(mem)),
            None if self.ignore_missing_cfs => Ok(None),
            None => Err(Status::ColumnFamilyNotFound(format!("id {cf}"))),
        }
    }
}

impl BatchHandler for MemTableInserter<'_> {
    fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(mem) = self.mem(cf)? {
            mem.add(self.seq, ValueType::Value, key, value);
        }
        self.seq += 1;
        Ok(())
    }

    fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
        if let Some(mem) = self.mem(cf)? {
            mem.add(self.seq, ValueType::Deletion, key, b"");
        }
        self.seq += 1;
        Ok(())
    }

    fn single_delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
        if let Some(mem) = self.mem(cf)? {
            mem.add(self.seq, ValueType::SingleDeletion, key, b"");
        }
        self.seq += 1;
        Ok(())
    }

    fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some(mem) = self.mem(cf)? {
            mem.add(self.seq, ValueType::Merge, key, value);
        }
        self.seq += 1;
        Ok(())
    }

    fn delete_range(&mut self, cf: ColumnFamilyId, begin: &[u8], end: &[u8]) -> Result<()> {
        if let Some(mem) = self.mem(cf)? {
            mem.add_range_tombstone(self.seq, begin, end);
        }
        self.seq += 1;
        Ok(())
    }

    // 2PC markers carry no memtable effect here: prepared sections are
    // inserted like plain ops (visibility is gated by the transaction
    // layer's snapshot checker), and commit/rollback bookkeeping lives
    // in the transaction layer.
}
