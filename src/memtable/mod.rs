//! # Memtable Module
//!
//! The in-memory write buffer: a lock-free skip list keyed by internal
//! keys, plus a side table for range tombstones.
//!
//! ## Design Invariants
//!
//! - Entries are inserted with pre-assigned sequence numbers by the write
//!   path's leader; `add` never fails and never blocks readers.
//! - A key may have many versions; internal-key ordering puts the newest
//!   version first, so a point lookup seeks once and scans forward.
//! - Deletes are tombstone entries, never physical removal.
//! - Range tombstones logically delete `[start, end)` for every entry
//!   with a lower sequence.
//!
//! ## Lifecycle
//!
//! A memtable is created active, switched to immutable when the write
//! buffer fills, and dropped after its flush output is installed in the
//! MANIFEST. The structure itself is immutable-agnostic; the engine
//! enforces that only the active memtable receives `add` calls.
//!
//! ## Concurrency
//!
//! The skip list allows concurrent readers during writes. The write path
//! serializes appenders (the group-commit leader is the only writer), so
//! the size and sequence counters use relaxed atomics.

#[cfg(test)]
mod tests;

use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use crossbeam_skiplist::SkipMap;
use tracing::trace;

use crate::comparator::InternalKeyComparator;
use crate::engine::read::{GetContext, GetOutcome};
use crate::error::Result;
use crate::iterator::InternalIterator;
use crate::types::{
    LookupKey, SequenceNumber, ValueType, extract_tag, extract_user_key, make_internal_key,
    parse_internal_key,
};

/// Fixed per-entry overhead charged to [`MemTable::approximate_memory_usage`].
const ENTRY_OVERHEAD: usize = 24;

/// Skip-list key ordered by the column family's internal-key comparator.
///
/// Each key carries a comparator handle; the skip list itself is
/// comparator-agnostic.
struct OrdKey {
    bytes: Box<[u8]>,
    cmp: InternalKeyComparator,
}

impl OrdKey {
    fn new(bytes: Vec<u8>, cmp: &InternalKeyComparator) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
            cmp: cmp.clone(),
        }
    }
}

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp.compare(&self.bytes, &other.bytes) == std::cmp::Ordering::Equal
    }
}

impl Eq for OrdKey {}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cmp.compare(&self.bytes, &other.bytes)
    }
}

/// The in-memory multi-version write buffer of one column family.
pub struct MemTable {
    cmp: InternalKeyComparator,

    /// Point entries: internal key → value bytes.
    table: SkipMap<OrdKey, Vec<u8>>,

    /// Range tombstones: `start_key || tag(seq, RangeDeletion)` → end key.
    range_dels: SkipMap<OrdKey, Vec<u8>>,

    /// Approximate heap footprint; drives flush triggers.
    size: AtomicUsize,

    /// Number of point entries.
    num_entries: AtomicU64,

    /// Largest sequence inserted (0 when empty).
    largest_seq: AtomicU64,

    /// Smallest sequence inserted (u64::MAX when empty).
    smallest_seq: AtomicU64,

    /// WAL segment backing this memtable's entries.
    log_number: u64,
}

impl MemTable {
    /// Fresh, empty memtable backed by WAL segment `log_number`.
    pub fn new(cmp: InternalKeyComparator, log_number: u64) -> Self {
        Self {
            cmp,
            table: SkipMap::new(),
            range_dels: SkipMap::new(),
            size: AtomicUsize::new(0),
            num_entries: AtomicU64::new(0),
            largest_seq: AtomicU64::new(0),
            smallest_seq: AtomicU64::new(u64::MAX),
            log_number,
        }
    }

    /// The WAL segment whose replay would rebuild this memtable.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// The comparator this memtable orders by.
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.cmp
    }

    /// Append one entry. Never fails; sequence assignment happened
    /// upstream in the write path.
    pub fn add(&self, seq: SequenceNumber, vt: ValueType, key: &[u8], value: &[u8]) {
        trace!(seq, ?vt, key_len = key.len(), "memtable add");

        if vt == ValueType::RangeDeletion {
            self.add_range_tombstone(seq, key, value);
            return;
        }

        let ikey = make_internal_key(key, seq, vt);
        let charge = ikey.len() + value.len() + ENTRY_OVERHEAD;
        self.table
            .insert(OrdKey::new(ikey, &self.cmp), value.to_vec());

        self.size.fetch_add(charge, AtomicOrdering::Relaxed);
        self.num_entries.fetch_add(1, AtomicOrdering::Relaxed);
        self.track_seq(seq);
    }

    /// Record a range tombstone over `[start, end)`.
    pub fn add_range_tombstone(&self, seq: SequenceNumber, start: &[u8], end: &[u8]) {
        let ikey = make_internal_key(start, seq, ValueType::RangeDeletion);
        let charge = ikey.len() + end.len() + ENTRY_OVERHEAD;
        self.range_dels
            .insert(OrdKey::new(ikey, &self.cmp), end.to_vec());
        self.size.fetch_add(charge, AtomicOrdering::Relaxed);
        self.track_seq(seq);
    }

    fn track_seq(&self, seq: SequenceNumber) {
        self.largest_seq.fetch_max(seq, AtomicOrdering::Relaxed);
        self.smallest_seq.fetch_min(seq, AtomicOrdering::Relaxed);
    }

    /// Approximate heap usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }

    /// Whether any entry (point or range) has been inserted.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty() && self.range_dels.is_empty()
    }

    /// Number of point entries.
    pub fn num_entries(&self) -> u64 {
        self.num_entries.load(AtomicOrdering::Relaxed)
    }

    /// Largest sequence inserted, or 0 when empty.
    pub fn largest_sequence(&self) -> SequenceNumber {
        self.largest_seq.load(AtomicOrdering::Relaxed)
    }

    /// Smallest sequence inserted, or `u64::MAX` when empty.
    pub fn smallest_sequence(&self) -> SequenceNumber {
        self.smallest_seq.load(AtomicOrdering::Relaxed)
    }

    /// Largest sequence of any range tombstone covering `user_key` that
    /// is visible at `snapshot`, or 0 when uncovered.
    pub fn max_covering_tombstone_seq(
        &self,
        user_key: &[u8],
        snapshot: SequenceNumber,
    ) -> SequenceNumber {
        let mut max_seq = 0;
        for entry in self.range_dels.iter() {
            let start_ikey = &entry.key().bytes;
            let start = extract_user_key(start_ikey);
            if self.cmp.compare_user_keys(start, user_key) == std::cmp::Ordering::Greater {
                // Tombstones are ordered by start key; nothing further
                // can cover us.
                break;
            }
            let end = entry.value();
            if self.cmp.compare_user_keys(user_key, end) == std::cmp::Ordering::Less {
                let seq = extract_tag(start_ikey) >> 8;
                if seq <= snapshot {
                    max_seq = max_seq.max(seq);
                }
            }
        }
        max_seq
    }

    /// Snapshot of all range tombstones as `(start, end, seq)` triples.
    pub fn range_tombstones(&self) -> Vec<(Vec<u8>, Vec<u8>, SequenceNumber)> {
        self.range_dels
            .iter()
            .map(|e| {
                let ikey = &e.key().bytes;
                (
                    extract_user_key(ikey).to_vec(),
                    e.value().clone(),
                    extract_tag(ikey) >> 8,
                )
            })
            .collect()
    }

    /// Point lookup feeding the shared [`GetContext`].
    ///
    /// Returns `true` when the lookup concluded (found, deleted, or merge
    /// base reached) and deeper sources need not be consulted.
    pub fn get(&self, lkey: &LookupKey, ctx: &mut GetContext) -> Result<bool> {
        let tomb_seq = self.max_covering_tombstone_seq(lkey.user_key(), lkey.sequence());
        ctx.observe_range_tombstone(tomb_seq);

        let query = OrdKey::new(lkey.internal_key().to_vec(), &self.cmp);
        let mut cursor = self.table.lower_bound(Bound::Included(&query));

        while let Some(entry) = cursor {
            let parsed = parse_internal_key(&entry.key().bytes)?;
            if self
                .cmp
                .compare_user_keys(parsed.user_key, lkey.user_key())
                != std::cmp::Ordering::Equal
            {
                break;
            }
            match ctx.process(parsed, entry.value())? {
                GetOutcome::Done => return Ok(true),
                GetOutcome::KeepSearching => {}
            }
            cursor = entry.next();
        }
        Ok(false)
    }

    /// Ordered iterator over point entries.
    ///
    /// The iterator owns an `Arc` to the memtable and re-anchors by key,
    /// so it stays valid across concurrent inserts.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            current: None,
        }
    }
}

/// Re-anchoring cursor over a memtable's point entries.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl MemTableIterator {
    fn capture(
        &self,
        entry: Option<crossbeam_skiplist::map::Entry<'_, OrdKey, Vec<u8>>>,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        entry.map(|e| (e.key().bytes.to_vec(), e.value().clone()))
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.current = self.capture(self.mem.table.front());
    }

    fn seek_to_last(&mut self) {
        self.current = self.capture(self.mem.table.back());
    }

    fn seek(&mut self, target: &[u8]) {
        let query = OrdKey::new(target.to_vec(), &self.mem.cmp);
        self.current = self.capture(self.mem.table.lower_bound(Bound::Included(&query)));
    }

    fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        let query = OrdKey::new(key, &self.mem.cmp);
        self.current = self.capture(self.mem.table.lower_bound(Bound::Excluded(&query)));
    }

    fn prev(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        let query = OrdKey::new(key, &self.mem.cmp);
        self.current = self.capture(self.mem.table.upper_bound(Bound::Excluded(&query)));
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator invalid").0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator invalid").1
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
