//! Snapshots — ref-counted pinned sequence numbers.
//!
//! A snapshot pins a sequence `S`; reads through it see exactly the
//! writes with `seq <= S`. The engine keeps a ref-counted multiset of
//! live snapshot sequences so compaction can tell which old versions are
//! still observable. Dropping the last handle for a sequence releases it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::types::SequenceNumber;

/// Ref-counted multiset of live snapshot sequences.
#[derive(Default)]
pub struct SnapshotList {
    inner: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `seq`, returning after incrementing its ref count.
    pub fn acquire(&self, seq: SequenceNumber) {
        let mut map = self.inner.lock().expect("snapshot list poisoned");
        *map.entry(seq).or_insert(0) += 1;
    }

    /// Release one reference on `seq`.
    pub fn release(&self, seq: SequenceNumber) {
        let mut map = self.inner.lock().expect("snapshot list poisoned");
        if let Some(count) = map.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                map.remove(&seq);
            }
        }
    }

    /// All live snapshot sequences, ascending.
    pub fn live(&self) -> Vec<SequenceNumber> {
        self.inner
            .lock()
            .expect("snapshot list poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// The oldest live snapshot, if any.
    pub fn earliest(&self) -> Option<SequenceNumber> {
        self.inner
            .lock()
            .expect("snapshot list poisoned")
            .keys()
            .next()
            .copied()
    }

    /// Whether no snapshot is live.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("snapshot list poisoned").is_empty()
    }
}

/// A pinned, consistent read view. Releases its sequence on drop.
pub struct Snapshot {
    list: Arc<SnapshotList>,
    seq: SequenceNumber,
}

impl Snapshot {
    pub(crate) fn new(list: Arc<SnapshotList>, seq: SequenceNumber) -> Self {
        list.acquire(seq);
        Self { list, seq }
    }

    /// The pinned sequence; pass as `ReadOptions::snapshot`.
    pub fn sequence(&self) -> SequenceNumber {
        self.seq
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.seq);
    }
}
