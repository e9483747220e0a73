//! Compaction — selecting and rewriting table files.
//!
//! Three styles are supported, chosen per column family:
//!
//! - **Leveled** ([`leveled`]) — score levels, merge a slice of the
//!   loudest level into the next one.
//! - **Universal** ([`universal`]) — merge sorted runs when their count
//!   or size amplification crosses the trigger.
//! - **FIFO** ([`fifo`]) — drop the oldest files outright once the total
//!   size or TTL bound is exceeded; never rewrites data.
//!
//! Execution ([`job`]) streams a merged view of the inputs through the
//! [`iter::CompactionIter`] state machine, which drops shadowed
//! versions, elides tombstones at the bottommost level, collapses merge
//! operands, and applies the user compaction filter — all without ever
//! changing what any live snapshot can observe.

pub mod fifo;
pub mod iter;
pub mod job;
pub mod leveled;
pub mod universal;

#[cfg(test)]
mod tests;

use crate::manifest::FileMetaHandle;
use crate::types::ColumnFamilyId;

/// Verdict of a [`CompactionFilter`] for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Keep the entry unchanged.
    Keep,
    /// Drop the entry (it becomes a deletion).
    Remove,
    /// Replace the entry's value.
    Change(Vec<u8>),
}

/// User hook consulted for every key that compaction would keep.
///
/// Only the newest visible version of a key is offered; versions
/// protected by a live snapshot are never filtered away.
pub trait CompactionFilter: Send + Sync {
    /// Stable identity (diagnostics only).
    fn name(&self) -> &str;

    /// Decide the fate of `key` at `level`.
    fn filter(&self, level: usize, key: &[u8], value: &[u8]) -> FilterDecision;
}

/// What a compaction does with its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    /// Merge the inputs into new files at `output_level`.
    Merge,
    /// Delete the inputs without rewriting (FIFO).
    Drop,
}

/// A picked compaction: which files move where.
#[derive(Debug)]
pub struct Compaction {
    /// Column family being compacted.
    pub cf_id: ColumnFamilyId,
    /// Merge or drop.
    pub kind: CompactionKind,
    /// Level the inputs come from.
    pub start_level: usize,
    /// Level the outputs land on.
    pub output_level: usize,
    /// `inputs[0]`: start-level files; `inputs[1]`: output-level files.
    pub inputs: [Vec<FileMetaHandle>; 2],
    /// Split outputs at this size.
    pub max_output_file_size: u64,
    /// New round-robin cursor to record for `start_level`.
    pub compact_pointer: Option<(usize, Vec<u8>)>,
    /// True when no data for this key range exists below
    /// `output_level`, enabling tombstone elision.
    pub bottommost: bool,
}

impl Compaction {
    /// Total number of input files.
    pub fn num_input_files(&self) -> usize {
        self.inputs[0].len() + self.inputs[1].len()
    }

    /// All input file handles, start level first.
    pub fn all_inputs(&self) -> impl Iterator<Item = &FileMetaHandle> {
        self.inputs[0].iter().chain(self.inputs[1].iter())
    }
}
