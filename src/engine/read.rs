//! The point-lookup state machine shared by every read source.
//!
//! A `Get` consults sources newest-first: active memtable, immutable
//! memtables, then each level of the current Version. All sources feed
//! one [`GetContext`], which tracks range-tombstone coverage and merge
//! operands across source boundaries and decides when the lookup is
//! complete:
//!
//! - a `Value` entry concludes the lookup (possibly as a merge base);
//! - a `Deletion`/`SingleDeletion` concludes it as not-found (or as a
//!   nil-base merge);
//! - `Merge` operands accumulate and the search continues into older
//!   sources;
//! - a range tombstone with `tomb_seq > entry_seq` suppresses the entry
//!   and everything older.
//!
//! Two-phase-commit visibility plugs in through [`SnapshotChecker`]:
//! entries whose sequence is prepared-but-uncommitted are skipped.

use std::sync::Arc;

use crate::error::{Result, Status};
use crate::merge::MergeOperator;
use crate::types::{ParsedInternalKey, SequenceNumber, ValueType};

/// Per-entry verdict from [`GetContext::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetOutcome {
    /// The lookup concluded; stop consulting sources.
    Done,
    /// Keep walking older entries and deeper sources.
    KeepSearching,
}

/// Visibility override used by two-phase-commit reads.
pub trait SnapshotChecker: Send + Sync {
    /// Whether the entry written at `seq` is visible to a reader at
    /// `snapshot`.
    fn is_visible(&self, seq: SequenceNumber, snapshot: SequenceNumber) -> bool;
}

enum GetState {
    NotFound,
    Found(Vec<u8>),
    Deleted,
    Merging,
}

/// Accumulated state of one point lookup.
pub struct GetContext<'a> {
    user_key: &'a [u8],
    snapshot: SequenceNumber,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    snapshot_checker: Option<&'a dyn SnapshotChecker>,

    /// Largest covering range-tombstone sequence seen so far.
    max_covering_tombstone_seq: SequenceNumber,

    /// Operands collected newest-first.
    operands: Vec<Vec<u8>>,

    state: GetState,
}

impl<'a> GetContext<'a> {
    /// Start a lookup for `user_key` at `snapshot`.
    pub fn new(
        user_key: &'a [u8],
        snapshot: SequenceNumber,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        snapshot_checker: Option<&'a dyn SnapshotChecker>,
    ) -> Self {
        Self {
            user_key,
            snapshot,
            merge_operator,
            snapshot_checker,
            max_covering_tombstone_seq: 0,
            operands: Vec::new(),
            state: GetState::NotFound,
        }
    }

    /// The key being looked up.
    pub fn user_key(&self) -> &[u8] {
        self.user_key
    }

    /// Fold in a source's covering range-tombstone sequence.
    pub fn observe_range_tombstone(&mut self, seq: SequenceNumber) {
        self.max_covering_tombstone_seq = self.max_covering_tombstone_seq.max(seq);
    }

    /// Largest covering tombstone observed so far.
    pub fn max_covering_tombstone_seq(&self) -> SequenceNumber {
        self.max_covering_tombstone_seq
    }

    /// Feed one entry (same user key, `seq <= snapshot` by seek
    /// construction). Sources call this newest-to-oldest.
    pub fn process(&mut self, parsed: ParsedInternalKey<'_>, value: &[u8]) -> Result<GetOutcome> {
        if let Some(checker) = self.snapshot_checker
            && !checker.is_visible(parsed.sequence, self.snapshot)
        {
            return Ok(GetOutcome::KeepSearching);
        }

        if parsed.sequence < self.max_covering_tombstone_seq {
            // A range tombstone shadows this entry and everything older.
            self.conclude_deleted()?;
            return Ok(GetOutcome::Done);
        }

        match parsed.value_type {
            ValueType::Value => {
                if matches!(self.state, GetState::Merging) {
                    let merged = self.run_full_merge(Some(value))?;
                    self.state = GetState::Found(merged);
                } else {
                    self.state = GetState::Found(value.to_vec());
                }
                Ok(GetOutcome::Done)
            }
            ValueType::Deletion | ValueType::SingleDeletion => {
                self.conclude_deleted()?;
                Ok(GetOutcome::Done)
            }
            ValueType::Merge => {
                self.operands.push(value.to_vec());
                self.state = GetState::Merging;
                Ok(GetOutcome::KeepSearching)
            }
            other => Err(Status::corruption(format!(
                "unexpected value type {other:?} in point lookup"
            ))),
        }
    }

    fn conclude_deleted(&mut self) -> Result<()> {
        if matches!(self.state, GetState::Merging) {
            let merged = self.run_full_merge(None)?;
            self.state = GetState::Found(merged);
        } else {
            self.state = GetState::Deleted;
        }
        Ok(())
    }

    fn run_full_merge(&mut self, base: Option<&[u8]>) -> Result<Vec<u8>> {
        let operator = self
            .merge_operator
            .as_ref()
            .ok_or(Status::MergeOperatorNotSet)?;
        // Collected newest-first; the operator contract wants oldest-first.
        let mut operands = std::mem::take(&mut self.operands);
        operands.reverse();
        operator
            .full_merge(self.user_key, base, &operands)
            .ok_or_else(|| Status::corruption("merge operator failed to combine operands"))
    }

    /// Resolve the lookup after all sources were consulted.
    pub fn finish(mut self) -> Result<Option<Vec<u8>>> {
        match std::mem::replace(&mut self.state, GetState::NotFound) {
            GetState::Found(v) => Ok(Some(v)),
            GetState::Deleted | GetState::NotFound => Ok(None),
            // Operands but no base anywhere: merge onto nil.
            GetState::Merging => Ok(Some(self.run_full_merge(None)?)),
        }
    }
}
