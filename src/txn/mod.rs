//! Transactions.
//!
//! Three flavors over the same engine:
//!
//! - [`optimistic`] — buffer writes, track a read set, validate at
//!   commit: any read key overwritten since its read fails the commit
//!   with `TransactionConflict`.
//! - [`pessimistic`] — take point locks up front through the
//!   [`lock_manager`], with FIFO wait queues, timeouts, and wait-for-
//!   graph deadlock detection.
//! - [`write_prepared`] — two-phase commit: `prepare` makes the writes
//!   durable (bracketed by `BeginPrepare … EndPrepare(xid)` markers) but
//!   invisible; `commit` records `prepare_seq → commit_seq` in a bounded
//!   commit cache consulted by every read.
//!
//! All flavors share the overlay logic here: a transaction's own
//! uncommitted batch shadows the database state for its reads.

pub mod lock_manager;
pub mod optimistic;
pub mod pessimistic;
pub mod write_prepared;

#[cfg(test)]
mod tests;

use std::time::Duration;

use crate::batch::{BatchHandler, WriteBatch};
use crate::error::Result;
use crate::merge::MergeOperator;
use crate::types::ColumnFamilyId;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Started,
    /// Durable but invisible (two-phase commit only).
    Prepared,
    /// Finished successfully.
    Committed,
    /// Discarded.
    RolledBack,
}

/// Knobs for one transaction.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// How long a pessimistic lock acquisition may wait.
    pub lock_timeout: Duration,
    /// Wall-clock lifetime; operations after it return
    /// `TransactionExpired`.
    pub expiration: Option<Duration>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(1),
            expiration: None,
        }
    }
}

/// Result of resolving a key against a transaction's own batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BatchOverlay {
    /// The batch does not touch the key.
    Untouched,
    /// The batch's final state for the key is this value.
    Value(Vec<u8>),
    /// The batch deletes the key.
    Deleted,
    /// Merge operands the batch stacks on whatever lies below,
    /// oldest first.
    Merges(Vec<Vec<u8>>),
    /// A deletion followed by merge operands: the operands combine onto
    /// a nil base regardless of what lies below.
    DeletedThenMerges(Vec<Vec<u8>>),
    /// An in-batch value followed by merge operands: the operands
    /// combine onto that value, ignoring what lies below.
    ValueThenMerges(Vec<u8>, Vec<Vec<u8>>),
}

/// Replay `batch` and resolve what it says about `(cf, key)`.
pub(crate) fn batch_overlay(
    batch: &WriteBatch,
    cf: ColumnFamilyId,
    key: &[u8],
) -> Result<BatchOverlay> {
    struct Probe<'a> {
        cf: ColumnFamilyId,
        key: &'a [u8],
        state: BatchOverlay,
    }
    impl Probe<'_> {
        fn on_write(&mut self, state: BatchOverlay) {
            self.state = state;
        }
    }
    impl BatchHandler for Probe<'_> {
        fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
            if cf == self.cf && key == self.key {
                self.on_write(BatchOverlay::Value(value.to_vec()));
            }
            Ok(())
        }
        fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
            if cf == self.cf && key == self.key {
                self.on_write(BatchOverlay::Deleted);
            }
            Ok(())
        }
        fn single_delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()> {
            if cf == self.cf && key == self.key {
                self.on_write(BatchOverlay::Deleted);
            }
            Ok(())
        }
        fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()> {
            if cf == self.cf && key == self.key {
                match &mut self.state {
                    BatchOverlay::Merges(ops)
                    | BatchOverlay::DeletedThenMerges(ops)
                    | BatchOverlay::ValueThenMerges(_, ops) => ops.push(value.to_vec()),
                    BatchOverlay::Untouched => {
                        self.state = BatchOverlay::Merges(vec![value.to_vec()]);
                    }
                    // Merge on top of an in-batch base: keep the base
                    // beside the operands so the fold happens at read
                    // time with the right nil/value anchor.
                    BatchOverlay::Value(_) | BatchOverlay::Deleted => {
                        let base = std::mem::replace(&mut self.state, BatchOverlay::Untouched);
                        self.state = match base {
                            BatchOverlay::Value(v) => {
                                BatchOverlay::ValueThenMerges(v, vec![value.to_vec()])
                            }
                            _ => BatchOverlay::DeletedThenMerges(vec![value.to_vec()]),
                        };
                    }
                }
            }
            Ok(())
        }
        fn delete_range(&mut self, cf: ColumnFamilyId, begin: &[u8], end: &[u8]) -> Result<()> {
            if cf == self.cf && begin <= self.key && self.key < end {
                self.on_write(BatchOverlay::Deleted);
            }
            Ok(())
        }
    }

    let mut probe = Probe {
        cf,
        key,
        state: BatchOverlay::Untouched,
    };
    batch.iterate(&mut probe)?;
    Ok(probe.state)
}

/// Combine an overlay with the committed value underneath it.
pub(crate) fn resolve_overlay(
    overlay: BatchOverlay,
    below: Option<Vec<u8>>,
    key: &[u8],
    operator: Option<&std::sync::Arc<dyn MergeOperator>>,
) -> Result<Option<Vec<u8>>> {
    match overlay {
        BatchOverlay::Untouched => Ok(below),
        BatchOverlay::Value(v) => Ok(Some(v)),
        BatchOverlay::Deleted => Ok(None),
        BatchOverlay::Merges(ops) => {
            let operator = operator.ok_or(crate::error::Status::MergeOperatorNotSet)?;
            operator
                .full_merge(key, below.as_deref(), &ops)
                .ok_or_else(|| {
                    crate::error::Status::corruption("merge operator failed in transaction read")
                })
                .map(Some)
        }
        BatchOverlay::DeletedThenMerges(ops) => {
            let operator = operator.ok_or(crate::error::Status::MergeOperatorNotSet)?;
            operator
                .full_merge(key, None, &ops)
                .ok_or_else(|| {
                    crate::error::Status::corruption("merge operator failed in transaction read")
                })
                .map(Some)
        }
        BatchOverlay::ValueThenMerges(base, ops) => {
            let operator = operator.ok_or(crate::error::Status::MergeOperatorNotSet)?;
            operator
                .full_merge(key, Some(&base), &ops)
                .ok_or_else(|| {
                    crate::error::Status::corruption("merge operator failed in transaction read")
                })
                .map(Some)
        }
    }
}
