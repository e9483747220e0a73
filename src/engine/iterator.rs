//! The user-facing database iterator.
//!
//! Wraps a [`MergingIterator`] over all read sources (memtables,
//! immutables, every level's files) and layers user-visible semantics on
//! top: entries newer than the read sequence are invisible, only the
//! newest visible version of each user key surfaces, deletions and
//! range-tombstone-covered keys are hidden, and merge chains are
//! resolved lazily.
//!
//! The iterator pins its Version (via the `Arc`s inside the child
//! iterators) and registers a snapshot at its read sequence so
//! compaction cannot drop versions it still needs.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::error::{Result, Status};
use crate::iterator::{InternalIterator, MergingIterator};
use crate::merge::MergeOperator;
use crate::options::ReadOptions;
use crate::prefix::PrefixExtractor;
use crate::types::{
    MAX_SEQUENCE_NUMBER, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType, make_internal_key,
    parse_internal_key,
};

use super::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Ordered cursor over the user-visible keys of one column family.
pub struct DbIterator {
    icmp: InternalKeyComparator,
    inner: MergingIterator,
    sequence: SequenceNumber,
    merge_operator: Option<Arc<dyn MergeOperator>>,

    /// Visible range tombstones `(start, end, seq)`, `seq <= sequence`.
    range_tombstones: Vec<(Vec<u8>, Vec<u8>, SequenceNumber)>,

    lower_bound: Option<Vec<u8>>,
    upper_bound: Option<Vec<u8>>,
    prefix_extractor: Option<Arc<dyn PrefixExtractor>>,
    prefix_same_as_start: bool,
    active_prefix: Option<Vec<u8>>,

    direction: Direction,
    valid: bool,
    key: Vec<u8>,
    value: Vec<u8>,
    status: Option<Status>,

    /// Keeps the read view alive for the iterator's lifetime.
    _snapshot: Snapshot,
}

impl DbIterator {
    pub(crate) fn new(
        icmp: InternalKeyComparator,
        inner: MergingIterator,
        sequence: SequenceNumber,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        mut range_tombstones: Vec<(Vec<u8>, Vec<u8>, SequenceNumber)>,
        prefix_extractor: Option<Arc<dyn PrefixExtractor>>,
        ro: &ReadOptions,
        snapshot: Snapshot,
    ) -> Self {
        range_tombstones.retain(|(_, _, seq)| *seq <= sequence);
        Self {
            icmp,
            inner,
            sequence,
            merge_operator,
            range_tombstones,
            lower_bound: ro.iterate_lower_bound.clone(),
            upper_bound: ro.iterate_upper_bound.clone(),
            prefix_extractor,
            prefix_same_as_start: ro.prefix_same_as_start,
            active_prefix: None,
            direction: Direction::Forward,
            valid: false,
            key: Vec::new(),
            value: Vec::new(),
            status: None,
            _snapshot: snapshot,
        }
    }

    /// Whether the iterator points at an entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Only valid while `valid()`.
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.key
    }

    /// Current value. Only valid while `valid()`.
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid);
        &self.value
    }

    /// First error encountered, if any.
    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(s) => Err(s.clone()),
            None => self.inner.status(),
        }
    }

    /// Position at the first visible key.
    pub fn seek_to_first(&mut self) {
        self.active_prefix = None;
        match self.lower_bound.clone() {
            Some(lower) => self.seek_internal(&lower, false),
            None => {
                self.direction = Direction::Forward;
                self.inner.seek_to_first();
                self.find_next_user_entry(None);
            }
        }
    }

    /// Position at the last visible key.
    pub fn seek_to_last(&mut self) {
        self.active_prefix = None;
        self.direction = Direction::Reverse;
        match self.upper_bound.clone() {
            Some(upper) => {
                // Upper bound is exclusive: land just before it.
                let target =
                    make_internal_key(&upper, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
                self.inner.seek(&target);
                if self.inner.valid() {
                    self.inner.prev();
                } else {
                    self.inner.seek_to_last();
                }
            }
            None => self.inner.seek_to_last(),
        }
        self.find_prev_user_entry();
    }

    /// Position at the first visible key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        let mut target = target.to_vec();
        if let Some(lower) = &self.lower_bound
            && self.icmp.compare_user_keys(&target, lower) == Ordering::Less
        {
            target = lower.clone();
        }

        if self.prefix_same_as_start {
            self.active_prefix = self
                .prefix_extractor
                .as_ref()
                .filter(|pe| pe.in_domain(&target))
                .map(|pe| pe.transform(&target).to_vec());
        } else {
            self.active_prefix = None;
        }

        self.seek_internal(&target, true)
    }

    fn seek_internal(&mut self, user_key: &[u8], _explicit: bool) {
        self.direction = Direction::Forward;
        let target = make_internal_key(user_key, self.sequence, VALUE_TYPE_FOR_SEEK);
        self.inner.seek(&target);
        self.find_next_user_entry(None);
    }

    /// Advance to the next visible user key.
    pub fn next(&mut self) {
        if !self.valid {
            return;
        }
        if self.direction == Direction::Reverse {
            // Re-anchor forward just past the current key.
            let target =
                make_internal_key(&self.key, self.sequence, VALUE_TYPE_FOR_SEEK);
            self.inner.seek(&target);
            self.direction = Direction::Forward;
        }
        let skip = self.key.clone();
        self.find_next_user_entry(Some(&skip));
    }

    /// Step back to the previous visible user key.
    pub fn prev(&mut self) {
        if !self.valid {
            return;
        }
        if self.direction == Direction::Forward {
            // Walk backwards off the current user key.
            let target =
                make_internal_key(&self.key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
            self.inner.seek(&target);
            if self.inner.valid() {
                self.inner.prev();
            } else {
                self.inner.seek_to_last();
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry();
    }

    /// Largest visible tombstone covering `(user_key, seq)`.
    fn covered_by_tombstone(&self, user_key: &[u8], seq: SequenceNumber) -> bool {
        for (start, end, tomb_seq) in &self.range_tombstones {
            if *tomb_seq > seq
                && self.icmp.compare_user_keys(start, user_key) != Ordering::Greater
                && self.icmp.compare_user_keys(user_key, end) == Ordering::Less
            {
                return true;
            }
        }
        false
    }

    fn out_of_bounds_forward(&self, user_key: &[u8]) -> bool {
        if let Some(upper) = &self.upper_bound
            && self.icmp.compare_user_keys(user_key, upper) != Ordering::Less
        {
            return true;
        }
        if let Some(prefix) = &self.active_prefix
            && let Some(pe) = &self.prefix_extractor
        {
            if !pe.in_domain(user_key) || pe.transform(user_key) != prefix.as_slice() {
                return true;
            }
        }
        false
    }

    fn out_of_bounds_reverse(&self, user_key: &[u8]) -> bool {
        if let Some(lower) = &self.lower_bound
            && self.icmp.compare_user_keys(user_key, lower) == Ordering::Less
        {
            return true;
        }
        false
    }

    /// Scan forward for the newest visible version of the next user key.
    ///
    /// `skip` hides every remaining version of that user key.
    fn find_next_user_entry(&mut self, skip: Option<&[u8]>) {
        let mut skip_key: Option<Vec<u8>> = skip.map(|k| k.to_vec());

        while self.inner.valid() {
            let parsed = match parse_internal_key(self.inner.key()) {
                Ok(p) => p,
                Err(e) => {
                    self.status = Some(e);
                    self.valid = false;
                    return;
                }
            };

            if parsed.sequence > self.sequence {
                self.inner.next();
                continue;
            }
            if self.out_of_bounds_forward(parsed.user_key) {
                self.valid = false;
                return;
            }
            if let Some(sk) = &skip_key
                && self.icmp.compare_user_keys(parsed.user_key, sk) == Ordering::Equal
            {
                self.inner.next();
                continue;
            }

            if self.covered_by_tombstone(parsed.user_key, parsed.sequence) {
                skip_key = Some(parsed.user_key.to_vec());
                self.inner.next();
                continue;
            }

            match parsed.value_type {
                ValueType::Deletion | ValueType::SingleDeletion => {
                    skip_key = Some(parsed.user_key.to_vec());
                    self.inner.next();
                }
                ValueType::Value => {
                    self.key = parsed.user_key.to_vec();
                    self.value = self.inner.value().to_vec();
                    self.valid = true;
                    return;
                }
                ValueType::Merge => {
                    let user_key = parsed.user_key.to_vec();
                    match self.resolve_merge_forward(&user_key) {
                        Ok(Some(value)) => {
                            self.key = user_key;
                            self.value = value;
                            self.valid = true;
                            return;
                        }
                        Ok(None) => {
                            skip_key = Some(user_key);
                        }
                        Err(e) => {
                            self.status = Some(e);
                            self.valid = false;
                            return;
                        }
                    }
                }
                other => {
                    self.status = Some(Status::corruption(format!(
                        "unexpected value type {other:?} in iterator"
                    )));
                    self.valid = false;
                    return;
                }
            }
        }
        self.valid = false;
    }

    /// Resolve a merge chain starting at the inner iterator's current
    /// entry (a `Merge` for `user_key`). Leaves the inner iterator on
    /// the first entry past the consumed chain.
    fn resolve_merge_forward(&mut self, user_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut operands: Vec<Vec<u8>> = vec![self.inner.value().to_vec()];
        self.inner.next();

        let mut base: Option<Vec<u8>> = None;
        while self.inner.valid() {
            let parsed = parse_internal_key(self.inner.key())?;
            if self.icmp.compare_user_keys(parsed.user_key, user_key) != Ordering::Equal {
                break;
            }
            if parsed.sequence > self.sequence {
                self.inner.next();
                continue;
            }
            if self.covered_by_tombstone(parsed.user_key, parsed.sequence) {
                // Tombstone below the operands: merge onto nil.
                break;
            }
            match parsed.value_type {
                ValueType::Merge => {
                    operands.push(self.inner.value().to_vec());
                    self.inner.next();
                }
                ValueType::Value => {
                    base = Some(self.inner.value().to_vec());
                    break;
                }
                ValueType::Deletion | ValueType::SingleDeletion => break,
                other => {
                    return Err(Status::corruption(format!(
                        "unexpected value type {other:?} under merge chain"
                    )));
                }
            }
        }

        let operator = self
            .merge_operator
            .as_ref()
            .ok_or(Status::MergeOperatorNotSet)?;
        operands.reverse();
        let merged = operator
            .full_merge(user_key, base.as_deref(), &operands)
            .ok_or_else(|| Status::corruption("merge operator failed during iteration"))?;
        Ok(Some(merged))
    }

    /// Scan backward for the newest visible version of the previous
    /// user key.
    fn find_prev_user_entry(&mut self) {
        // Walking backward visits each user key's versions oldest-first;
        // the accumulator ends holding the newest visible state.
        let mut acc = ReverseAcc::None;
        let mut operands: Vec<Vec<u8>> = Vec::new();
        let mut current_key: Option<Vec<u8>> = None;

        loop {
            if !self.inner.valid() {
                break;
            }
            let (parsed_user_key, parsed_sequence, parsed_value_type) =
                match parse_internal_key(self.inner.key()) {
                    Ok(p) => (p.user_key.to_vec(), p.sequence, p.value_type),
                    Err(e) => {
                        self.status = Some(e);
                        self.valid = false;
                        return;
                    }
                };

            if let Some(cur) = &current_key
                && self.icmp.compare_user_keys(&parsed_user_key, cur) != Ordering::Equal
            {
                // Crossed into the previous user key; resolve what we
                // gathered.
                if self.emit_reverse(&mut acc, &mut operands, cur.clone()) {
                    return;
                }
                // Hidden key: keep walking with a fresh accumulator.
                current_key = None;
            }

            if parsed_sequence > self.sequence {
                self.inner.prev();
                continue;
            }
            if self.out_of_bounds_reverse(&parsed_user_key) {
                break;
            }

            if current_key.is_none() {
                current_key = Some(parsed_user_key.clone());
                acc = ReverseAcc::None;
                operands.clear();
            }

            if self.covered_by_tombstone(&parsed_user_key, parsed_sequence) {
                acc = ReverseAcc::Deleted;
                operands.clear();
            } else {
                match parsed_value_type {
                    ValueType::Deletion | ValueType::SingleDeletion => {
                        acc = ReverseAcc::Deleted;
                        operands.clear();
                    }
                    ValueType::Value => {
                        acc = ReverseAcc::Base(self.inner.value().to_vec());
                        operands.clear();
                    }
                    ValueType::Merge => operands.push(self.inner.value().to_vec()),
                    other => {
                        self.status = Some(Status::corruption(format!(
                            "unexpected value type {other:?} in reverse scan"
                        )));
                        self.valid = false;
                        return;
                    }
                }
            }
            self.inner.prev();
        }

        // Input exhausted (or bound hit): resolve the pending key.
        if let Some(cur) = current_key
            && self.emit_reverse(&mut acc, &mut operands, cur)
        {
            return;
        }
        self.valid = false;
    }

    /// Resolve one reverse-gathered user key. Returns true when the
    /// iterator now points at a visible entry.
    fn emit_reverse(
        &mut self,
        acc: &mut ReverseAcc,
        operands: &mut Vec<Vec<u8>>,
        user_key: Vec<u8>,
    ) -> bool {
        let resolved: Option<Vec<u8>> = match (&*acc, operands.is_empty()) {
            (ReverseAcc::Base(v), true) => Some(v.clone()),
            (ReverseAcc::Deleted, true) | (ReverseAcc::None, true) => None,
            (base_or_not, false) => {
                let base = match base_or_not {
                    ReverseAcc::Base(v) => Some(v.clone()),
                    _ => None,
                };
                match &self.merge_operator {
                    None => {
                        self.status = Some(Status::MergeOperatorNotSet);
                        self.valid = false;
                        return true;
                    }
                    Some(op) => {
                        // Reverse walk gathered operands oldest-first
                        // already.
                        match op.full_merge(&user_key, base.as_deref(), operands) {
                            Some(v) => Some(v),
                            None => {
                                self.status = Some(Status::corruption(
                                    "merge operator failed during reverse iteration",
                                ));
                                self.valid = false;
                                return true;
                            }
                        }
                    }
                }
            }
        };

        *acc = ReverseAcc::None;
        operands.clear();

        match resolved {
            Some(value) => {
                self.key = user_key;
                self.value = value;
                self.valid = true;
                true
            }
            None => false,
        }
    }
}

enum ReverseAcc {
    None,
    Deleted,
    Base(Vec<u8>),
}
