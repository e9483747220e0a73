//! The compaction output state machine.
//!
//! [`CompactionIter`] consumes a merged, internal-key-ordered view of
//! the input files and yields exactly the entries the outputs should
//! contain. Versions of one user key arrive adjacent and newest-first;
//! they are processed in *snapshot stripes*: two sequences fall in the
//! same stripe when no live snapshot separates them, and within a stripe
//! only the newest version can ever be observed.
//!
//! Rules applied per user key, newest to oldest:
//!
//! - a version shadowed by a newer version in its own stripe is dropped;
//! - a version covered by a range tombstone in the same stripe is
//!   dropped;
//! - `Deletion`/`SingleDeletion` at the bottommost level is elided once
//!   no snapshot can observe it; a `SingleDeletion` meeting its matching
//!   value annihilates with it, re-exposing older versions;
//! - consecutive `Merge` operands in one stripe collapse: fully against
//!   a base value or deletion in the same stripe, partially otherwise;
//! - the user compaction filter sees only the newest version, and only
//!   when no snapshot still needs it.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::error::{Result, Status};
use crate::iterator::InternalIterator;
use crate::merge::MergeOperator;
use crate::types::{
    SequenceNumber, ValueType, make_internal_key, parse_internal_key,
};

use super::{CompactionFilter, FilterDecision};

/// Configuration of one compaction pass, shared by all subcompactions.
pub struct CompactionIterConfig {
    /// Internal-key comparator of the column family.
    pub icmp: InternalKeyComparator,
    /// Live snapshot sequences, ascending.
    pub snapshots: Vec<SequenceNumber>,
    /// True when no data below the output level overlaps the inputs.
    pub bottommost: bool,
    /// Merge operator, required to collapse `Merge` chains.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    /// Optional user filter.
    pub compaction_filter: Option<Arc<dyn CompactionFilter>>,
    /// Level the outputs land on (passed to the filter).
    pub output_level: usize,
    /// Aggregated range tombstones of all inputs: `(start, end, seq)`.
    pub range_tombstones: Vec<(Vec<u8>, Vec<u8>, SequenceNumber)>,
}

impl CompactionIterConfig {
    /// Index of the snapshot stripe containing `seq`: the number of
    /// snapshots strictly below it.
    fn stripe(&self, seq: SequenceNumber) -> usize {
        self.snapshots.partition_point(|&s| s < seq)
    }

    /// Earliest live snapshot; unbounded when none exist.
    fn earliest_snapshot(&self) -> SequenceNumber {
        self.snapshots.first().copied().unwrap_or(u64::MAX)
    }

    /// Largest tombstone sequence covering `user_key` above `seq`.
    fn covering_tombstone(&self, user_key: &[u8], seq: SequenceNumber) -> SequenceNumber {
        let mut max_seq = 0;
        for (start, end, tomb_seq) in &self.range_tombstones {
            if *tomb_seq <= seq {
                continue;
            }
            if self.icmp.compare_user_keys(start, user_key) != Ordering::Greater
                && self.icmp.compare_user_keys(user_key, end) == Ordering::Less
            {
                max_seq = max_seq.max(*tomb_seq);
            }
        }
        max_seq
    }
}

/// Streams the entries one output pass should write.
pub struct CompactionIter<'a> {
    config: &'a CompactionIterConfig,
    input: Box<dyn InternalIterator + 'a>,
    /// Exclusive user-key upper bound (subcompaction split point).
    end_key: Option<Vec<u8>>,
    /// Entries pending emission for the current user key.
    pending: Vec<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl<'a> CompactionIter<'a> {
    /// Wrap a positioned-at-start merged input.
    pub fn new(
        config: &'a CompactionIterConfig,
        mut input: Box<dyn InternalIterator + 'a>,
        start_key: Option<&[u8]>,
        end_key: Option<Vec<u8>>,
    ) -> Self {
        match start_key {
            Some(user_key) => {
                let target = make_internal_key(
                    user_key,
                    crate::types::MAX_SEQUENCE_NUMBER,
                    crate::types::VALUE_TYPE_FOR_SEEK,
                );
                input.seek(&target);
            }
            None => input.seek_to_first(),
        }
        Self {
            config,
            input,
            end_key,
            pending: Vec::new(),
            exhausted: false,
        }
    }

    /// Next output entry, or `None` when the inputs are drained.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if let Some(entry) = self.pending.pop() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.process_next_key()?;
        }
    }

    /// Gather all versions of the next user key and resolve them into
    /// `pending` (stored reversed so `pop` yields them in order).
    fn process_next_key(&mut self) -> Result<()> {
        if !self.input.valid() {
            self.input.status()?;
            self.exhausted = true;
            return Ok(());
        }

        let first_key = self.input.key().to_vec();
        let user_key = crate::types::extract_user_key(&first_key).to_vec();

        if let Some(end) = &self.end_key
            && self
                .config
                .icmp
                .compare_user_keys(&user_key, end)
                != Ordering::Less
        {
            self.exhausted = true;
            return Ok(());
        }

        // Buffer the whole version group.
        let mut group: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        while self.input.valid() {
            let key = self.input.key();
            if self
                .config
                .icmp
                .compare_user_keys(crate::types::extract_user_key(key), &user_key)
                != Ordering::Equal
            {
                break;
            }
            group.push((key.to_vec(), self.input.value().to_vec()));
            self.input.next();
        }
        self.input.status()?;

        let mut outputs = self.resolve_group(&user_key, &group)?;
        outputs.reverse();
        self.pending = outputs;
        Ok(())
    }

    fn resolve_group(
        &self,
        user_key: &[u8],
        group: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cfg = self.config;
        let mut outputs: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut last_stripe: Option<usize> = None;
        let mut i = 0;
        let mut newest_surviving = true;

        while i < group.len() {
            let (ikey, value) = &group[i];
            let parsed = parse_internal_key(ikey)?;
            let stripe = cfg.stripe(parsed.sequence);

            if last_stripe == Some(stripe) {
                // Shadowed by a newer version no snapshot distinguishes.
                i += 1;
                continue;
            }

            let tomb = cfg.covering_tombstone(user_key, parsed.sequence);
            if tomb > parsed.sequence && cfg.stripe(tomb) == stripe {
                // Range-deleted and never observable.
                last_stripe = Some(stripe);
                newest_surviving = false;
                i += 1;
                continue;
            }

            match parsed.value_type {
                ValueType::Value => {
                    let filtered = self.apply_filter(stripe, newest_surviving, user_key, value);
                    match filtered {
                        FilterDecision::Keep => outputs.push((ikey.clone(), value.clone())),
                        FilterDecision::Remove => {
                            if !(cfg.bottommost && parsed.sequence <= cfg.earliest_snapshot()) {
                                let del = make_internal_key(
                                    user_key,
                                    parsed.sequence,
                                    ValueType::Deletion,
                                );
                                outputs.push((del, Vec::new()));
                            }
                        }
                        FilterDecision::Change(new_value) => {
                            outputs.push((ikey.clone(), new_value));
                        }
                    }
                    last_stripe = Some(stripe);
                    newest_surviving = false;
                    i += 1;
                }
                ValueType::Deletion => {
                    if !(cfg.bottommost && parsed.sequence <= cfg.earliest_snapshot()) {
                        outputs.push((ikey.clone(), value.clone()));
                    }
                    last_stripe = Some(stripe);
                    newest_surviving = false;
                    i += 1;
                }
                ValueType::SingleDeletion => {
                    // Annihilate with the matching value when both sit in
                    // the same stripe; older versions re-surface.
                    let mut annihilated = false;
                    if let Some((next_ikey, _)) = group.get(i + 1) {
                        let next = parse_internal_key(next_ikey)?;
                        if next.value_type == ValueType::Value
                            && cfg.stripe(next.sequence) == stripe
                        {
                            annihilated = true;
                        }
                    }
                    if annihilated {
                        i += 2;
                        // No stripe claim: older versions stay visible,
                        // exactly as they would after both records land
                        // on disk and meet here.
                    } else {
                        if !(cfg.bottommost && parsed.sequence <= cfg.earliest_snapshot()) {
                            outputs.push((ikey.clone(), value.clone()));
                        }
                        last_stripe = Some(stripe);
                        i += 1;
                    }
                    newest_surviving = false;
                }
                ValueType::Merge => {
                    let consumed =
                        self.collapse_merges(user_key, group, i, stripe, &mut outputs)?;
                    last_stripe = Some(stripe);
                    newest_surviving = false;
                    i += consumed;
                }
                other => {
                    return Err(Status::corruption(format!(
                        "unexpected value type {other:?} in compaction input"
                    )));
                }
            }
        }
        Ok(outputs)
    }

    fn apply_filter(
        &self,
        stripe: usize,
        newest_surviving: bool,
        user_key: &[u8],
        value: &[u8],
    ) -> FilterDecision {
        let cfg = self.config;
        let Some(filter) = &cfg.compaction_filter else {
            return FilterDecision::Keep;
        };
        // Only the newest version, and only when no snapshot pins it.
        if !newest_surviving || stripe != cfg.snapshots.len() {
            return FilterDecision::Keep;
        }
        filter.filter(cfg.output_level, user_key, value)
    }

    /// Collapse the run of merge operands starting at `start`.
    ///
    /// Returns how many group entries were consumed.
    fn collapse_merges(
        &self,
        user_key: &[u8],
        group: &[(Vec<u8>, Vec<u8>)],
        start: usize,
        stripe: usize,
        outputs: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<usize> {
        let cfg = self.config;
        let operator = cfg
            .merge_operator
            .as_ref()
            .ok_or(Status::MergeOperatorNotSet)?;

        // Gather operands (newest-first) while they stay merges in this
        // stripe.
        let mut operands: Vec<&[u8]> = Vec::new();
        let mut idx = start;
        let head_ikey = &group[start].0;

        while idx < group.len() {
            let (ikey, value) = &group[idx];
            let parsed = parse_internal_key(ikey)?;
            if cfg.stripe(parsed.sequence) != stripe {
                break;
            }
            let tomb = cfg.covering_tombstone(user_key, parsed.sequence);
            if tomb > parsed.sequence && cfg.stripe(tomb) == stripe {
                // Tombstone acts as a nil base for the operands above.
                let merged = self.full_merge(operator, user_key, None, &operands)?;
                outputs.push((self.rekey_as_value(head_ikey)?, merged));
                return Ok(idx - start + 1);
            }
            match parsed.value_type {
                ValueType::Merge => {
                    operands.push(value);
                    idx += 1;
                }
                ValueType::Value => {
                    let merged =
                        self.full_merge(operator, user_key, Some(value), &operands)?;
                    outputs.push((self.rekey_as_value(head_ikey)?, merged));
                    return Ok(idx - start + 1);
                }
                ValueType::Deletion | ValueType::SingleDeletion => {
                    let merged = self.full_merge(operator, user_key, None, &operands)?;
                    outputs.push((self.rekey_as_value(head_ikey)?, merged));
                    return Ok(idx - start + 1);
                }
                other => {
                    return Err(Status::corruption(format!(
                        "unexpected value type {other:?} under merge chain"
                    )));
                }
            }
        }

        // Ran out of same-stripe entries with no base.
        if idx >= group.len() && cfg.bottommost && stripe == 0 {
            // Nothing below the output level and no older snapshot:
            // merge onto nil.
            let merged = self.full_merge(operator, user_key, None, &operands)?;
            outputs.push((self.rekey_as_value(head_ikey)?, merged));
            return Ok(idx - start);
        }

        // Keep operands, combining adjacent pairs where the operator
        // allows it.
        if operands.len() > 1 {
            let mut combined: Vec<Vec<u8>> = vec![operands[0].to_vec()];
            for op in &operands[1..] {
                let top = combined.last().expect("non-empty");
                // `op` is older than `top`.
                match operator.partial_merge(user_key, op, top) {
                    Some(merged) => {
                        *combined.last_mut().expect("non-empty") = merged;
                    }
                    None => combined.push(op.to_vec()),
                }
            }
            if combined.len() == 1 {
                outputs.push((head_ikey.clone(), combined.pop().expect("non-empty")));
                return Ok(idx - start);
            }
        }

        // Emit operands unchanged, preserving their sequences.
        for entry in group[start..idx].iter() {
            outputs.push(entry.clone());
        }
        Ok(idx - start)
    }

    fn full_merge(
        &self,
        operator: &Arc<dyn MergeOperator>,
        user_key: &[u8],
        base: Option<&[u8]>,
        operands_newest_first: &[&[u8]],
    ) -> Result<Vec<u8>> {
        let operands: Vec<Vec<u8>> = operands_newest_first
            .iter()
            .rev()
            .map(|op| op.to_vec())
            .collect();
        operator
            .full_merge(user_key, base, &operands)
            .ok_or_else(|| Status::corruption("merge operator failed during compaction"))
    }

    /// The merge head's key, retyped as a plain value.
    fn rekey_as_value(&self, merge_ikey: &[u8]) -> Result<Vec<u8>> {
        let parsed = parse_internal_key(merge_ikey)?;
        Ok(make_internal_key(
            parsed.user_key,
            parsed.sequence,
            ValueType::Value,
        ))
    }
}
