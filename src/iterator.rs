//! Internal iteration — the trait shared by memtable, block, table, and
//! merged iterators, plus the N-way merging iterator.
//!
//! An [`InternalIterator`] walks `(internal_key, value)` pairs in
//! internal-key order (user key ascending, newest version first). The
//! user-facing iterator in [`crate::engine`] layers MVCC visibility,
//! tombstone hiding, and merge resolution on top.

use std::cmp::Ordering;

use crate::comparator::InternalKeyComparator;
use crate::error::Result;

/// Cursor over internal-key entries.
///
/// All positioning methods leave the iterator either *valid* (pointing at
/// an entry) or *invalid* (exhausted); `key`/`value` may only be called
/// while valid.
pub trait InternalIterator {
    /// Whether the iterator points at an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Position at the last entry.
    fn seek_to_last(&mut self);

    /// Position at the first entry with key >= `target` (internal key).
    fn seek(&mut self, target: &[u8]);

    /// Advance to the next entry.
    fn next(&mut self);

    /// Step back to the previous entry.
    fn prev(&mut self);

    /// Current internal key. Only valid while `valid()`.
    fn key(&self) -> &[u8];

    /// Current value. Only valid while `valid()`.
    fn value(&self) -> &[u8];

    /// First error encountered, if any.
    fn status(&self) -> Result<()>;
}

/// Direction of the last relative move, used to re-anchor children when
/// the caller switches between `next` and `prev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges N child iterators into one ordered stream.
///
/// Selection is a linear scan over the children rather than a heap: the
/// child count is small (memtables + L0 files + one per deeper level) and
/// a scan keeps bidirectional iteration simple.
pub struct MergingIterator {
    cmp: InternalKeyComparator,
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    /// Merge `children`; an empty set yields an always-invalid iterator.
    pub fn new(cmp: InternalKeyComparator, children: Vec<Box<dyn InternalIterator>>) -> Self {
        Self {
            cmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match smallest {
                None => smallest = Some(i),
                Some(s) => {
                    if self.cmp.compare(child.key(), self.children[s].key()) == Ordering::Less {
                        smallest = Some(i);
                    }
                }
            }
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            match largest {
                None => largest = Some(i),
                Some(l) => {
                    if self.cmp.compare(child.key(), self.children[l].key()) == Ordering::Greater {
                        largest = Some(i);
                    }
                }
            }
        }
        self.current = largest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.direction = Direction::Reverse;
        self.find_largest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn next(&mut self) {
        let Some(cur) = self.current else { return };

        if self.direction == Direction::Reverse {
            // Re-anchor every other child just after the current key.
            let key = self.children[cur].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == cur {
                    continue;
                }
                child.seek(&key);
                if child.valid() && self.cmp.compare(child.key(), &key) == Ordering::Equal {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[self.current.expect("validated above")].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let Some(cur) = self.current else { return };

        if self.direction == Direction::Forward {
            // Re-anchor every other child just before the current key.
            let key = self.children[cur].key().to_vec();
            for (i, child) in self.children.iter_mut().enumerate() {
                if i == cur {
                    continue;
                }
                child.seek(&key);
                if child.valid() {
                    child.prev();
                } else {
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[self.current.expect("validated above")].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        let cur = self.current.expect("iterator invalid");
        self.children[cur].key()
    }

    fn value(&self) -> &[u8] {
        let cur = self.current.expect("iterator invalid");
        self.children[cur].value()
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}

/// An iterator over an in-memory list of `(internal_key, value)` pairs.
///
/// Used for range-tombstone blocks and in tests.
pub struct VecIterator {
    cmp: InternalKeyComparator,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
}

impl VecIterator {
    /// Wrap pre-sorted entries.
    pub fn new(cmp: InternalKeyComparator, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            cmp,
            entries,
            pos: None,
        }
    }
}

impl InternalIterator for VecIterator {
    fn valid(&self) -> bool {
        self.pos.is_some()
    }

    fn seek_to_first(&mut self) {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
    }

    fn seek_to_last(&mut self) {
        self.pos = self.entries.len().checked_sub(1);
    }

    fn seek(&mut self, target: &[u8]) {
        let idx = self
            .entries
            .partition_point(|(k, _)| self.cmp.compare(k, target) == Ordering::Less);
        self.pos = if idx < self.entries.len() {
            Some(idx)
        } else {
            None
        };
    }

    fn next(&mut self) {
        if let Some(p) = self.pos {
            self.pos = if p + 1 < self.entries.len() {
                Some(p + 1)
            } else {
                None
            };
        }
    }

    fn prev(&mut self) {
        if let Some(p) = self.pos {
            self.pos = p.checked_sub(1);
        }
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos.expect("iterator invalid")].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos.expect("iterator invalid")].1
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
