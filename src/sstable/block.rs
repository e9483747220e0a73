//! Data/index block building and reading.
//!
//! A block is a sequence of prefix-compressed entries followed by restart
//! offsets:
//!
//! ```text
//! entry   := varint32 shared || varint32 non_shared || varint32 value_len
//!            || key[shared..] || value
//! block   := entry* || fixed32 restart[num_restarts] || fixed32 num_restarts
//! ```
//!
//! Every `restart_interval` entries the key is stored whole and its
//! offset recorded, giving binary search targets and bounded key
//! reconstruction cost.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::InternalKeyComparator;
use crate::encoding::{common_prefix_len, decode_fixed32, get_varint32, put_fixed32, put_varint32};
use crate::error::{Result, Status};
use crate::iterator::InternalIterator;

/// Builds one block from sorted `add` calls.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    /// Builder with a restart point every `restart_interval` entries.
    pub fn new(restart_interval: usize) -> Self {
        Self {
            restart_interval: restart_interval.max(1),
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    /// Append an entry. Keys must arrive in non-decreasing order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);

        let shared = if self.counter < self.restart_interval {
            common_prefix_len(&self.last_key, key)
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Append restart offsets and their count; returns the block payload.
    pub fn finish(&mut self) -> &[u8] {
        for &restart in &self.restarts {
            put_fixed32(&mut self.buffer, restart);
        }
        put_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        &self.buffer
    }

    /// Bytes the finished block would occupy.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    /// Whether any entry has been added.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Prepare for the next block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }
}

/// An immutable, parsed block.
pub struct Block {
    data: Vec<u8>,
    /// Offset of the restart array.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Adopt decompressed block bytes, validating the restart trailer.
    pub fn new(data: Vec<u8>) -> Result<Block> {
        if data.len() < 4 {
            return Err(Status::corruption("block too small for restart count"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..])
            .ok_or_else(|| Status::corruption("unreadable restart count"))?;
        let trailer = num_restarts as usize * 4 + 4;
        if trailer > data.len() {
            return Err(Status::corruption(format!(
                "restart array ({num_restarts} entries) exceeds block size {}",
                data.len()
            )));
        }
        let restart_offset = data.len() - trailer;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Bytes held by this block (charge for the block cache).
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn restart_point(&self, index: u32) -> usize {
        let off = self.restart_offset + index as usize * 4;
        decode_fixed32(&self.data[off..]).unwrap_or(0) as usize
    }

    /// Decode every entry sequentially.
    ///
    /// Used for meta blocks (metaindex, properties, range deletions)
    /// whose keys are raw strings rather than internal keys, so
    /// comparator-driven iteration does not apply.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        let mut last_key: Vec<u8> = Vec::new();

        while pos < self.restart_offset {
            let (shared, n) = get_varint32(&self.data[pos..])
                .ok_or_else(|| Status::corruption("bad meta entry: shared length"))?;
            pos += n;
            let (non_shared, n) = get_varint32(&self.data[pos..])
                .ok_or_else(|| Status::corruption("bad meta entry: non-shared length"))?;
            pos += n;
            let (value_len, n) = get_varint32(&self.data[pos..])
                .ok_or_else(|| Status::corruption("bad meta entry: value length"))?;
            pos += n;

            let (shared, non_shared, value_len) =
                (shared as usize, non_shared as usize, value_len as usize);
            if shared > last_key.len() || pos + non_shared + value_len > self.restart_offset {
                return Err(Status::corruption("meta entry exceeds block"));
            }

            last_key.truncate(shared);
            last_key.extend_from_slice(&self.data[pos..pos + non_shared]);
            pos += non_shared;
            let value = self.data[pos..pos + value_len].to_vec();
            pos += value_len;

            out.push((last_key.clone(), value));
        }
        Ok(out)
    }

    /// Cursor over this block.
    pub fn iter(self: &Arc<Self>, cmp: InternalKeyComparator) -> BlockIter {
        BlockIter {
            block: Arc::clone(self),
            cmp,
            current: self.restart_offset,
            restart_index: 0,
            key: Vec::new(),
            value_start: 0,
            value_len: 0,
            status: None,
        }
    }
}

/// Iterator over one block's entries.
pub struct BlockIter {
    block: Arc<Block>,
    cmp: InternalKeyComparator,
    /// Offset of the current entry; `restart_offset` means invalid.
    current: usize,
    restart_index: u32,
    key: Vec<u8>,
    value_start: usize,
    value_len: usize,
    status: Option<Status>,
}

impl BlockIter {
    fn data(&self) -> &[u8] {
        &self.block.data
    }

    fn mark_corrupt(&mut self, what: &str) {
        self.status = Some(Status::corruption(format!("bad block entry: {what}")));
        self.current = self.block.restart_offset;
        self.key.clear();
    }

    /// Offset just past the current entry.
    fn next_entry_offset(&self) -> usize {
        self.value_start + self.value_len
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.restart_index = index;
        self.key.clear();
        let offset = self.block.restart_point(index);
        // An empty value marker: parse_next_entry starts from here.
        self.value_start = offset;
        self.value_len = 0;
    }

    /// Decode the entry at `next_entry_offset`; false at block end.
    fn parse_next_entry(&mut self) -> bool {
        let offset = self.next_entry_offset();
        if offset >= self.block.restart_offset {
            self.current = self.block.restart_offset;
            return false;
        }

        let data = &self.block.data;
        let mut pos = offset;

        let Some((shared, n)) = get_varint32(&data[pos..]) else {
            self.mark_corrupt("shared length");
            return false;
        };
        pos += n;
        let Some((non_shared, n)) = get_varint32(&data[pos..]) else {
            self.mark_corrupt("non-shared length");
            return false;
        };
        pos += n;
        let Some((value_len, n)) = get_varint32(&data[pos..]) else {
            self.mark_corrupt("value length");
            return false;
        };
        pos += n;

        let (shared, non_shared, value_len) =
            (shared as usize, non_shared as usize, value_len as usize);
        if shared > self.key.len() || pos + non_shared + value_len > self.block.restart_offset {
            self.mark_corrupt("entry exceeds block");
            return false;
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&data[pos..pos + non_shared]);
        self.current = offset;
        self.value_start = pos + non_shared;
        self.value_len = value_len;

        // Keep restart_index in step for prev().
        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) <= self.current
        {
            self.restart_index += 1;
        }
        true
    }

    /// Key stored whole at restart point `index`.
    fn restart_key(&self, index: u32) -> Option<&[u8]> {
        let offset = self.block.restart_point(index);
        let data = &self.block.data;
        let mut pos = offset;
        let (_shared, n) = get_varint32(&data[pos..])?;
        pos += n;
        let (non_shared, n) = get_varint32(&data[pos..])?;
        pos += n;
        let (_value_len, n) = get_varint32(&data[pos..])?;
        pos += n;
        data.get(pos..pos + non_shared as usize)
    }
}

impl InternalIterator for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.block.num_restarts == 0 {
            self.current = self.block.restart_offset;
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek_to_last(&mut self) {
        if self.block.num_restarts == 0 {
            self.current = self.block.restart_offset;
            return;
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_entry() && self.next_entry_offset() < self.block.restart_offset {}
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.num_restarts == 0 {
            self.current = self.block.restart_offset;
            return;
        }

        // Binary search: rightmost restart with key < target.
        let mut left = 0u32;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            let below = self
                .restart_key(mid)
                .map(|key| self.cmp.compare(key, target) == Ordering::Less);
            match below {
                Some(true) => left = mid,
                Some(false) => right = mid - 1,
                None => {
                    self.mark_corrupt("restart key");
                    return;
                }
            }
        }

        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        let original = self.current;

        // Back up to the restart point strictly before the current entry.
        let mut restart = self.restart_index;
        while self.block.restart_point(restart) >= original {
            if restart == 0 {
                self.current = self.block.restart_offset;
                self.key.clear();
                return;
            }
            restart -= 1;
        }

        self.seek_to_restart_point(restart);
        // Scan forward to the entry just before `original`.
        while self.parse_next_entry() && self.next_entry_offset() < original {}
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.data()[self.value_start..self.value_start + self.value_len]
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            Some(s) => Err(s.clone()),
            None => Ok(()),
        }
    }
}
