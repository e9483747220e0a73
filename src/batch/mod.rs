//! Write batches — the atomic unit of mutation.
//!
//! A [`WriteBatch`] is a framed byte buffer holding a header and a list
//! of operations. The same bytes are the WAL payload, so the encoding is
//! part of the on-disk format.
//!
//! # Wire format
//!
//! ```text
//! batch  := fixed64 sequence || fixed32 count || op*
//! op     :=
//!   0x00 | varslice key                          // Delete
//!   0x01 | varslice key | varslice value         // Put
//!   0x02 | varslice key | varslice value         // Merge
//!   0x03 | varslice blob                         // LogData (not counted)
//!   0x04 | varint cf | varslice key              // Delete (CF)
//!   0x05 | varint cf | varslice key | varslice v // Put (CF)
//!   0x06 | varint cf | varslice key | varslice v // Merge (CF)
//!   0x07 | varslice key                          // SingleDelete
//!   0x08 | varint cf | varslice key              // SingleDelete (CF)
//!   0x09                                         // BeginPrepare
//!   0x0A | varslice xid                          // EndPrepare
//!   0x0B | varslice xid                          // Commit
//!   0x0C | varslice xid                          // Rollback
//!   0x0D                                         // Noop
//!   0x0E | varint cf | varslice beg | varslice e // DeleteRange (CF)
//!   0x0F | varslice begin | varslice end         // DeleteRange
//! ```
//!
//! `count` covers data operations only — `LogData`, `Noop`, and the 2PC
//! markers consume no sequence numbers.
//!
//! # Save points
//!
//! [`WriteBatch::set_save_point`] snapshots the batch head;
//! [`WriteBatch::rollback_to_save_point`] truncates back to it. The
//! single-delete content flag survives a rollback: once a batch has
//! carried a `SingleDelete`, downstream consumers must keep treating it
//! as such and never downgrade the op to a plain `Delete`.

#[cfg(test)]
mod tests;

use crate::encoding::{
    decode_fixed32, decode_fixed64, get_length_prefixed_slice, get_varint32,
    put_length_prefixed_slice, put_varint32,
};
use crate::error::{Result, Status};
use crate::types::{ColumnFamilyId, DEFAULT_COLUMN_FAMILY_ID, SequenceNumber, ValueType};

/// Bytes of the `sequence || count` header.
pub const BATCH_HEADER_SIZE: usize = 12;

/// Callbacks invoked by [`WriteBatch::iterate`], one per operation.
///
/// The CF-qualified and plain variants are collapsed: plain ops arrive
/// with the default column family id.
pub trait BatchHandler {
    /// Insert or overwrite `key`.
    fn put(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()>;

    /// Point tombstone.
    fn delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()>;

    /// Remove exactly one version of `key`.
    fn single_delete(&mut self, cf: ColumnFamilyId, key: &[u8]) -> Result<()>;

    /// Record a merge operand.
    fn merge(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) -> Result<()>;

    /// Range tombstone over `[begin, end)`.
    fn delete_range(&mut self, cf: ColumnFamilyId, begin: &[u8], end: &[u8]) -> Result<()>;

    /// Opaque payload carried in the WAL; no sequence consumed.
    fn log_data(&mut self, _blob: &[u8]) {}

    /// Start of a 2PC prepare section.
    fn mark_begin_prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// End of a 2PC prepare section.
    fn mark_end_prepare(&mut self, _xid: &[u8]) -> Result<()> {
        Ok(())
    }

    /// 2PC commit marker.
    fn mark_commit(&mut self, _xid: &[u8]) -> Result<()> {
        Ok(())
    }

    /// 2PC rollback marker.
    fn mark_rollback(&mut self, _xid: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Padding marker.
    fn mark_noop(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SavePoint {
    size: usize,
    count: u32,
}

/// An ordered, atomic group of write operations.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    rep: Vec<u8>,
    save_points: Vec<SavePoint>,
    has_single_delete: bool,
    has_2pc_markers: bool,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    /// An empty batch with a zeroed header.
    pub fn new() -> Self {
        Self {
            rep: vec![0; BATCH_HEADER_SIZE],
            save_points: Vec::new(),
            has_single_delete: false,
            has_2pc_markers: false,
        }
    }

    /// Adopt previously encoded batch bytes (e.g. a WAL payload).
    pub fn from_data(data: Vec<u8>) -> Result<Self> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(Status::corruption(format!(
                "write batch shorter than header: {} bytes",
                data.len()
            )));
        }
        let mut batch = Self {
            rep: data,
            save_points: Vec::new(),
            has_single_delete: false,
            has_2pc_markers: false,
        };
        // Rebuild content flags by scanning once.
        let (single_delete, markers) = batch.scan_content_flags()?;
        batch.has_single_delete = single_delete;
        batch.has_2pc_markers = markers;
        Ok(batch)
    }

    /// The encoded representation (valid WAL payload).
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    /// Number of data operations.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..]).unwrap_or(0)
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    /// Base sequence assigned to the first data operation.
    pub fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep).unwrap_or(0)
    }

    /// Stamp the base sequence (done by the write path's leader).
    pub fn set_sequence(&mut self, seq: SequenceNumber) {
        self.rep[..8].copy_from_slice(&seq.to_le_bytes());
    }

    /// Whether the batch carries no operations at all.
    pub fn is_empty(&self) -> bool {
        self.rep.len() == BATCH_HEADER_SIZE
    }

    /// Approximate heap footprint.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// True once any `SingleDelete` was appended — sticky across
    /// save-point rollbacks.
    pub fn has_single_delete(&self) -> bool {
        self.has_single_delete
    }

    /// True when the batch carries two-phase-commit markers. Such
    /// batches are never merged with neighbors by the group-commit
    /// leader.
    pub fn has_2pc_markers(&self) -> bool {
        self.has_2pc_markers
    }

    // --------------------------------------------------------------------------------------------
    // Append operations
    // --------------------------------------------------------------------------------------------

    /// Insert or overwrite `key` in the default column family.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Insert or overwrite `key` in column family `cf`.
    pub fn put_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) {
        if cf == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(ValueType::Value as u8);
        } else {
            self.rep.push(ValueType::ColumnFamilyValue as u8);
            put_varint32(&mut self.rep, cf);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
        self.set_count(self.count() + 1);
    }

    /// Point-delete `key` in the default column family.
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Point-delete `key` in column family `cf`.
    pub fn delete_cf(&mut self, cf: ColumnFamilyId, key: &[u8]) {
        if cf == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(ValueType::Deletion as u8);
        } else {
            self.rep.push(ValueType::ColumnFamilyDeletion as u8);
            put_varint32(&mut self.rep, cf);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        self.set_count(self.count() + 1);
    }

    /// Remove exactly one version of `key`.
    pub fn single_delete(&mut self, key: &[u8]) {
        self.single_delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Remove exactly one version of `key` in column family `cf`.
    pub fn single_delete_cf(&mut self, cf: ColumnFamilyId, key: &[u8]) {
        if cf == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(ValueType::SingleDeletion as u8);
        } else {
            self.rep.push(ValueType::ColumnFamilySingleDeletion as u8);
            put_varint32(&mut self.rep, cf);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        self.has_single_delete = true;
        self.set_count(self.count() + 1);
    }

    /// Record a merge operand for `key`.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.merge_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Record a merge operand for `key` in column family `cf`.
    pub fn merge_cf(&mut self, cf: ColumnFamilyId, key: &[u8], value: &[u8]) {
        if cf == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(ValueType::Merge as u8);
        } else {
            self.rep.push(ValueType::ColumnFamilyMerge as u8);
            put_varint32(&mut self.rep, cf);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
        self.set_count(self.count() + 1);
    }

    /// Delete every key in `[begin, end)`.
    pub fn delete_range(&mut self, begin: &[u8], end: &[u8]) {
        self.delete_range_cf(DEFAULT_COLUMN_FAMILY_ID, begin, end);
    }

    /// Delete every key in `[begin, end)` in column family `cf`.
    pub fn delete_range_cf(&mut self, cf: ColumnFamilyId, begin: &[u8], end: &[u8]) {
        if cf == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(ValueType::RangeDeletion as u8);
        } else {
            self.rep.push(ValueType::ColumnFamilyRangeDeletion as u8);
            put_varint32(&mut self.rep, cf);
        }
        put_length_prefixed_slice(&mut self.rep, begin);
        put_length_prefixed_slice(&mut self.rep, end);
        self.set_count(self.count() + 1);
    }

    /// Attach an opaque blob to the WAL record; consumes no sequence.
    pub fn put_log_data(&mut self, blob: &[u8]) {
        self.rep.push(ValueType::LogData as u8);
        put_length_prefixed_slice(&mut self.rep, blob);
    }

    /// Open a 2PC prepare section.
    pub fn mark_begin_prepare(&mut self) {
        self.has_2pc_markers = true;
        self.rep.push(ValueType::BeginPrepare as u8);
    }

    /// Close a 2PC prepare section under `xid`.
    pub fn mark_end_prepare(&mut self, xid: &[u8]) {
        self.has_2pc_markers = true;
        self.rep.push(ValueType::EndPrepare as u8);
        put_length_prefixed_slice(&mut self.rep, xid);
    }

    /// Commit the prepared transaction `xid`.
    pub fn mark_commit(&mut self, xid: &[u8]) {
        self.has_2pc_markers = true;
        self.rep.push(ValueType::Commit as u8);
        put_length_prefixed_slice(&mut self.rep, xid);
    }

    /// Roll back the prepared transaction `xid`.
    pub fn mark_rollback(&mut self, xid: &[u8]) {
        self.has_2pc_markers = true;
        self.rep.push(ValueType::Rollback as u8);
        put_length_prefixed_slice(&mut self.rep, xid);
    }

    /// Append a padding marker.
    pub fn mark_noop(&mut self) {
        self.rep.push(ValueType::Noop as u8);
    }

    /// Concatenate another batch's operations (group commit).
    pub fn append_batch(&mut self, other: &WriteBatch) {
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
        self.set_count(self.count() + other.count());
        self.has_single_delete |= other.has_single_delete;
        self.has_2pc_markers |= other.has_2pc_markers;
    }

    /// Drop all operations, keeping the allocation.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
        self.save_points.clear();
        self.has_single_delete = false;
        self.has_2pc_markers = false;
    }

    // --------------------------------------------------------------------------------------------
    // Save points
    // --------------------------------------------------------------------------------------------

    /// Snapshot the current batch head.
    pub fn set_save_point(&mut self) {
        self.save_points.push(SavePoint {
            size: self.rep.len(),
            count: self.count(),
        });
    }

    /// Truncate back to the most recent save point.
    ///
    /// The single-delete flag is *not* cleared: surviving records keep
    /// their semantics.
    pub fn rollback_to_save_point(&mut self) -> Result<()> {
        let sp = self
            .save_points
            .pop()
            .ok_or_else(|| Status::invalid_argument("no save point to roll back to"))?;
        self.rep.truncate(sp.size);
        self.set_count(sp.count);
        Ok(())
    }

    /// Discard the most recent save point without rolling back.
    pub fn pop_save_point(&mut self) -> Result<()> {
        self.save_points
            .pop()
            .map(|_| ())
            .ok_or_else(|| Status::invalid_argument("no save point to pop"))
    }

    // --------------------------------------------------------------------------------------------
    // Iteration
    // --------------------------------------------------------------------------------------------

    /// Walk every operation in batch order, dispatching to `handler`.
    pub fn iterate<H: BatchHandler>(&self, handler: &mut H) -> Result<()> {
        let mut input = &self.rep[BATCH_HEADER_SIZE..];
        let mut handled: u32 = 0;

        while !input.is_empty() {
            let tag = input[0];
            input = &input[1..];
            let vt = ValueType::from_u8(tag)
                .ok_or_else(|| Status::corruption(format!("unknown batch tag 0x{tag:02x}")))?;

            match vt {
                ValueType::Value | ValueType::ColumnFamilyValue => {
                    let cf = if vt == ValueType::ColumnFamilyValue {
                        read_cf(&mut input)?
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let key = read_slice(&mut input, "put key")?;
                    let value = read_slice(&mut input, "put value")?;
                    handler.put(cf, key, value)?;
                    handled += 1;
                }
                ValueType::Deletion | ValueType::ColumnFamilyDeletion => {
                    let cf = if vt == ValueType::ColumnFamilyDeletion {
                        read_cf(&mut input)?
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let key = read_slice(&mut input, "delete key")?;
                    handler.delete(cf, key)?;
                    handled += 1;
                }
                ValueType::SingleDeletion | ValueType::ColumnFamilySingleDeletion => {
                    let cf = if vt == ValueType::ColumnFamilySingleDeletion {
                        read_cf(&mut input)?
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let key = read_slice(&mut input, "single-delete key")?;
                    handler.single_delete(cf, key)?;
                    handled += 1;
                }
                ValueType::Merge | ValueType::ColumnFamilyMerge => {
                    let cf = if vt == ValueType::ColumnFamilyMerge {
                        read_cf(&mut input)?
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let key = read_slice(&mut input, "merge key")?;
                    let value = read_slice(&mut input, "merge operand")?;
                    handler.merge(cf, key, value)?;
                    handled += 1;
                }
                ValueType::RangeDeletion | ValueType::ColumnFamilyRangeDeletion => {
                    let cf = if vt == ValueType::ColumnFamilyRangeDeletion {
                        read_cf(&mut input)?
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let begin = read_slice(&mut input, "range-delete begin")?;
                    let end = read_slice(&mut input, "range-delete end")?;
                    handler.delete_range(cf, begin, end)?;
                    handled += 1;
                }
                ValueType::LogData => {
                    let blob = read_slice(&mut input, "log data")?;
                    handler.log_data(blob);
                }
                ValueType::BeginPrepare => handler.mark_begin_prepare()?,
                ValueType::EndPrepare => {
                    let xid = read_slice(&mut input, "end-prepare xid")?;
                    handler.mark_end_prepare(xid)?;
                }
                ValueType::Commit => {
                    let xid = read_slice(&mut input, "commit xid")?;
                    handler.mark_commit(xid)?;
                }
                ValueType::Rollback => {
                    let xid = read_slice(&mut input, "rollback xid")?;
                    handler.mark_rollback(xid)?;
                }
                ValueType::Noop => handler.mark_noop()?,
            }
        }

        if handled != self.count() {
            return Err(Status::corruption(format!(
                "batch count mismatch: header says {}, found {}",
                self.count(),
                handled
            )));
        }
        Ok(())
    }

    fn scan_content_flags(&self) -> Result<(bool, bool)> {
        struct Probe {
            single_delete: bool,
            markers: bool,
        }
        impl BatchHandler for Probe {
            fn put(&mut self, _: ColumnFamilyId, _: &[u8], _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn delete(&mut self, _: ColumnFamilyId, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn single_delete(&mut self, _: ColumnFamilyId, _: &[u8]) -> Result<()> {
                self.single_delete = true;
                Ok(())
            }
            fn merge(&mut self, _: ColumnFamilyId, _: &[u8], _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn delete_range(&mut self, _: ColumnFamilyId, _: &[u8], _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn mark_begin_prepare(&mut self) -> Result<()> {
                self.markers = true;
                Ok(())
            }
            fn mark_end_prepare(&mut self, _: &[u8]) -> Result<()> {
                self.markers = true;
                Ok(())
            }
            fn mark_commit(&mut self, _: &[u8]) -> Result<()> {
                self.markers = true;
                Ok(())
            }
            fn mark_rollback(&mut self, _: &[u8]) -> Result<()> {
                self.markers = true;
                Ok(())
            }
        }
        let mut probe = Probe {
            single_delete: false,
            markers: false,
        };
        self.iterate(&mut probe)?;
        Ok((probe.single_delete, probe.markers))
    }
}

fn read_cf(input: &mut &[u8]) -> Result<ColumnFamilyId> {
    let (cf, n) =
        get_varint32(input).ok_or_else(|| Status::corruption("truncated column family id"))?;
    *input = &input[n..];
    Ok(cf)
}

fn read_slice<'a>(input: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    let (slice, n) = get_length_prefixed_slice(input)
        .ok_or_else(|| Status::corruption(format!("truncated {what}")))?;
    *input = &input[n..];
    Ok(slice)
}
