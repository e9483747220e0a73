//! Core value types: sequence numbers, record types, and internal keys.
//!
//! Every write is stamped with a monotonically increasing 64-bit sequence
//! number and a record type, packed into the last 8 bytes of an *internal
//! key*:
//!
//! ```text
//! internal_key = user_key || fixed64_le(sequence << 8 | type)
//! ```
//!
//! Internal keys order by user key ascending (configured comparator) and,
//! within one user key, by the packed trailer **descending** — the newest
//! version of a key always sorts first.

use crate::error::{Result, Status};

/// Monotonic 64-bit write ordering stamp, global across column families.
pub type SequenceNumber = u64;

/// Largest representable sequence number (56 bits; the low 8 bits of the
/// packed trailer hold the record type).
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Byte length of the packed `(sequence, type)` trailer.
pub const INTERNAL_KEY_TRAILER_SIZE: usize = 8;

/// Record type stored in the low byte of an internal-key trailer.
///
/// The numeric values are part of the on-disk format (write batches, WAL,
/// SSTs) and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    /// Point tombstone.
    Deletion = 0x00,
    /// Plain value.
    Value = 0x01,
    /// Merge operand.
    Merge = 0x02,
    /// Opaque log payload; never applied to the memtable.
    LogData = 0x03,
    /// Column-family-qualified point tombstone.
    ColumnFamilyDeletion = 0x04,
    /// Column-family-qualified value.
    ColumnFamilyValue = 0x05,
    /// Column-family-qualified merge operand.
    ColumnFamilyMerge = 0x06,
    /// Single-delete: removes exactly one version.
    SingleDeletion = 0x07,
    /// Column-family-qualified single-delete.
    ColumnFamilySingleDeletion = 0x08,
    /// Start of a two-phase-commit prepare section.
    BeginPrepare = 0x09,
    /// End of a prepare section, carrying the transaction XID.
    EndPrepare = 0x0A,
    /// Two-phase-commit commit marker.
    Commit = 0x0B,
    /// Two-phase-commit rollback marker.
    Rollback = 0x0C,
    /// Padding record; ignored on replay.
    Noop = 0x0D,
    /// Column-family-qualified range tombstone.
    ColumnFamilyRangeDeletion = 0x0E,
    /// Range tombstone deleting `[start, end)`.
    RangeDeletion = 0x0F,
}

/// Record type used when building a seek target: for a fixed sequence it
/// packs to the largest trailer, so a seek lands on the first entry with
/// `seq <= snapshot`.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::RangeDeletion;

impl ValueType {
    /// Decode a type byte, rejecting unknown values.
    pub fn from_u8(b: u8) -> Option<ValueType> {
        Some(match b {
            0x00 => ValueType::Deletion,
            0x01 => ValueType::Value,
            0x02 => ValueType::Merge,
            0x03 => ValueType::LogData,
            0x04 => ValueType::ColumnFamilyDeletion,
            0x05 => ValueType::ColumnFamilyValue,
            0x06 => ValueType::ColumnFamilyMerge,
            0x07 => ValueType::SingleDeletion,
            0x08 => ValueType::ColumnFamilySingleDeletion,
            0x09 => ValueType::BeginPrepare,
            0x0A => ValueType::EndPrepare,
            0x0B => ValueType::Commit,
            0x0C => ValueType::Rollback,
            0x0D => ValueType::Noop,
            0x0E => ValueType::ColumnFamilyRangeDeletion,
            0x0F => ValueType::RangeDeletion,
            _ => return None,
        })
    }
}

/// Pack a sequence number and record type into the 64-bit trailer.
#[inline]
pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

/// Append `user_key || fixed64_le(seq << 8 | type)` to `buf`.
pub fn append_internal_key(buf: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_sequence_and_type(seq, t).to_le_bytes());
}

/// Build a fresh internal key.
pub fn make_internal_key(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_SIZE);
    append_internal_key(&mut buf, user_key, seq, t);
    buf
}

/// The user-key prefix of an internal key.
#[inline]
pub fn extract_user_key(ikey: &[u8]) -> &[u8] {
    debug_assert!(ikey.len() >= INTERNAL_KEY_TRAILER_SIZE);
    &ikey[..ikey.len() - INTERNAL_KEY_TRAILER_SIZE]
}

/// The packed `(sequence, type)` trailer of an internal key.
#[inline]
pub fn extract_tag(ikey: &[u8]) -> u64 {
    debug_assert!(ikey.len() >= INTERNAL_KEY_TRAILER_SIZE);
    let n = ikey.len();
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&ikey[n - INTERNAL_KEY_TRAILER_SIZE..]);
    u64::from_le_bytes(raw)
}

/// A borrowed, decoded view of an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user-visible key bytes.
    pub user_key: &'a [u8],
    /// Write ordering stamp.
    pub sequence: SequenceNumber,
    /// Record type.
    pub value_type: ValueType,
}

/// Split an internal key into its parts, rejecting malformed input.
pub fn parse_internal_key(ikey: &[u8]) -> Result<ParsedInternalKey<'_>> {
    if ikey.len() < INTERNAL_KEY_TRAILER_SIZE {
        return Err(Status::corruption(format!(
            "internal key too short: {} bytes",
            ikey.len()
        )));
    }
    let tag = extract_tag(ikey);
    let value_type = ValueType::from_u8((tag & 0xFF) as u8)
        .ok_or_else(|| Status::corruption(format!("unknown value type 0x{:02x}", tag & 0xFF)))?;
    Ok(ParsedInternalKey {
        user_key: extract_user_key(ikey),
        sequence: tag >> 8,
        value_type,
    })
}

/// Seek target for a point lookup: internal key positioned at the newest
/// entry visible at `sequence`.
#[derive(Debug, Clone)]
pub struct LookupKey {
    ikey: Vec<u8>,
}

impl LookupKey {
    /// Build a lookup key for `user_key` at snapshot `sequence`.
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        Self {
            ikey: make_internal_key(user_key, sequence, VALUE_TYPE_FOR_SEEK),
        }
    }

    /// Full internal key for seeking within memtables and tables.
    pub fn internal_key(&self) -> &[u8] {
        &self.ikey
    }

    /// The user key portion.
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.ikey)
    }

    /// The snapshot sequence this lookup reads at.
    pub fn sequence(&self) -> SequenceNumber {
        extract_tag(&self.ikey) >> 8
    }
}

/// Identifier of a column family. The default column family is id 0.
pub type ColumnFamilyId = u32;

/// Id of the default column family.
pub const DEFAULT_COLUMN_FAMILY_ID: ColumnFamilyId = 0;

/// Name of the default column family.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";
