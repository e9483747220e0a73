//! Merge operators — user-defined read-modify-write collapsing.
//!
//! A `Merge(key, operand)` write does not overwrite the key; it records an
//! operand that is combined with the existing value lazily, either at read
//! time or during compaction. The combining function is supplied by the
//! application as a [`MergeOperator`] trait object.
//!
//! The operator's [`MergeOperator::name`] is persisted in table properties
//! as a compatibility tag; a database written with one operator must be
//! reopened with an operator of the same name.

use std::sync::Arc;

/// User-defined associative-ish combine function for `Merge` writes.
pub trait MergeOperator: Send + Sync {
    /// Stable identity persisted on disk.
    fn name(&self) -> &str;

    /// Combine a base value (or none) with all pending operands,
    /// oldest first. Returning `None` signals a merge failure; the read
    /// or compaction surfaces a corruption error.
    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Option<Vec<u8>>;

    /// Combine two adjacent operands (`left` older than `right`) without
    /// a base value. Returning `None` means "cannot combine"; the
    /// operands are kept as-is.
    fn partial_merge(&self, _key: &[u8], _left: &[u8], _right: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// When true, compaction may apply partial merges in any grouping.
    fn associative(&self) -> bool {
        false
    }
}

/// Little-endian u64 addition operator.
///
/// Values and operands are 8-byte little-endian integers; missing base
/// values count as zero. Shorter inputs are zero-extended so that an
/// empty value behaves as 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct UInt64AddOperator;

fn decode_u64_lenient(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    let n = data.len().min(8);
    raw[..n].copy_from_slice(&data[..n]);
    u64::from_le_bytes(raw)
}

impl MergeOperator for UInt64AddOperator {
    fn name(&self) -> &str {
        "uint64add"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Option<Vec<u8>> {
        let mut sum = existing.map_or(0, decode_u64_lenient);
        for op in operands {
            sum = sum.wrapping_add(decode_u64_lenient(op));
        }
        Some(sum.to_le_bytes().to_vec())
    }

    fn partial_merge(&self, _key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        let sum = decode_u64_lenient(left).wrapping_add(decode_u64_lenient(right));
        Some(sum.to_le_bytes().to_vec())
    }

    fn associative(&self) -> bool {
        true
    }
}

/// Shared handle type used throughout the engine.
pub type MergeOperatorRef = Arc<dyn MergeOperator>;
