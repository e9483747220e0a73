//! Checksum functions for block trailers and log records.
//!
//! Four families are supported, selected per-table by
//! [`crate::options::ColumnFamilyOptions::checksum`]:
//!
//! - **CRC32C** — Castagnoli polynomial. Stored values are *masked*: the
//!   raw CRC is rotated right by 15 bits and offset by a constant, so a
//!   CRC of bytes that themselves contain CRCs stays well-distributed.
//! - **XXHash32 / XXHash64 / XXH3** — stored unmasked; the 64-bit
//!   variants are truncated to their low 32 bits.
//!
//! A block trailer checksum always covers the (possibly compressed) block
//! payload **plus** the one-byte compression-type tag that follows it.
//! From format version 6 the block's file offset is folded in as well, so
//! a block read from the wrong position fails verification even when its
//! bytes are intact.

use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh64::xxh64;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Checksum algorithm tag persisted in table footers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChecksumType {
    /// Integrity checking disabled.
    NoChecksum = 0,
    /// Masked Castagnoli CRC32.
    Crc32c = 1,
    /// XXHash 32-bit.
    XxHash = 2,
    /// XXHash 64-bit, truncated.
    XxHash64 = 3,
    /// XXH3 64-bit, truncated.
    Xxh3 = 4,
}

impl ChecksumType {
    /// Decode a footer tag byte.
    pub fn from_u8(b: u8) -> Option<ChecksumType> {
        Some(match b {
            0 => ChecksumType::NoChecksum,
            1 => ChecksumType::Crc32c,
            2 => ChecksumType::XxHash,
            3 => ChecksumType::XxHash64,
            4 => ChecksumType::Xxh3,
            _ => return None,
        })
    }
}

/// Mask a raw CRC32C for storage.
#[inline]
pub fn mask_crc(crc: u32) -> u32 {
    (crc.rotate_right(15)).wrapping_add(MASK_DELTA)
}

/// Invert [`mask_crc`].
#[inline]
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// Raw (unmasked) CRC32C over `data`.
#[inline]
pub fn crc32c(data: &[u8]) -> u32 {
    ::crc32c::crc32c(data)
}

/// Raw CRC32C of `data` extended with more bytes.
#[inline]
pub fn crc32c_extend(crc: u32, data: &[u8]) -> u32 {
    ::crc32c::crc32c_append(crc, data)
}

/// Checksum of a block payload plus its compression-type byte, in the
/// on-disk representation for `ty`.
pub fn block_checksum(ty: ChecksumType, data: &[u8], type_byte: u8) -> u32 {
    match ty {
        ChecksumType::NoChecksum => 0,
        ChecksumType::Crc32c => {
            let crc = crc32c_extend(crc32c(data), &[type_byte]);
            mask_crc(crc)
        }
        ChecksumType::XxHash => {
            let mut buf = Vec::with_capacity(data.len() + 1);
            buf.extend_from_slice(data);
            buf.push(type_byte);
            xxh32(&buf, 0)
        }
        ChecksumType::XxHash64 => {
            let mut buf = Vec::with_capacity(data.len() + 1);
            buf.extend_from_slice(data);
            buf.push(type_byte);
            xxh64(&buf, 0) as u32
        }
        ChecksumType::Xxh3 => {
            let mut buf = Vec::with_capacity(data.len() + 1);
            buf.extend_from_slice(data);
            buf.push(type_byte);
            xxh3_64(&buf) as u32
        }
    }
}

/// Offset-dependent modifier folded into block checksums from format
/// version 6. Deterministic: a fixed odd multiplier spreads the offset
/// bits, and the halves are xor-folded to 32 bits.
#[inline]
pub fn checksum_modifier_for_offset(offset: u64) -> u32 {
    let spread = offset.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    ((spread >> 32) as u32) ^ (spread as u32)
}

/// Block checksum with the context (offset) folding applied when
/// `context` is set.
pub fn block_checksum_with_context(
    ty: ChecksumType,
    data: &[u8],
    type_byte: u8,
    context: Option<u64>,
) -> u32 {
    let base = block_checksum(ty, data, type_byte);
    match (ty, context) {
        (ChecksumType::NoChecksum, _) | (_, None) => base,
        (_, Some(offset)) => base ^ checksum_modifier_for_offset(offset),
    }
}
