//! Sorted String Table (SSTable) module — the block-based table format.
//!
//! An SSTable is an immutable, sorted file of internal-key entries. All
//! multi-byte integers are little-endian; handles are varint-encoded.
//!
//! # On-disk layout
//!
//! ```text
//! [data block 1]
//! [data block 2]
//! ...
//! [filter block]          (optional full bloom filter)
//! [range-deletion block]  (optional)
//! [properties block]
//! [metaindex block]       (entries sorted by name)
//! [index block]
//! [footer]
//! ```
//!
//! Every block is followed by a 5-byte trailer: `u8 compression_type ||
//! u32 checksum`, the checksum covering the stored block bytes plus the
//! type byte (plus the block's offset from format version 6).
//!
//! The footer comes in two shapes:
//!
//! - **version 0 (legacy)** — `metaindex handle || index handle`, padded
//!   to 40 bytes, then the 8-byte legacy magic. 48 bytes total.
//! - **version 1+** — `u8 checksum_type || metaindex handle || index
//!   handle`, padded to 41 bytes, then `u32 format_version` and the
//!   8-byte magic. 53 bytes total.
//!
//! # Sub-modules
//!
//! - [`block`] — prefix-compressed block builder and iterator.
//! - [`filter`] — full-filter bloom blocks.
//! - [`builder`] — [`TableBuilder`], writes a complete table.
//! - [`reader`] — [`Table`], point gets and ordered iteration.

pub mod block;
pub mod builder;
pub mod filter;
pub mod reader;

#[cfg(test)]
mod tests;

pub use builder::{TableBuilder, TableProperties};
pub use reader::{Table, TableIterator};

use std::io::Write;

use crate::encoding::checksum::block_checksum_with_context;
use crate::encoding::{ChecksumType, get_varint64, put_varint64};
use crate::env::RandomAccessFile;
use crate::error::{Result, Status};
use crate::options::CompressionType;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Magic number closing every v1+ footer.
pub const TABLE_MAGIC_NUMBER: u64 = 0x88e241b785f4cff7;

/// Magic number of the legacy (version 0) footer.
pub const LEGACY_TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

/// `compression_type (1) || checksum (4)` after every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Encoded size of the legacy footer.
pub const LEGACY_FOOTER_LENGTH: usize = 48;

/// Encoded size of the v1+ footer.
pub const FOOTER_LENGTH: usize = 53;

/// Metaindex key of the filter block.
pub const FILTER_BLOCK_NAME: &str = "filter.rocksdb.BuiltinBloomFilter";

/// Metaindex key of the properties block.
pub const PROPERTIES_BLOCK_NAME: &str = "rocksdb.properties";

/// Metaindex key of the range-deletion block.
pub const RANGE_DEL_BLOCK_NAME: &str = "rocksdb.range_del";

/// Little-endian u32 from the first four bytes of a length-checked
/// slice.
#[inline]
fn read_le32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

// ------------------------------------------------------------------------------------------------
// Block handle
// ------------------------------------------------------------------------------------------------

/// Location of a block inside the file: varint offset + varint size.
/// The size excludes the 5-byte trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    /// Byte offset of the block's first byte.
    pub offset: u64,
    /// Stored (possibly compressed) payload length, trailer excluded.
    pub size: u64,
}

impl BlockHandle {
    /// Worst-case encoded length (two varint64s).
    pub const MAX_ENCODED_LENGTH: usize = 20;

    /// Append the varint encoding.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint64(buf, self.offset);
        put_varint64(buf, self.size);
    }

    /// Encoded bytes as an owned buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decode from the front of `buf`, returning the consumed length.
    pub fn decode_from(buf: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, n1) =
            get_varint64(buf).ok_or_else(|| Status::corruption("bad block handle offset"))?;
        let (size, n2) = get_varint64(&buf[n1..])
            .ok_or_else(|| Status::corruption("bad block handle size"))?;
        Ok((BlockHandle { offset, size }, n1 + n2))
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// Fixed-size tail of a table file.
#[derive(Debug, Clone)]
pub struct Footer {
    /// Checksum function used for every block trailer in the file.
    pub checksum: ChecksumType,
    /// Handle of the metaindex block.
    pub metaindex: BlockHandle,
    /// Handle of the index block.
    pub index: BlockHandle,
    /// Table format version; 0 selects the legacy layout.
    pub format_version: u32,
}

impl Footer {
    /// Encode in the layout selected by `format_version`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_LENGTH);
        if self.format_version == 0 {
            self.metaindex.encode_to(&mut buf);
            self.index.encode_to(&mut buf);
            buf.resize(LEGACY_FOOTER_LENGTH - 8, 0);
            buf.extend_from_slice(&(LEGACY_TABLE_MAGIC_NUMBER as u32).to_le_bytes());
            buf.extend_from_slice(&((LEGACY_TABLE_MAGIC_NUMBER >> 32) as u32).to_le_bytes());
        } else {
            buf.push(self.checksum as u8);
            self.metaindex.encode_to(&mut buf);
            self.index.encode_to(&mut buf);
            buf.resize(FOOTER_LENGTH - 12, 0);
            buf.extend_from_slice(&self.format_version.to_le_bytes());
            buf.extend_from_slice(&(TABLE_MAGIC_NUMBER as u32).to_le_bytes());
            buf.extend_from_slice(&((TABLE_MAGIC_NUMBER >> 32) as u32).to_le_bytes());
        }
        buf
    }

    /// Decode from the last bytes of a file. `tail` must hold at least
    /// the final [`FOOTER_LENGTH`] bytes (or the whole file if shorter).
    pub fn decode(tail: &[u8]) -> Result<Footer> {
        if tail.len() < LEGACY_FOOTER_LENGTH {
            return Err(Status::corruption("file too short for a footer"));
        }

        let tail_len = tail.len();
        let magic_lo = read_le32(&tail[tail_len - 8..]);
        let magic_hi = read_le32(&tail[tail_len - 4..]);
        let magic = (magic_hi as u64) << 32 | magic_lo as u64;

        if magic == LEGACY_TABLE_MAGIC_NUMBER {
            let body = &tail[tail.len() - LEGACY_FOOTER_LENGTH..tail.len() - 8];
            let (metaindex, n) = BlockHandle::decode_from(body)?;
            let (index, _) = BlockHandle::decode_from(&body[n..])?;
            return Ok(Footer {
                checksum: ChecksumType::Crc32c,
                metaindex,
                index,
                format_version: 0,
            });
        }

        if magic == TABLE_MAGIC_NUMBER {
            if tail.len() < FOOTER_LENGTH {
                return Err(Status::corruption("file too short for a v1+ footer"));
            }
            let body = &tail[tail.len() - FOOTER_LENGTH..];
            let checksum = ChecksumType::from_u8(body[0]).ok_or_else(|| {
                Status::corruption(format!("unknown footer checksum type {}", body[0]))
            })?;
            let (metaindex, n) = BlockHandle::decode_from(&body[1..])?;
            let (index, _) = BlockHandle::decode_from(&body[1 + n..])?;
            let format_version = read_le32(&body[FOOTER_LENGTH - 12..]);
            if format_version == 0 {
                return Err(Status::corruption("v1+ footer carries format version 0"));
            }
            return Ok(Footer {
                checksum,
                metaindex,
                index,
                format_version,
            });
        }

        Err(Status::corruption(format!(
            "bad table magic number 0x{magic:016x}"
        )))
    }
}

// ------------------------------------------------------------------------------------------------
// Block compression
// ------------------------------------------------------------------------------------------------

/// Compress a block payload. Falls back to raw storage when compression
/// does not shrink the payload; the returned tag reflects the bytes
/// actually stored.
pub fn compress_block(
    ty: CompressionType,
    data: &[u8],
    format_version: u32,
) -> Result<(Vec<u8>, CompressionType)> {
    let compressed = match ty {
        CompressionType::None => return Ok((data.to_vec(), CompressionType::None)),
        CompressionType::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Status::corruption(format!("snappy compression failed: {e}")))?,
        CompressionType::Zlib => {
            // Raw deflate: no zlib wrapper bytes.
            let mut out = Vec::new();
            if format_version >= 2 {
                put_varint64(&mut out, data.len() as u64);
            }
            let mut encoder =
                flate2::write::DeflateEncoder::new(out, flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        }
        CompressionType::Lz4 | CompressionType::Lz4hc => {
            let mut out = Vec::new();
            put_varint64(&mut out, data.len() as u64);
            out.extend_from_slice(&lz4_flex::block::compress(data));
            out
        }
        CompressionType::Zstd => {
            let mut out = Vec::new();
            if format_version >= 2 {
                put_varint64(&mut out, data.len() as u64);
            }
            let compressed = zstd::bulk::compress(data, 3)
                .map_err(|e| Status::corruption(format!("zstd compression failed: {e}")))?;
            out.extend_from_slice(&compressed);
            out
        }
    };

    if compressed.len() < data.len() {
        Ok((compressed, ty))
    } else {
        Ok((data.to_vec(), CompressionType::None))
    }
}

/// Invert [`compress_block`] given the stored tag byte.
pub fn decompress_block(
    ty: CompressionType,
    data: &[u8],
    format_version: u32,
) -> Result<Vec<u8>> {
    match ty {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Status::corruption(format!("snappy decompression failed: {e}"))),
        CompressionType::Zlib => {
            let payload = if format_version >= 2 {
                let (_len, n) = get_varint64(data)
                    .ok_or_else(|| Status::corruption("zlib block missing size prefix"))?;
                &data[n..]
            } else {
                data
            };
            let mut out = Vec::new();
            let mut decoder = flate2::write::DeflateDecoder::new(Vec::new());
            decoder.write_all(payload)?;
            out.extend_from_slice(&decoder.finish()?);
            Ok(out)
        }
        CompressionType::Lz4 | CompressionType::Lz4hc => {
            let (len, n) = get_varint64(data)
                .ok_or_else(|| Status::corruption("lz4 block missing size prefix"))?;
            lz4_flex::block::decompress(&data[n..], len as usize)
                .map_err(|e| Status::corruption(format!("lz4 decompression failed: {e}")))
        }
        CompressionType::Zstd => {
            let (payload, capacity) = if format_version >= 2 {
                let (len, n) = get_varint64(data)
                    .ok_or_else(|| Status::corruption("zstd block missing size prefix"))?;
                (&data[n..], len as usize)
            } else {
                (data, data.len() * 4 + 1024)
            };
            zstd::bulk::decompress(payload, capacity)
                .map_err(|e| Status::corruption(format!("zstd decompression failed: {e}")))
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Raw block I/O
// ------------------------------------------------------------------------------------------------

/// Compute the trailer checksum for a stored block.
pub fn block_trailer_checksum(
    checksum: ChecksumType,
    stored: &[u8],
    type_byte: u8,
    format_version: u32,
    offset: u64,
) -> u32 {
    let context = if format_version >= 6 {
        Some(offset)
    } else {
        None
    };
    block_checksum_with_context(checksum, stored, type_byte, context)
}

/// Read, verify, and decompress the block at `handle`.
pub fn read_block_contents(
    file: &dyn RandomAccessFile,
    handle: BlockHandle,
    checksum: ChecksumType,
    verify: bool,
    format_version: u32,
) -> Result<Vec<u8>> {
    let raw = file.read_at(handle.offset, handle.size as usize + BLOCK_TRAILER_SIZE)?;
    let (stored, trailer) = raw.split_at(handle.size as usize);
    let type_byte = trailer[0];

    if verify && checksum != ChecksumType::NoChecksum {
        let expected = read_le32(&trailer[1..5]);
        let actual =
            block_trailer_checksum(checksum, stored, type_byte, format_version, handle.offset);
        if expected != actual {
            return Err(Status::corruption(format!(
                "block checksum mismatch at offset {}: stored 0x{expected:08x}, computed 0x{actual:08x}",
                handle.offset
            )));
        }
    }

    let ty = CompressionType::from_u8(type_byte)
        .ok_or_else(|| Status::corruption(format!("unknown compression type {type_byte}")))?;
    decompress_block(ty, stored, format_version)
}
