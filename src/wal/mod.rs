//! Write-ahead log record framing.
//!
//! Both WAL segments and MANIFEST files use the same block-structured
//! record format. The file is a sequence of 32 KiB physical blocks; a
//! logical record is stored as one or more physical records that never
//! straddle a block boundary.
//!
//! # On-disk layout
//!
//! ```text
//! block := record* trailer?
//! record :=
//!   masked_crc32c: u32 LE     // over type byte + payload
//!   length:        u16 LE     // payload bytes in this physical record
//!   type:          u8         // FULL | FIRST | MIDDLE | LAST
//!   payload:       u8[length]
//! ```
//!
//! A payload larger than the space left in the current block is split:
//! `FIRST` carries the head, zero or more `MIDDLE`s the middle, `LAST`
//! the tail. Trailing block space smaller than a 7-byte header is
//! zero-filled and skipped by readers.
//!
//! # Recovery modes
//!
//! - [`ReplayMode::Strict`] — used for MANIFEST recovery. Any checksum
//!   mismatch or truncated record is a hard `Corruption` error.
//! - [`ReplayMode::TolerateTornTail`] — used for WAL replay. A record
//!   torn by a crash at the end of the file ends replay cleanly (visible
//!   via [`LogReader::tail_truncated`]); corruption earlier in the file
//!   resyncs to the next block boundary.

#[cfg(test)]
mod tests;

use tracing::{trace, warn};

use crate::encoding::checksum::{crc32c, crc32c_extend};
use crate::encoding::{mask_crc, unmask_crc};
use crate::env::{SequentialFile, WritableFile};
use crate::error::{Result, Status};

/// Physical block size.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Bytes of every physical record header.
pub const HEADER_SIZE: usize = 7;

/// Physical record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// Reserved for zero-filled trailers and preallocated space.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Appends logical records with block-aware fragmentation.
pub struct LogWriter {
    dest: Box<dyn WritableFile>,
    /// Write position within the current 32 KiB block.
    block_offset: usize,
}

impl LogWriter {
    /// Wrap a fresh writable file.
    pub fn new(dest: Box<dyn WritableFile>) -> Self {
        Self {
            dest,
            block_offset: 0,
        }
    }

    /// Append one logical record, fragmenting across blocks as needed.
    ///
    /// Buffers in the OS; call [`LogWriter::sync`] for durability.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut left = payload;
        let mut begin = true;

        // Empty payloads still emit one FULL record.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    const ZEROES: [u8; HEADER_SIZE] = [0; HEADER_SIZE];
                    self.dest.append(&ZEROES[..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(avail);
            let end = fragment_len == left.len();

            let rtype = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(rtype, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;
            if end {
                break;
            }
        }
        Ok(())
    }

    /// Flush library buffers without fsync.
    pub fn flush(&mut self) -> Result<()> {
        self.dest.flush()
    }

    /// Durably persist everything appended so far.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.flush()?;
        self.dest.sync()
    }

    fn emit_physical_record(&mut self, rtype: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let crc = mask_crc(crc32c_extend(crc32c(&[rtype as u8]), payload));

        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(payload.len() as u16).to_le_bytes());
        header[6] = rtype as u8;

        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.block_offset += HEADER_SIZE + payload.len();

        trace!(len = payload.len(), rtype = ?rtype, "log record emitted");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Corruption tolerance during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Every fault is a hard error (MANIFEST recovery).
    Strict,
    /// A record torn at end-of-file ends replay cleanly; earlier faults
    /// resync at the next block boundary (WAL replay).
    TolerateTornTail,
}

/// Outcome of reading one physical record.
enum Physical {
    Record(RecordType, Vec<u8>),
    /// Clean end of file.
    Eof,
    /// Truncated header or payload at the file tail.
    TornTail,
    /// Checksum or structure fault inside the file.
    Bad(String),
}

/// Reassembles logical records from block-framed physical records.
pub struct LogReader {
    src: Box<dyn SequentialFile>,
    mode: ReplayMode,
    buffer: Vec<u8>,
    buf_pos: usize,
    /// True once a short block read signalled the end of the file.
    hit_eof: bool,
    tail_truncated: bool,
}

impl LogReader {
    /// Wrap a sequential file positioned at the start of the log.
    pub fn new(src: Box<dyn SequentialFile>, mode: ReplayMode) -> Self {
        Self {
            src,
            mode,
            buffer: Vec::new(),
            buf_pos: 0,
            hit_eof: false,
            tail_truncated: false,
        }
    }

    /// True when tolerant replay stopped at a torn tail record.
    pub fn tail_truncated(&self) -> bool {
        self.tail_truncated
    }

    /// Read the next logical record, reassembling fragments.
    ///
    /// Returns `Ok(None)` at the end of the log.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            match self.read_physical_record()? {
                Physical::Record(RecordType::Full, payload) => {
                    if in_fragmented_record {
                        self.fault("partial record without trailing LAST")?;
                        scratch.clear();
                    }
                    return Ok(Some(payload));
                }
                Physical::Record(RecordType::First, payload) => {
                    if in_fragmented_record {
                        self.fault("partial record without trailing LAST")?;
                    }
                    scratch = payload;
                    in_fragmented_record = true;
                }
                Physical::Record(RecordType::Middle, payload) => {
                    if !in_fragmented_record {
                        self.fault("MIDDLE record without FIRST")?;
                    } else {
                        scratch.extend_from_slice(&payload);
                    }
                }
                Physical::Record(RecordType::Last, payload) => {
                    if !in_fragmented_record {
                        self.fault("LAST record without FIRST")?;
                    } else {
                        scratch.extend_from_slice(&payload);
                        return Ok(Some(scratch));
                    }
                }
                Physical::Record(RecordType::Zero, _) => {
                    // read_physical_record never yields Zero.
                    return Err(Status::corruption("zero-type record surfaced"));
                }
                Physical::Eof => {
                    if in_fragmented_record {
                        // The writer crashed between FIRST and LAST.
                        if self.mode == ReplayMode::Strict {
                            return Err(Status::corruption(
                                "log ended inside a fragmented record",
                            ));
                        }
                        self.tail_truncated = true;
                    }
                    return Ok(None);
                }
                Physical::TornTail => {
                    if self.mode == ReplayMode::Strict {
                        return Err(Status::corruption("truncated record at end of log"));
                    }
                    self.tail_truncated = true;
                    return Ok(None);
                }
                Physical::Bad(reason) => {
                    self.fault(&reason)?;
                    // Tolerant mode: the fragment in progress is lost;
                    // resync happened at the block boundary already.
                    in_fragmented_record = false;
                    scratch.clear();
                }
            }
        }
    }

    /// Strict mode escalates; tolerant mode logs and lets the caller
    /// resync.
    fn fault(&mut self, reason: &str) -> Result<()> {
        if self.mode == ReplayMode::Strict {
            return Err(Status::corruption(format!("invalid record: {reason}")));
        }
        warn!(reason, "log corruption skipped; resyncing at block boundary");
        Ok(())
    }

    fn read_physical_record(&mut self) -> Result<Physical> {
        loop {
            if self.buffer.len() - self.buf_pos < HEADER_SIZE {
                if !self.hit_eof {
                    // Trailer space: skip it and fetch the next block.
                    self.fill_buffer()?;
                    if self.buffer.is_empty() {
                        return Ok(Physical::Eof);
                    }
                    continue;
                }
                // A few bytes of header at the true end of the file.
                if self.buffer.len() - self.buf_pos > 0 {
                    self.buf_pos = self.buffer.len();
                    return Ok(Physical::TornTail);
                }
                return Ok(Physical::Eof);
            }

            let header = &self.buffer[self.buf_pos..self.buf_pos + HEADER_SIZE];
            let stored_crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let type_byte = header[6];

            if type_byte == RecordType::Zero as u8 && length == 0 {
                // Zero-filled trailer; skip the rest of this block.
                self.buf_pos = self.buffer.len();
                continue;
            }

            if self.buf_pos + HEADER_SIZE + length > self.buffer.len() {
                self.buf_pos = self.buffer.len();
                if self.hit_eof {
                    return Ok(Physical::TornTail);
                }
                return Ok(Physical::Bad("record length exceeds block".into()));
            }

            let rtype = match type_byte {
                1 => RecordType::Full,
                2 => RecordType::First,
                3 => RecordType::Middle,
                4 => RecordType::Last,
                other => {
                    self.buf_pos = self.buffer.len();
                    return Ok(Physical::Bad(format!("unknown record type {other}")));
                }
            };

            let payload_start = self.buf_pos + HEADER_SIZE;
            let payload = &self.buffer[payload_start..payload_start + length];
            let actual_crc = crc32c_extend(crc32c(&[type_byte]), payload);
            if unmask_crc(stored_crc) != actual_crc {
                // A torn write at the file tail also shows up as a CRC
                // mismatch; treat the final block leniently.
                let at_tail = self.hit_eof;
                self.buf_pos = self.buffer.len();
                if at_tail {
                    return Ok(Physical::TornTail);
                }
                return Ok(Physical::Bad("checksum mismatch".into()));
            }

            let payload = payload.to_vec();
            self.buf_pos = payload_start + length;
            return Ok(Physical::Record(rtype, payload));
        }
    }

    /// Read the next physical block. A short read marks EOF.
    fn fill_buffer(&mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer.resize(BLOCK_SIZE, 0);
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.src.read(&mut self.buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.buffer.truncate(filled);
        self.buf_pos = 0;
        if filled < BLOCK_SIZE {
            self.hit_eof = true;
        }
        Ok(())
    }
}
