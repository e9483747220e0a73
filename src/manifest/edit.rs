//! VersionEdit — the incremental metadata record appended to MANIFEST.
//!
//! Each edit is a tag-stream: `varint32 tag || payload`, with payload
//! shapes fixed per tag. Unknown tags carrying the safe-ignore bit are
//! length-prefixed, so they can be preserved verbatim and re-emitted;
//! unknown tags without the bit are a corruption error.

use std::sync::Arc;

use crate::encoding::{
    get_length_prefixed_slice, get_varint32, get_varint64, put_length_prefixed_slice, put_varint32,
    put_varint64,
};
use crate::error::{Result, Status};
use crate::types::{ColumnFamilyId, SequenceNumber};

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_PREV_LOG_NUMBER: u32 = 9;
const TAG_NEW_FILE2: u32 = 100;
const TAG_COLUMN_FAMILY: u32 = 200;
const TAG_COLUMN_FAMILY_ADD: u32 = 201;
const TAG_COLUMN_FAMILY_DROP: u32 = 202;
const TAG_MAX_COLUMN_FAMILY: u32 = 203;

/// Tags with this bit are skippable: their payload is length-prefixed.
const TAG_SAFE_IGNORE_MASK: u32 = 1 << 13;

/// Metadata of one table file as recorded in the MANIFEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    /// Unique, monotonic file number (`NNNNNN.sst`).
    pub number: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// Smallest internal key in the file.
    pub smallest: Vec<u8>,
    /// Largest internal key in the file.
    pub largest: Vec<u8>,
    /// Smallest sequence among the file's entries.
    pub smallest_seq: SequenceNumber,
    /// Largest sequence among the file's entries.
    pub largest_seq: SequenceNumber,
}

/// A shared file handle; versions share files by reference count.
pub type FileMetaHandle = Arc<FileMetaData>;

/// One incremental change to the version state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    /// Comparator compatibility tag (first edit of a column family).
    pub comparator_name: Option<String>,

    /// New WAL gate: logs numbered below this are fully flushed for the
    /// edit's column family.
    pub log_number: Option<u64>,

    /// Legacy two-log recovery gate; retained for format compatibility.
    pub prev_log_number: Option<u64>,

    /// New global file-number counter floor.
    pub next_file_number: Option<u64>,

    /// New global last-sequence floor.
    pub last_sequence: Option<SequenceNumber>,

    /// Round-robin compaction cursors: `(level, internal_key)`.
    pub compact_pointers: Vec<(usize, Vec<u8>)>,

    /// Files removed: `(level, file_number)`.
    pub deleted_files: Vec<(usize, u64)>,

    /// Files added: `(level, meta)`.
    pub new_files: Vec<(usize, FileMetaData)>,

    /// Column family this edit applies to (default 0).
    pub column_family: ColumnFamilyId,

    /// Create a column family with this name (id = `column_family`).
    pub column_family_add: Option<String>,

    /// Drop the edit's column family.
    pub column_family_drop: bool,

    /// New ceiling for allocated column family ids.
    pub max_column_family: Option<ColumnFamilyId>,

    /// Unknown-but-safe tags preserved verbatim for re-emit.
    pub unknown_tags: Vec<(u32, Vec<u8>)>,
}

impl VersionEdit {
    /// Serialize into the MANIFEST record payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        if let Some(name) = &self.comparator_name {
            put_varint32(&mut buf, TAG_COMPARATOR);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(&mut buf, TAG_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(&mut buf, TAG_PREV_LOG_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(&mut buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(&mut buf, TAG_LAST_SEQUENCE);
            put_varint64(&mut buf, n);
        }
        if let Some(n) = self.max_column_family {
            put_varint32(&mut buf, TAG_MAX_COLUMN_FAMILY);
            put_varint32(&mut buf, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(&mut buf, TAG_COMPACT_POINTER);
            put_varint32(&mut buf, *level as u32);
            put_length_prefixed_slice(&mut buf, key);
        }
        for (level, number) in &self.deleted_files {
            put_varint32(&mut buf, TAG_DELETED_FILE);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, *number);
        }
        for (level, meta) in &self.new_files {
            put_varint32(&mut buf, TAG_NEW_FILE2);
            put_varint32(&mut buf, *level as u32);
            put_varint64(&mut buf, meta.number);
            put_varint64(&mut buf, meta.file_size);
            put_length_prefixed_slice(&mut buf, &meta.smallest);
            put_length_prefixed_slice(&mut buf, &meta.largest);
            put_varint64(&mut buf, meta.smallest_seq);
            put_varint64(&mut buf, meta.largest_seq);
        }
        if self.column_family != 0 {
            put_varint32(&mut buf, TAG_COLUMN_FAMILY);
            put_varint32(&mut buf, self.column_family);
        }
        if let Some(name) = &self.column_family_add {
            put_varint32(&mut buf, TAG_COLUMN_FAMILY_ADD);
            put_length_prefixed_slice(&mut buf, name.as_bytes());
        }
        if self.column_family_drop {
            put_varint32(&mut buf, TAG_COLUMN_FAMILY_DROP);
        }
        for (tag, payload) in &self.unknown_tags {
            put_varint32(&mut buf, *tag);
            put_length_prefixed_slice(&mut buf, payload);
        }
        buf
    }

    /// Parse a MANIFEST record payload.
    pub fn decode(mut input: &[u8]) -> Result<VersionEdit> {
        let mut edit = VersionEdit::default();

        fn varint32(input: &mut &[u8], what: &str) -> Result<u32> {
            let (v, n) = get_varint32(input)
                .ok_or_else(|| Status::corruption(format!("version edit: bad {what}")))?;
            *input = &input[n..];
            Ok(v)
        }
        fn varint64(input: &mut &[u8], what: &str) -> Result<u64> {
            let (v, n) = get_varint64(input)
                .ok_or_else(|| Status::corruption(format!("version edit: bad {what}")))?;
            *input = &input[n..];
            Ok(v)
        }
        fn slice<'a>(input: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
            let (s, n) = get_length_prefixed_slice(input)
                .ok_or_else(|| Status::corruption(format!("version edit: bad {what}")))?;
            *input = &input[n..];
            Ok(s)
        }

        while !input.is_empty() {
            let tag = varint32(&mut input, "tag")?;
            match tag {
                TAG_COMPARATOR => {
                    let name = slice(&mut input, "comparator name")?;
                    edit.comparator_name = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Status::corruption("comparator name not UTF-8"))?,
                    );
                }
                TAG_LOG_NUMBER => edit.log_number = Some(varint64(&mut input, "log number")?),
                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number = Some(varint64(&mut input, "prev log number")?);
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number = Some(varint64(&mut input, "next file number")?);
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence = Some(varint64(&mut input, "last sequence")?);
                }
                TAG_MAX_COLUMN_FAMILY => {
                    edit.max_column_family = Some(varint32(&mut input, "max column family")?);
                }
                TAG_COMPACT_POINTER => {
                    let level = varint32(&mut input, "compact pointer level")? as usize;
                    let key = slice(&mut input, "compact pointer key")?.to_vec();
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = varint32(&mut input, "deleted file level")? as usize;
                    let number = varint64(&mut input, "deleted file number")?;
                    edit.deleted_files.push((level, number));
                }
                TAG_NEW_FILE2 => {
                    let level = varint32(&mut input, "new file level")? as usize;
                    let number = varint64(&mut input, "new file number")?;
                    let file_size = varint64(&mut input, "new file size")?;
                    let smallest = slice(&mut input, "new file smallest key")?.to_vec();
                    let largest = slice(&mut input, "new file largest key")?.to_vec();
                    let smallest_seq = varint64(&mut input, "new file smallest seq")?;
                    let largest_seq = varint64(&mut input, "new file largest seq")?;
                    edit.new_files.push((
                        level,
                        FileMetaData {
                            number,
                            file_size,
                            smallest,
                            largest,
                            smallest_seq,
                            largest_seq,
                        },
                    ));
                }
                TAG_COLUMN_FAMILY => {
                    edit.column_family = varint32(&mut input, "column family id")?;
                }
                TAG_COLUMN_FAMILY_ADD => {
                    let name = slice(&mut input, "column family name")?;
                    edit.column_family_add = Some(
                        String::from_utf8(name.to_vec())
                            .map_err(|_| Status::corruption("column family name not UTF-8"))?,
                    );
                }
                TAG_COLUMN_FAMILY_DROP => edit.column_family_drop = true,
                unknown if unknown & TAG_SAFE_IGNORE_MASK != 0 => {
                    // Skippable tag: payload is length-prefixed.
                    let payload = slice(&mut input, "ignorable tag payload")?.to_vec();
                    edit.unknown_tags.push((unknown, payload));
                }
                unknown => {
                    return Err(Status::corruption(format!(
                        "version edit: unknown tag {unknown}"
                    )));
                }
            }
        }
        Ok(edit)
    }
}
