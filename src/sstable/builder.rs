//! Table builder — writes a complete SSTable from a sorted entry stream.
//!
//! # Input requirements
//!
//! - [`TableBuilder::add`] must receive internal keys in non-decreasing
//!   internal-key order; out-of-order input is rejected, not reordered.
//! - Range tombstones may arrive in any order; they are sorted before the
//!   range-deletion block is emitted.
//!
//! # Output guarantees
//!
//! - Data blocks flush at `block_size` with prefix compression and the
//!   configured compression codec.
//! - Index separators are shortened via the comparator, keeping the index
//!   small without losing precision.
//! - The filter, range-deletion, and properties blocks are linked through
//!   a metaindex whose entries are sorted by name.
//! - Every block carries a `compression_type || checksum` trailer; the
//!   footer pins the metaindex and index with the magic number.

use std::collections::BTreeMap;

use tracing::trace;

use crate::comparator::{Comparator, InternalKeyComparator};
use crate::encoding::{get_varint64, put_varint64};
use crate::env::WritableFile;
use crate::error::{Result, Status};
use crate::options::ColumnFamilyOptions;
use crate::types::{SequenceNumber, parse_internal_key};

use super::block::BlockBuilder;
use super::filter::FullFilterBlockBuilder;
use super::{
    BLOCK_TRAILER_SIZE, BlockHandle, FILTER_BLOCK_NAME, Footer, PROPERTIES_BLOCK_NAME,
    RANGE_DEL_BLOCK_NAME, block_trailer_checksum, compress_block,
};

// ------------------------------------------------------------------------------------------------
// Table properties
// ------------------------------------------------------------------------------------------------

/// Table-level metadata persisted in the properties block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    /// Point entries in the table.
    pub num_entries: u64,
    /// Range tombstones in the table.
    pub num_range_deletions: u64,
    /// Sum of internal-key byte lengths.
    pub raw_key_size: u64,
    /// Sum of value byte lengths.
    pub raw_value_size: u64,
    /// Smallest sequence among all entries.
    pub smallest_seqno: u64,
    /// Largest sequence among all entries.
    pub largest_seqno: u64,
    /// Comparator compatibility tag.
    pub comparator_name: String,
    /// Merge-operator compatibility tag, if configured.
    pub merge_operator_name: String,
    /// Prefix-extractor compatibility tag, if configured.
    pub prefix_extractor_name: String,
    /// Wall-clock seconds when the table was created.
    pub creation_time: u64,
}

impl TableProperties {
    fn encode_into(&self, block: &mut BlockBuilder) {
        // Keys must be added in sorted order; a BTreeMap provides it.
        let mut props: BTreeMap<&str, Vec<u8>> = BTreeMap::new();

        fn varint(v: u64) -> Vec<u8> {
            let mut buf = Vec::new();
            put_varint64(&mut buf, v);
            buf
        }

        props.insert("rocksdb.comparator", self.comparator_name.clone().into_bytes());
        props.insert("rocksdb.creation.time", varint(self.creation_time));
        if !self.merge_operator_name.is_empty() {
            props.insert(
                "rocksdb.merge.operator",
                self.merge_operator_name.clone().into_bytes(),
            );
        }
        props.insert("rocksdb.num.entries", varint(self.num_entries));
        props.insert(
            "rocksdb.num.range-deletions",
            varint(self.num_range_deletions),
        );
        if !self.prefix_extractor_name.is_empty() {
            props.insert(
                "rocksdb.prefix.extractor.name",
                self.prefix_extractor_name.clone().into_bytes(),
            );
        }
        props.insert("rocksdb.raw.key.size", varint(self.raw_key_size));
        props.insert("rocksdb.raw.value.size", varint(self.raw_value_size));
        props.insert("rocksdb.seqno.largest", varint(self.largest_seqno));
        props.insert("rocksdb.seqno.smallest", varint(self.smallest_seqno));

        for (key, value) in props {
            block.add(key.as_bytes(), &value);
        }
    }

    /// Rebuild properties from the decoded property pairs.
    pub fn decode(pairs: &[(Vec<u8>, Vec<u8>)]) -> TableProperties {
        let mut props = TableProperties::default();
        fn varint(v: &[u8]) -> u64 {
            get_varint64(v).map(|(x, _)| x).unwrap_or(0)
        }
        for (key, value) in pairs {
            match key.as_slice() {
                b"rocksdb.comparator" => {
                    props.comparator_name = String::from_utf8_lossy(value).into_owned();
                }
                b"rocksdb.creation.time" => props.creation_time = varint(value),
                b"rocksdb.merge.operator" => {
                    props.merge_operator_name = String::from_utf8_lossy(value).into_owned();
                }
                b"rocksdb.num.entries" => props.num_entries = varint(value),
                b"rocksdb.num.range-deletions" => props.num_range_deletions = varint(value),
                b"rocksdb.prefix.extractor.name" => {
                    props.prefix_extractor_name = String::from_utf8_lossy(value).into_owned();
                }
                b"rocksdb.raw.key.size" => props.raw_key_size = varint(value),
                b"rocksdb.raw.value.size" => props.raw_value_size = varint(value),
                b"rocksdb.seqno.largest" => props.largest_seqno = varint(value),
                b"rocksdb.seqno.smallest" => props.smallest_seqno = varint(value),
                // Unknown properties are preserved-by-ignoring.
                _ => {}
            }
        }
        props
    }
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Streaming SSTable writer.
pub struct TableBuilder {
    file: Box<dyn WritableFile>,
    opts: ColumnFamilyOptions,
    icmp: InternalKeyComparator,

    offset: u64,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter: Option<FullFilterBlockBuilder>,

    /// Range tombstones as `(start_ikey, end_user_key)`.
    range_dels: Vec<(Vec<u8>, Vec<u8>)>,

    last_key: Vec<u8>,
    /// Deferred index entry: set after a data block flush, resolved when
    /// the next key arrives (so the separator can use both sides).
    pending_handle: Option<BlockHandle>,

    props: TableProperties,
    num_entries: u64,
}

impl TableBuilder {
    /// Builder writing to `file` with the column family's format knobs.
    pub fn new(
        file: Box<dyn WritableFile>,
        icmp: InternalKeyComparator,
        opts: &ColumnFamilyOptions,
        creation_time: u64,
    ) -> Self {
        let filter = if opts.bloom_bits_per_key > 0 {
            Some(FullFilterBlockBuilder::new(
                opts.bloom_bits_per_key,
                opts.whole_key_filtering,
                opts.prefix_extractor.clone(),
            ))
        } else {
            None
        };

        let props = TableProperties {
            comparator_name: opts.comparator.name().to_string(),
            merge_operator_name: opts
                .merge_operator
                .as_ref()
                .map(|m| m.name().to_string())
                .unwrap_or_default(),
            prefix_extractor_name: opts
                .prefix_extractor
                .as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            smallest_seqno: u64::MAX,
            creation_time,
            ..Default::default()
        };

        Self {
            file,
            opts: opts.clone(),
            icmp,
            offset: 0,
            data_block: BlockBuilder::new(opts.block_restart_interval),
            index_block: BlockBuilder::new(1),
            filter,
            range_dels: Vec::new(),
            last_key: Vec::new(),
            pending_handle: None,
            props,
            num_entries: 0,
        }
    }

    /// Append one entry; internal keys must be non-decreasing.
    pub fn add(&mut self, ikey: &[u8], value: &[u8]) -> Result<()> {
        let parsed = parse_internal_key(ikey)?;
        if !self.last_key.is_empty()
            && self.icmp.compare(ikey, &self.last_key) == std::cmp::Ordering::Less
        {
            return Err(Status::invalid_argument(
                "keys added to table builder out of order",
            ));
        }

        if let Some(pending) = self.pending_handle.take() {
            let separator = self.icmp.find_shortest_separator(&self.last_key, ikey);
            self.index_block.add(&separator, &pending.encode());
        }

        if let Some(filter) = &mut self.filter {
            filter.add_key(parsed.user_key);
        }

        self.track_seq(parsed.sequence);
        self.props.num_entries += 1;
        self.props.raw_key_size += ikey.len() as u64;
        self.props.raw_value_size += value.len() as u64;
        self.num_entries += 1;

        self.last_key.clear();
        self.last_key.extend_from_slice(ikey);
        self.data_block.add(ikey, value);

        if self.data_block.current_size_estimate() >= self.opts.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Record a range tombstone (`start_ikey` carries the sequence).
    pub fn add_range_tombstone(&mut self, start_ikey: &[u8], end_user_key: &[u8]) -> Result<()> {
        let parsed = parse_internal_key(start_ikey)?;
        self.track_seq(parsed.sequence);
        self.props.num_range_deletions += 1;
        self.range_dels
            .push((start_ikey.to_vec(), end_user_key.to_vec()));
        Ok(())
    }

    fn track_seq(&mut self, seq: SequenceNumber) {
        self.props.smallest_seqno = self.props.smallest_seqno.min(seq);
        self.props.largest_seqno = self.props.largest_seqno.max(seq);
    }

    /// Point entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Whether neither entries nor tombstones were added.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0 && self.range_dels.is_empty()
    }

    /// Bytes written so far (blocks flushed to the file).
    pub fn file_size_estimate(&self) -> u64 {
        self.offset + self.data_block.current_size_estimate() as u64
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let payload = self.data_block.finish().to_vec();
        let handle = self.write_block(&payload, true)?;
        self.data_block.reset();
        self.pending_handle = Some(handle);
        trace!(offset = handle.offset, size = handle.size, "data block flushed");
        Ok(())
    }

    /// Write one block with compression and trailer; returns its handle.
    fn write_block(&mut self, payload: &[u8], compress: bool) -> Result<BlockHandle> {
        let (stored, ty) = if compress {
            compress_block(self.opts.compression, payload, self.opts.format_version)?
        } else {
            (payload.to_vec(), crate::options::CompressionType::None)
        };

        let handle = BlockHandle {
            offset: self.offset,
            size: stored.len() as u64,
        };

        let checksum = block_trailer_checksum(
            self.opts.checksum,
            &stored,
            ty as u8,
            self.opts.format_version,
            handle.offset,
        );

        self.file.append(&stored)?;
        let mut trailer = [0u8; BLOCK_TRAILER_SIZE];
        trailer[0] = ty as u8;
        trailer[1..5].copy_from_slice(&checksum.to_le_bytes());
        self.file.append(&trailer)?;

        self.offset += stored.len() as u64 + BLOCK_TRAILER_SIZE as u64;
        Ok(handle)
    }

    /// Finalize the table: meta blocks, index, footer, fsync.
    ///
    /// Returns the final file size and the accumulated properties.
    pub fn finish(mut self) -> Result<(u64, TableProperties)> {
        self.flush_data_block()?;

        if let Some(pending) = self.pending_handle.take() {
            let successor = self.icmp.find_short_successor(&self.last_key);
            self.index_block.add(&successor, &pending.encode());
        }

        // Metaindex entries must stay sorted by name.
        let mut meta_entries: BTreeMap<&str, BlockHandle> = BTreeMap::new();

        if let Some(filter) = self.filter.take()
            && filter.num_added() > 0
        {
            let payload = filter.finish();
            // Filter blocks are never compressed: probing needs raw bits.
            let handle = self.write_block(&payload, false)?;
            meta_entries.insert(FILTER_BLOCK_NAME, handle);
        }

        if !self.range_dels.is_empty() {
            let mut dels = std::mem::take(&mut self.range_dels);
            let icmp = self.icmp.clone();
            dels.sort_by(|a, b| icmp.compare(&a.0, &b.0));
            let mut block = BlockBuilder::new(1);
            for (start_ikey, end_key) in &dels {
                block.add(start_ikey, end_key);
            }
            let payload = block.finish().to_vec();
            let handle = self.write_block(&payload, false)?;
            meta_entries.insert(RANGE_DEL_BLOCK_NAME, handle);
        }

        {
            let mut block = BlockBuilder::new(1);
            if self.props.smallest_seqno == u64::MAX {
                self.props.smallest_seqno = 0;
            }
            self.props.encode_into(&mut block);
            let payload = block.finish().to_vec();
            let handle = self.write_block(&payload, false)?;
            meta_entries.insert(PROPERTIES_BLOCK_NAME, handle);
        }

        let mut metaindex = BlockBuilder::new(1);
        for (name, handle) in &meta_entries {
            metaindex.add(name.as_bytes(), &handle.encode());
        }
        let metaindex_payload = metaindex.finish().to_vec();
        let metaindex_handle = self.write_block(&metaindex_payload, false)?;

        let index_payload = self.index_block.finish().to_vec();
        let index_handle = self.write_block(&index_payload, true)?;

        let footer = Footer {
            checksum: self.opts.checksum,
            metaindex: metaindex_handle,
            index: index_handle,
            format_version: self.opts.format_version,
        };
        let footer_bytes = footer.encode();
        self.file.append(&footer_bytes)?;
        self.offset += footer_bytes.len() as u64;

        self.file.flush()?;
        self.file.sync()?;

        Ok((self.offset, self.props))
    }
}
