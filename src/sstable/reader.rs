//! Table reader — point gets and ordered iteration over one SSTable.
//!
//! Opening a table reads the footer, metaindex, index block, filter
//! block, properties, and range-deletion block; data blocks are fetched
//! lazily (and through the shared block cache when one is configured).
//!
//! Tables are immutable, so readers are lock-free: the reader itself is
//! `Send + Sync` and iterators pin it through an `Arc`.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::cache::BlockCache;
use crate::comparator::InternalKeyComparator;
use crate::engine::read::{GetContext, GetOutcome};
use crate::env::RandomAccessFile;
use crate::error::{Result, Status};
use crate::iterator::InternalIterator;
use crate::options::{ColumnFamilyOptions, ReadOptions};
use crate::prefix::PrefixExtractor;
use crate::types::{LookupKey, SequenceNumber, extract_tag, extract_user_key, parse_internal_key};

use super::block::{Block, BlockIter};
use super::builder::TableProperties;
use super::filter::FilterBlockReader;
use super::{
    BlockHandle, FILTER_BLOCK_NAME, FOOTER_LENGTH, Footer, PROPERTIES_BLOCK_NAME,
    RANGE_DEL_BLOCK_NAME, read_block_contents,
};

/// An open, immutable SSTable.
pub struct Table {
    file: Arc<dyn RandomAccessFile>,
    file_number: u64,
    icmp: InternalKeyComparator,
    footer: Footer,
    index_block: Arc<Block>,
    filter: Option<FilterBlockReader>,
    whole_key_filtering: bool,
    prefix_extractor: Option<Arc<dyn PrefixExtractor>>,
    props: TableProperties,
    /// `(start_user_key, end_user_key, seq)`, sorted by start key.
    range_dels: Vec<(Vec<u8>, Vec<u8>, SequenceNumber)>,
    cache: Option<Arc<BlockCache>>,
}

impl Table {
    /// Open a table file, reading all meta blocks eagerly.
    pub fn open(
        file: Box<dyn RandomAccessFile>,
        file_number: u64,
        icmp: InternalKeyComparator,
        opts: &ColumnFamilyOptions,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Table> {
        let file: Arc<dyn RandomAccessFile> = Arc::from(file);
        let size = file.size();
        let tail_len = (FOOTER_LENGTH as u64).min(size);
        let tail = file.read_at(size - tail_len, tail_len as usize)?;
        let footer = Footer::decode(&tail)?;

        let index_contents = read_block_contents(
            file.as_ref(),
            footer.index,
            footer.checksum,
            true,
            footer.format_version,
        )?;
        let index_block = Arc::new(Block::new(index_contents)?);

        let metaindex_contents = read_block_contents(
            file.as_ref(),
            footer.metaindex,
            footer.checksum,
            true,
            footer.format_version,
        )?;
        let meta_entries = Block::new(metaindex_contents)?.entries()?;

        let mut filter = None;
        let mut props = TableProperties::default();
        let mut range_dels = Vec::new();

        for (name, handle_bytes) in &meta_entries {
            let (handle, _) = BlockHandle::decode_from(handle_bytes)?;
            match name.as_slice() {
                n if n == FILTER_BLOCK_NAME.as_bytes() => {
                    let contents = read_block_contents(
                        file.as_ref(),
                        handle,
                        footer.checksum,
                        true,
                        footer.format_version,
                    )?;
                    filter = FilterBlockReader::new(contents);
                }
                n if n == PROPERTIES_BLOCK_NAME.as_bytes() => {
                    let contents = read_block_contents(
                        file.as_ref(),
                        handle,
                        footer.checksum,
                        true,
                        footer.format_version,
                    )?;
                    props = TableProperties::decode(&Block::new(contents)?.entries()?);
                }
                n if n == RANGE_DEL_BLOCK_NAME.as_bytes() => {
                    let contents = read_block_contents(
                        file.as_ref(),
                        handle,
                        footer.checksum,
                        true,
                        footer.format_version,
                    )?;
                    for (start_ikey, end_key) in Block::new(contents)?.entries()? {
                        let seq = extract_tag(&start_ikey) >> 8;
                        range_dels.push((
                            extract_user_key(&start_ikey).to_vec(),
                            end_key,
                            seq,
                        ));
                    }
                }
                // Unknown meta blocks are ignored, never rejected.
                _ => {}
            }
        }

        trace!(
            file_number,
            entries = props.num_entries,
            range_dels = range_dels.len(),
            "table opened"
        );

        Ok(Table {
            file,
            file_number,
            icmp,
            footer,
            index_block,
            filter,
            whole_key_filtering: opts.whole_key_filtering,
            prefix_extractor: opts.prefix_extractor.clone(),
            props,
            range_dels,
            cache,
        })
    }

    /// Table-level properties decoded from the properties block.
    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    /// File number this table was opened under.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// All range tombstones as `(start, end, seq)`, sorted by start.
    pub fn range_tombstones(&self) -> &[(Vec<u8>, Vec<u8>, SequenceNumber)] {
        &self.range_dels
    }

    /// Largest visible tombstone sequence covering `user_key`.
    pub fn max_covering_tombstone_seq(
        &self,
        user_key: &[u8],
        snapshot: SequenceNumber,
    ) -> SequenceNumber {
        let mut max_seq = 0;
        for (start, end, seq) in &self.range_dels {
            if self.icmp.compare_user_keys(start, user_key) == Ordering::Greater {
                break;
            }
            if self.icmp.compare_user_keys(user_key, end) == Ordering::Less && *seq <= snapshot {
                max_seq = max_seq.max(*seq);
            }
        }
        max_seq
    }

    /// Fetch (or read through the cache) the block at `handle`.
    fn read_block(&self, handle: BlockHandle, ro: &ReadOptions) -> Result<Arc<Block>> {
        let key = (self.file_number, handle.offset);
        if let Some(cache) = &self.cache
            && let Some(block) = cache.lookup(&key)
        {
            return Ok(block);
        }

        let contents = read_block_contents(
            self.file.as_ref(),
            handle,
            self.footer.checksum,
            true,
            self.footer.format_version,
        )?;
        let block = Arc::new(Block::new(contents)?);

        if let Some(cache) = &self.cache
            && ro.fill_cache
        {
            cache.insert(key, Arc::clone(&block), block.size());
        }
        Ok(block)
    }

    /// Whether the bloom filter rules out `user_key`.
    fn filter_rejects(&self, user_key: &[u8]) -> bool {
        let Some(filter) = &self.filter else {
            return false;
        };
        if self.whole_key_filtering {
            return !filter.may_contain(user_key);
        }
        if let Some(extractor) = &self.prefix_extractor
            && extractor.in_domain(user_key)
        {
            return !filter.may_contain(extractor.transform(user_key));
        }
        false
    }

    /// Point lookup feeding the shared [`GetContext`].
    ///
    /// Returns `true` when the lookup concluded within this table.
    pub fn get(&self, lkey: &LookupKey, ctx: &mut GetContext, ro: &ReadOptions) -> Result<bool> {
        let tomb = self.max_covering_tombstone_seq(lkey.user_key(), lkey.sequence());
        ctx.observe_range_tombstone(tomb);

        if self.filter_rejects(lkey.user_key()) {
            trace!(file_number = self.file_number, "bloom filter short-circuit");
            return Ok(false);
        }

        let mut index_iter = self.index_block.iter(self.icmp.clone());
        index_iter.seek(lkey.internal_key());

        while index_iter.valid() {
            let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
            let block = self.read_block(handle, ro)?;
            let mut data_iter = block.iter(self.icmp.clone());
            data_iter.seek(lkey.internal_key());

            while data_iter.valid() {
                let parsed = parse_internal_key(data_iter.key())?;
                if self
                    .icmp
                    .compare_user_keys(parsed.user_key, lkey.user_key())
                    != Ordering::Equal
                {
                    return Ok(false);
                }
                match ctx.process(parsed, data_iter.value())? {
                    GetOutcome::Done => return Ok(true),
                    GetOutcome::KeepSearching => {}
                }
                data_iter.next();
            }
            data_iter.status()?;

            // The user key may continue in the next data block.
            index_iter.next();
        }
        index_iter.status()?;
        Ok(false)
    }

    /// Ordered iterator over the table's point entries.
    pub fn iter(self: &Arc<Self>, ro: &ReadOptions) -> TableIterator {
        TableIterator {
            table: Arc::clone(self),
            ro: ro.clone(),
            index_iter: self.index_block.iter(self.icmp.clone()),
            data_iter: None,
            status: None,
        }
    }
}

/// Two-level iterator: index block entries point at data blocks.
pub struct TableIterator {
    table: Arc<Table>,
    ro: ReadOptions,
    index_iter: BlockIter,
    data_iter: Option<BlockIter>,
    status: Option<Status>,
}

impl TableIterator {
    /// Load the data block the index currently points at.
    fn init_data_block(&mut self) {
        self.data_iter = None;
        if !self.index_iter.valid() {
            return;
        }
        match BlockHandle::decode_from(self.index_iter.value())
            .and_then(|(handle, _)| self.table.read_block(handle, &self.ro))
        {
            Ok(block) => {
                self.data_iter = Some(block.iter(self.table.icmp.clone()));
            }
            Err(e) => self.status = Some(e),
        }
    }

    fn skip_empty_blocks_forward(&mut self) {
        while self
            .data_iter
            .as_ref()
            .is_none_or(|it| !it.valid())
        {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_blocks_backward(&mut self) {
        while self
            .data_iter
            .as_ref()
            .is_none_or(|it| !it.valid())
        {
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(it) = &mut self.data_iter {
                it.seek_to_last();
            }
        }
    }
}

impl InternalIterator for TableIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_first();
        }
        self.skip_empty_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek_to_last();
        }
        self.skip_empty_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(it) = &mut self.data_iter {
            it.seek(target);
        }
        self.skip_empty_blocks_forward();
    }

    fn next(&mut self) {
        if let Some(it) = &mut self.data_iter {
            it.next();
        }
        self.skip_empty_blocks_forward();
    }

    fn prev(&mut self) {
        if let Some(it) = &mut self.data_iter {
            it.prev();
        }
        self.skip_empty_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator invalid").key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().expect("iterator invalid").value()
    }

    fn status(&self) -> Result<()> {
        if let Some(s) = &self.status {
            return Err(s.clone());
        }
        self.index_iter.status()?;
        if let Some(it) = &self.data_iter {
            it.status()?;
        }
        Ok(())
    }
}
