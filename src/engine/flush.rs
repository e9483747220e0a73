//! Flush — drain one immutable memtable into a single L0 table.
//!
//! Flushing an empty memtable is a no-op: no file is created and the
//! last sequence is untouched. Otherwise the memtable's entries and
//! range tombstones stream through a [`TableBuilder`]; the resulting
//! file's metadata (bounds widened over any tombstones) is handed back
//! for the caller to install via `log_and_apply`. If that install fails,
//! the written file is an orphan and the next recovery reclaims it.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::env::{Env, table_file_name};
use crate::error::Result;
use crate::iterator::InternalIterator;
use crate::manifest::FileMetaData;
use crate::memtable::MemTable;
use crate::options::ColumnFamilyOptions;
use crate::rate_limiter::{IoPriority, RateLimiter};
use crate::sstable::TableBuilder;
use crate::types::{
    MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK, ValueType, make_internal_key,
};

/// Write `mem` out as table file `file_number`.
///
/// Returns `None` (writing nothing) when the memtable is empty.
pub fn build_table(
    env: &Arc<dyn Env>,
    dbname: &Path,
    options: &ColumnFamilyOptions,
    rate_limiter: &Arc<dyn RateLimiter>,
    mem: &Arc<MemTable>,
    file_number: u64,
) -> Result<Option<FileMetaData>> {
    if mem.is_empty() {
        return Ok(None);
    }

    let icmp = mem.comparator().clone();
    let path = table_file_name(dbname, file_number);
    let file = env.new_writable_file(&path)?;
    let mut builder = TableBuilder::new(
        file,
        icmp.clone(),
        options,
        env.now_micros() / 1_000_000,
    );

    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Vec<u8> = Vec::new();

    let mut iter = mem.iter();
    iter.seek_to_first();
    while iter.valid() {
        let (ikey, value) = (iter.key().to_vec(), iter.value().to_vec());
        rate_limiter.request((ikey.len() + value.len()) as u64, IoPriority::High);
        builder.add(&ikey, &value)?;
        if smallest.is_none() {
            smallest = Some(ikey.clone());
        }
        largest = ikey;
        iter.next();
    }

    for (start, end, seq) in mem.range_tombstones() {
        let start_ikey = make_internal_key(&start, seq, ValueType::RangeDeletion);
        builder.add_range_tombstone(&start_ikey, &end)?;

        if smallest
            .as_ref()
            .is_none_or(|s| icmp.compare(&start_ikey, s) == std::cmp::Ordering::Less)
        {
            smallest = Some(start_ikey);
        }
        let end_bound = make_internal_key(&end, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        if largest.is_empty() || icmp.compare(&end_bound, &largest) == std::cmp::Ordering::Greater {
            largest = end_bound;
        }
    }

    let (file_size, props) = builder.finish()?;
    let meta = FileMetaData {
        number: file_number,
        file_size,
        smallest: smallest.unwrap_or_default(),
        largest,
        smallest_seq: mem.smallest_sequence(),
        largest_seq: mem.largest_sequence(),
    };

    info!(
        file = file_number,
        size = file_size,
        entries = props.num_entries,
        largest_seq = meta.largest_seq,
        "memtable flushed to L0 table"
    );
    Ok(Some(meta))
}
