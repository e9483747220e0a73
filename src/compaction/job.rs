//! Compaction execution: stream inputs through the output state machine
//! and write the replacement files.
//!
//! The job splits its key space into `N = min(max_subcompactions,
//! ranges)` disjoint sub-ranges and runs them in parallel; each sub-job
//! owns its input iterator (built fresh from the factory) and emits its
//! own output files. Outputs are split at the target file size, and any
//! surviving range tombstones are written into an output whose metadata
//! bounds are widened to cover them, so reads always consult the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tracing::{debug, info};

use crate::comparator::Comparator;
use crate::env::{Env, table_file_name};
use crate::error::{Result, Status};
use crate::iterator::InternalIterator;
use crate::manifest::FileMetaData;
use crate::options::ColumnFamilyOptions;
use crate::rate_limiter::{IoPriority, RateLimiter};
use crate::sstable::TableBuilder;
use crate::types::{
    MAX_SEQUENCE_NUMBER, SequenceNumber, VALUE_TYPE_FOR_SEEK, ValueType, make_internal_key,
    parse_internal_key,
};

use super::iter::{CompactionIter, CompactionIterConfig};

/// Builds a fresh merged iterator over the compaction inputs.
///
/// Called from inside each sub-job's thread, so the factory must be
/// `Sync` but the iterator itself never crosses threads.
pub type InputFactory<'a> = dyn Fn() -> Result<Box<dyn InternalIterator>> + Sync + 'a;

/// Allocates a file number (briefly taking the database mutex, whose
/// poisoning surfaces as an error rather than a panic).
pub type FileNumberAlloc<'a> = dyn Fn() -> Result<u64> + Sync + 'a;

/// Everything a compaction job needs besides its inputs.
pub struct JobContext {
    /// Filesystem gateway.
    pub env: Arc<dyn Env>,
    /// Database directory.
    pub dbname: PathBuf,
    /// Column family options (format knobs, comparator).
    pub options: ColumnFamilyOptions,
    /// Output resolution rules.
    pub iter_config: CompactionIterConfig,
    /// Split outputs at this many bytes.
    pub max_output_file_size: u64,
    /// Byte-quota gate for the output writes.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Checked between records; set on shutdown.
    pub shutting_down: Arc<AtomicBool>,
}

/// Run the compaction, optionally split into parallel sub-jobs.
///
/// `boundaries` are user-key split points dividing the key space into
/// `boundaries.len() + 1` disjoint ranges.
pub fn run(
    ctx: &JobContext,
    make_input: &InputFactory<'_>,
    alloc_file_number: &FileNumberAlloc<'_>,
    boundaries: &[Vec<u8>],
) -> Result<Vec<FileMetaData>> {
    let mut ranges: Vec<(Option<Vec<u8>>, Option<Vec<u8>>)> = Vec::new();
    let mut prev: Option<Vec<u8>> = None;
    for boundary in boundaries {
        ranges.push((prev.clone(), Some(boundary.clone())));
        prev = Some(boundary.clone());
    }
    ranges.push((prev, None));

    if ranges.len() == 1 {
        let (start, end) = ranges.pop().expect("one range");
        return run_subcompaction(ctx, make_input, alloc_file_number, start, end);
    }

    info!(subcompactions = ranges.len(), "running split compaction");

    let mut results: Vec<Result<Vec<FileMetaData>>> = Vec::with_capacity(ranges.len());
    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            handles.push(scope.spawn(move || {
                run_subcompaction(ctx, make_input, alloc_file_number, start, end)
            }));
        }
        for handle in handles {
            results.push(handle.join().unwrap_or_else(|_| {
                Err(Status::corruption("subcompaction thread panicked"))
            }));
        }
    });

    let mut outputs = Vec::new();
    for result in results {
        outputs.extend(result?);
    }
    Ok(outputs)
}

fn run_subcompaction(
    ctx: &JobContext,
    make_input: &InputFactory<'_>,
    alloc_file_number: &FileNumberAlloc<'_>,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
) -> Result<Vec<FileMetaData>> {
    let input = make_input()?;
    let mut iter = CompactionIter::new(
        &ctx.iter_config,
        input,
        start.as_deref(),
        end.clone(),
    );

    // Tombstones surviving this pass, clipped to the sub-range.
    let tombstones = surviving_tombstones(ctx, start.as_deref(), end.as_deref());

    let mut outputs: Vec<FileMetaData> = Vec::new();
    let mut builder: Option<OpenOutput> = None;

    while let Some((ikey, value)) = iter.next()? {
        if ctx.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(Status::ShuttingDown);
        }

        if builder.is_none() {
            builder = Some(new_output(ctx, alloc_file_number, &ikey)?);
        }
        let (_, b, _, largest) = builder.as_mut().expect("opened above");
        ctx.rate_limiter
            .request((ikey.len() + value.len()) as u64, IoPriority::Low);
        b.add(&ikey, &value)?;
        largest.clear();
        largest.extend_from_slice(&ikey);

        if b.file_size_estimate() >= ctx.max_output_file_size {
            let finished = builder.take().expect("checked above");
            outputs.push(finish_output(ctx, finished, &[])?);
        }
    }

    // Tombstones ride in the last output (or their own file).
    if !tombstones.is_empty() && builder.is_none() {
        let seed_key = make_internal_key(
            &tombstones[0].0,
            tombstones[0].2,
            ValueType::RangeDeletion,
        );
        builder = Some(new_output(ctx, alloc_file_number, &seed_key)?);
    }
    if let Some(finished) = builder.take() {
        outputs.push(finish_output(ctx, finished, &tombstones)?);
    }

    debug!(outputs = outputs.len(), "subcompaction finished");
    Ok(outputs)
}

type OpenOutput = (u64, TableBuilder, Vec<u8>, Vec<u8>);

fn new_output(
    ctx: &JobContext,
    alloc_file_number: &FileNumberAlloc<'_>,
    first_ikey: &[u8],
) -> Result<OpenOutput> {
    let number = alloc_file_number()?;
    let path = table_file_name(&ctx.dbname, number);
    let file = ctx.env.new_writable_file(&path)?;
    let builder = TableBuilder::new(
        file,
        ctx.iter_config.icmp.clone(),
        &ctx.options,
        ctx.env.now_micros() / 1_000_000,
    );
    Ok((number, builder, first_ikey.to_vec(), first_ikey.to_vec()))
}

fn finish_output(
    ctx: &JobContext,
    (number, mut builder, mut smallest, mut largest): OpenOutput,
    tombstones: &[(Vec<u8>, Vec<u8>, SequenceNumber)],
) -> Result<FileMetaData> {
    let icmp = &ctx.iter_config.icmp;

    for (start, end, seq) in tombstones {
        let start_ikey = make_internal_key(start, *seq, ValueType::RangeDeletion);
        builder.add_range_tombstone(&start_ikey, end)?;

        // Widen the file bounds so reads inside the range consult it.
        if icmp.compare(&start_ikey, &smallest) == std::cmp::Ordering::Less {
            smallest = start_ikey;
        }
        let end_bound = make_internal_key(end, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
        if icmp.compare(&end_bound, &largest) == std::cmp::Ordering::Greater {
            largest = end_bound;
        }
    }

    let (file_size, props) = builder.finish()?;
    let smallest_seq = parse_internal_key(&smallest)
        .map(|p| p.sequence)
        .unwrap_or(0)
        .min(props.smallest_seqno);

    Ok(FileMetaData {
        number,
        file_size,
        smallest,
        largest,
        smallest_seq,
        largest_seq: props.largest_seqno,
    })
}

/// Tombstones that must be carried into the outputs, clipped to the
/// sub-range.
fn surviving_tombstones(
    ctx: &JobContext,
    start: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Vec<(Vec<u8>, Vec<u8>, SequenceNumber)> {
    let cfg = &ctx.iter_config;
    let earliest = cfg.snapshots.first().copied().unwrap_or(u64::MAX);
    let ucmp: &Arc<dyn Comparator> = cfg.icmp.user_comparator();

    let mut kept = Vec::new();
    for (tomb_start, tomb_end, seq) in &cfg.range_tombstones {
        if cfg.bottommost && *seq <= earliest {
            // No snapshot and no deeper data can observe it.
            continue;
        }
        let mut clipped_start = tomb_start.clone();
        let mut clipped_end = tomb_end.clone();
        if let Some(s) = start
            && ucmp.compare(&clipped_start, s) == std::cmp::Ordering::Less
        {
            clipped_start = s.to_vec();
        }
        if let Some(e) = end
            && ucmp.compare(&clipped_end, e) == std::cmp::Ordering::Greater
        {
            clipped_end = e.to_vec();
        }
        if ucmp.compare(&clipped_start, &clipped_end) == std::cmp::Ordering::Less {
            kept.push((clipped_start, clipped_end, *seq));
        }
    }
    kept.sort_by(|a, b| ucmp.compare(&a.0, &b.0));
    kept
}
