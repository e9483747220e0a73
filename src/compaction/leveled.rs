//! Leveled compaction selection.
//!
//! Each level gets a score: L0 by file count against its trigger, L1+
//! by total bytes against the level's byte budget. The loudest level at
//! or above 1.0 is compacted into the next level.
//!
//! Input selection follows the classic shape: for L0, all files
//! (transitively expanded by user-key overlap) plus every overlapping
//! L1 file; for Li (i >= 1), the next file after the level's round-robin
//! cursor plus every overlapping Li+1 file. The Li set is then grown
//! while doing so does not pull in additional Li+1 files.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::manifest::{ColumnFamilyData, FileMetaHandle};
use crate::types::extract_user_key;

use super::{Compaction, CompactionKind};

/// Compute the compaction score of every level; `(level, score)` of the
/// loudest level.
fn pick_loudest_level(cfd: &ColumnFamilyData) -> Option<(usize, f64)> {
    let opts = &cfd.options;
    let version = &cfd.current;
    let mut best: Option<(usize, f64)> = None;

    for level in 0..opts.num_levels - 1 {
        let score = if level == 0 {
            version.num_files(0) as f64 / opts.level0_file_num_compaction_trigger as f64
        } else {
            version.total_file_size(level) as f64 / opts.max_bytes_for_level(level) as f64
        };
        if score >= 1.0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((level, score));
        }
    }
    best
}

/// User-key range covered by `files`.
fn key_range<'a>(
    cfd: &ColumnFamilyData,
    files: &'a [FileMetaHandle],
) -> Option<(&'a [u8], &'a [u8])> {
    let mut smallest: Option<&[u8]> = None;
    let mut largest: Option<&[u8]> = None;
    for file in files {
        let start = extract_user_key(&file.smallest);
        let limit = extract_user_key(&file.largest);
        if smallest.is_none_or(|s| cfd.icmp.compare_user_keys(start, s) == Ordering::Less) {
            smallest = Some(start);
        }
        if largest.is_none_or(|l| cfd.icmp.compare_user_keys(limit, l) == Ordering::Greater) {
            largest = Some(limit);
        }
    }
    Some((smallest?, largest?))
}

/// Whether any level below `output_level` holds a file overlapping
/// `[begin, end]`.
fn range_reaches_deeper(
    cfd: &ColumnFamilyData,
    output_level: usize,
    begin: &[u8],
    end: &[u8],
) -> bool {
    for level in output_level + 1..cfd.options.num_levels {
        if !cfd
            .current
            .overlapping_files(&cfd.icmp, level, Some(begin), Some(end))
            .is_empty()
        {
            return true;
        }
    }
    false
}

/// Pick a leveled compaction, or `None` when every level is in budget.
pub fn pick(cfd: &ColumnFamilyData) -> Option<Compaction> {
    let (level, score) = pick_loudest_level(cfd)?;
    let opts = &cfd.options;
    let version = &cfd.current;
    let output_level = level + 1;

    let mut level_inputs: Vec<FileMetaHandle> = if level == 0 {
        // L0 files overlap each other; take the transitive closure of
        // the whole set.
        version.files(0).to_vec()
    } else {
        // Round-robin: first file past the cursor, wrapping.
        let cursor = &cfd.compact_pointers[level];
        let files = version.files(level);
        let picked = files
            .iter()
            .find(|f| {
                cursor.is_empty() || cfd.icmp.compare(&f.largest, cursor) == Ordering::Greater
            })
            .or_else(|| files.first())?;
        vec![Arc::clone(picked)]
    };

    if level_inputs.is_empty() {
        return None;
    }

    let (begin, end) = {
        let (b, e) = key_range(cfd, &level_inputs)?;
        (b.to_vec(), e.to_vec())
    };
    let mut output_inputs =
        version.overlapping_files(&cfd.icmp, output_level, Some(begin.as_slice()), Some(end.as_slice()));

    // Try growing the start-level set: more files now means fewer
    // compactions later, but only if the output-level set stays put.
    if !output_inputs.is_empty() && level > 0 {
        let (all_begin, all_end) = {
            let combined: Vec<_> = level_inputs
                .iter()
                .chain(output_inputs.iter())
                .cloned()
                .collect();
            let (b, e) = key_range(cfd, &combined)?;
            (b.to_vec(), e.to_vec())
        };
        let expanded =
            version.overlapping_files(&cfd.icmp, level, Some(all_begin.as_slice()), Some(all_end.as_slice()));
        if expanded.len() > level_inputs.len() {
            let expanded_output =
                version.overlapping_files(&cfd.icmp, output_level, Some(all_begin.as_slice()), Some(all_end.as_slice()));
            if expanded_output.len() == output_inputs.len() {
                level_inputs = expanded;
                output_inputs = expanded_output;
            }
        }
    }

    let (final_begin, final_end) = {
        let combined: Vec<_> = level_inputs
            .iter()
            .chain(output_inputs.iter())
            .cloned()
            .collect();
        let (b, e) = key_range(cfd, &combined)?;
        (b.to_vec(), e.to_vec())
    };

    let compact_pointer = level_inputs
        .iter()
        .map(|f| f.largest.clone())
        .max_by(|a, b| cfd.icmp.compare(a, b))
        .map(|key| (level, key));

    debug!(
        cf = cfd.id,
        level,
        score,
        inputs = level_inputs.len(),
        overlaps = output_inputs.len(),
        "leveled compaction picked"
    );

    Some(Compaction {
        cf_id: cfd.id,
        kind: CompactionKind::Merge,
        start_level: level,
        output_level,
        bottommost: !range_reaches_deeper(cfd, output_level, &final_begin, &final_end),
        inputs: [level_inputs, output_inputs],
        max_output_file_size: opts.target_file_size(output_level),
        compact_pointer,
    })
}
