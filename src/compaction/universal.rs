//! Universal (size-tiered) compaction selection.
//!
//! The version is viewed as a stack of sorted runs: every L0 file is its
//! own run, and each non-empty deeper level is one run. A compaction
//! merges all runs into a single sorted run placed at the deepest level,
//! triggered by either run count or size amplification.

use tracing::debug;

use crate::manifest::{ColumnFamilyData, FileMetaHandle};

use super::{Compaction, CompactionKind};

/// Ratio of (everything else) to (largest run) that triggers a
/// size-amplification compaction.
const MAX_SIZE_AMPLIFICATION: f64 = 2.0;

/// Pick a universal compaction, or `None` when the run stack is calm.
pub fn pick(cfd: &ColumnFamilyData) -> Option<Compaction> {
    let opts = &cfd.options;
    let version = &cfd.current;

    let num_runs: usize = version.num_files(0)
        + (1..opts.num_levels)
            .filter(|&l| version.num_files(l) > 0)
            .count();
    if num_runs < 2 {
        return None;
    }

    let count_triggered = num_runs >= opts.level0_file_num_compaction_trigger;

    // Size amplification: all newer runs against the single oldest one.
    let last_level = (1..opts.num_levels)
        .rev()
        .find(|&l| version.num_files(l) > 0);
    let size_triggered = match last_level {
        Some(level) => {
            let oldest = version.total_file_size(level) as f64;
            let newer: u64 = version.total_file_size(0)
                + (1..level).map(|l| version.total_file_size(l)).sum::<u64>();
            oldest > 0.0 && newer as f64 / oldest >= MAX_SIZE_AMPLIFICATION
        }
        None => false,
    };

    if !count_triggered && !size_triggered {
        return None;
    }

    // Merge every run; the single output run lands on the deepest level.
    let output_level = opts.num_levels - 1;
    let mut start_inputs: Vec<FileMetaHandle> = version.files(0).to_vec();
    for level in 1..opts.num_levels - 1 {
        start_inputs.extend_from_slice(version.files(level));
    }
    let output_inputs: Vec<FileMetaHandle> = version.files(output_level).to_vec();

    if start_inputs.is_empty() && output_inputs.len() <= 1 {
        return None;
    }

    debug!(
        cf = cfd.id,
        num_runs,
        count_triggered,
        size_triggered,
        "universal compaction picked"
    );

    Some(Compaction {
        cf_id: cfd.id,
        kind: CompactionKind::Merge,
        start_level: 0,
        output_level,
        bottommost: true,
        inputs: [start_inputs, output_inputs],
        max_output_file_size: u64::MAX,
        compact_pointer: None,
    })
}
