//! FIFO compaction: age out whole files, never rewrite them.
//!
//! All files live at L0. When their total size exceeds
//! `max_table_files_size`, or a file's creation time falls outside the
//! TTL window, the oldest files are deleted outright. Data loss is by
//! design — FIFO is for caches and time-series retention.

use std::sync::Arc;

use tracing::debug;

use crate::manifest::{ColumnFamilyData, FileMetaHandle};

use super::{Compaction, CompactionKind};

/// Pick files to drop, oldest first. `creation_time` maps a file number
/// to its table's creation timestamp (seconds), when known.
pub fn pick(
    cfd: &ColumnFamilyData,
    now_secs: u64,
    creation_time: &dyn Fn(u64) -> Option<u64>,
) -> Option<Compaction> {
    let opts = &cfd.options;
    let files = cfd.current.files(0);
    if files.is_empty() {
        return None;
    }

    // Oldest last: L0 is ordered newest-first by largest sequence.
    let mut victims: Vec<FileMetaHandle> = Vec::new();

    if opts.ttl_seconds > 0 {
        let cutoff = now_secs.saturating_sub(opts.ttl_seconds);
        for file in files.iter().rev() {
            match creation_time(file.number) {
                Some(created) if created < cutoff => victims.push(Arc::clone(file)),
                _ => break,
            }
        }
    }

    let total: u64 = cfd.current.total_file_size(0);
    if total > opts.max_table_files_size {
        let mut excess = total - opts.max_table_files_size;
        for file in files.iter().rev() {
            if excess == 0 {
                break;
            }
            if victims.iter().any(|v| v.number == file.number) {
                continue;
            }
            victims.push(Arc::clone(file));
            excess = excess.saturating_sub(file.file_size);
        }
    }

    if victims.is_empty() {
        return None;
    }

    debug!(cf = cfd.id, dropped = victims.len(), "FIFO compaction picked");

    Some(Compaction {
        cf_id: cfd.id,
        kind: CompactionKind::Drop,
        start_level: 0,
        output_level: 0,
        inputs: [victims, Vec::new()],
        max_output_file_size: u64::MAX,
        compact_pointer: None,
        bottommost: false,
    })
}
