//! # Manifest Component
//!
//! The central metadata authority: which table files exist at which
//! level, per column family, plus the global counters (`NextFileNumber`,
//! `LastSequence`, per-CF `LogNumber`).
//!
//! ## Model
//!
//! - A [`Version`] is an immutable snapshot of one column family's
//!   per-level file sets. Readers pin a version with an `Arc` for the
//!   duration of a get or iterator; files are deleted only when no
//!   version references them.
//! - A [`VersionEdit`] describes a delta (files added/deleted, counter
//!   floors, column family create/drop).
//! - The [`VersionSet`] owns the MANIFEST log: `log_and_apply` appends
//!   the edit with fsync, then — and only then — installs the new
//!   version in memory. On any error the in-memory state is unchanged
//!   and the MANIFEST tail is not advanced.
//!
//! ## Recovery
//!
//! `CURRENT` names the active MANIFEST; the MANIFEST is replayed in
//! strict mode (any checksum fault is a hard corruption failure),
//! rebuilding every column family's version and restoring the counters.
//! A comparator-name mismatch is fatal. Unknown tags carrying the
//! safe-ignore bit are preserved and re-emitted with the next snapshot.

pub mod edit;


pub use edit::{FileMetaData, FileMetaHandle, VersionEdit};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::comparator::InternalKeyComparator;
use crate::env::{Env, manifest_file_name, read_current_file, set_current_file};
use crate::error::{Result, Status};
use crate::options::ColumnFamilyOptions;
use crate::types::{
    ColumnFamilyId, DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME, SequenceNumber,
    extract_user_key,
};
use crate::wal::{LogReader, LogWriter, ReplayMode};

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// Immutable per-level file sets of one column family.
///
/// L0 files may overlap and are ordered newest-first (largest sequence
/// first); L1+ files are pairwise disjoint and sorted by smallest key.
#[derive(Debug)]
pub struct Version {
    files: Vec<Vec<FileMetaHandle>>,
}

impl Version {
    /// Empty version with `num_levels` levels.
    pub fn new(num_levels: usize) -> Version {
        Version {
            files: vec![Vec::new(); num_levels],
        }
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.files.len()
    }

    /// Files in `level`, in that level's canonical order.
    pub fn files(&self, level: usize) -> &[FileMetaHandle] {
        &self.files[level]
    }

    /// File count in `level`.
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Sum of file sizes in `level`.
    pub fn total_file_size(&self, level: usize) -> u64 {
        self.files[level].iter().map(|f| f.file_size).sum()
    }

    /// Every file number referenced by this version.
    pub fn collect_live_files(&self, out: &mut HashSet<u64>) {
        for level in &self.files {
            for file in level {
                out.insert(file.number);
            }
        }
    }

    /// Whether `file` overlaps the user-key range `[begin, end]`
    /// (`None` = unbounded).
    fn file_overlaps_range(
        icmp: &InternalKeyComparator,
        file: &FileMetaData,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> bool {
        let file_start = extract_user_key(&file.smallest);
        let file_limit = extract_user_key(&file.largest);
        if let Some(begin) = begin
            && icmp.compare_user_keys(file_limit, begin) == std::cmp::Ordering::Less
        {
            return false;
        }
        if let Some(end) = end
            && icmp.compare_user_keys(file_start, end) == std::cmp::Ordering::Greater
        {
            return false;
        }
        true
    }

    /// Files in `level` overlapping the user-key range `[begin, end]`.
    ///
    /// For L0 the range grows to each overlapping file's bounds and the
    /// scan restarts, because L0 files overlap each other: a compaction
    /// taking one must take every transitive overlap.
    pub fn overlapping_files(
        &self,
        icmp: &InternalKeyComparator,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<FileMetaHandle> {
        let mut begin = begin.map(|b| b.to_vec());
        let mut end = end.map(|e| e.to_vec());
        let mut inputs: Vec<FileMetaHandle> = Vec::new();

        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;
            if !Self::file_overlaps_range(icmp, file, begin.as_deref(), end.as_deref()) {
                continue;
            }
            if level == 0 {
                let file_start = extract_user_key(&file.smallest);
                let file_limit = extract_user_key(&file.largest);
                let mut widened = false;
                if let Some(b) = &begin
                    && icmp.compare_user_keys(file_start, b) == std::cmp::Ordering::Less
                {
                    begin = Some(file_start.to_vec());
                    widened = true;
                }
                if let Some(e) = &end
                    && icmp.compare_user_keys(file_limit, e) == std::cmp::Ordering::Greater
                {
                    end = Some(file_limit.to_vec());
                    widened = true;
                }
                if widened {
                    inputs.clear();
                    i = 0;
                    continue;
                }
            }
            inputs.push(Arc::clone(file));
        }
        inputs
    }
}

/// Build a new version by applying `edit` to `base`.
///
/// Fails without side effects when the edit produces an inconsistent
/// level (overlapping files above L0).
pub fn apply_edit(
    icmp: &InternalKeyComparator,
    base: &Version,
    edit: &VersionEdit,
) -> Result<Arc<Version>> {
    let mut files = base.files.clone();

    for (level, number) in &edit.deleted_files {
        if *level >= files.len() {
            return Err(Status::corruption(format!(
                "version edit deletes from level {level} beyond num_levels"
            )));
        }
        files[*level].retain(|f| f.number != *number);
    }

    for (level, meta) in &edit.new_files {
        if *level >= files.len() {
            return Err(Status::corruption(format!(
                "version edit adds to level {level} beyond num_levels"
            )));
        }
        files[*level].push(Arc::new(meta.clone()));
    }

    // Restore each level's canonical order.
    files[0].sort_by(|a, b| b.largest_seq.cmp(&a.largest_seq));
    for level_files in files.iter_mut().skip(1) {
        level_files.sort_by(|a, b| icmp.compare(&a.smallest, &b.smallest));
    }

    // Levels above L0 must stay pairwise disjoint.
    for (level, level_files) in files.iter().enumerate().skip(1) {
        for pair in level_files.windows(2) {
            if icmp.compare(&pair[0].largest, &pair[1].smallest) != std::cmp::Ordering::Less {
                return Err(Status::corruption(format!(
                    "overlapping files {} and {} at level {level}",
                    pair[0].number, pair[1].number
                )));
            }
        }
    }

    Ok(Arc::new(Version { files }))
}

// ------------------------------------------------------------------------------------------------
// Column family data
// ------------------------------------------------------------------------------------------------

/// Durable metadata of one column family inside the version set.
pub struct ColumnFamilyData {
    /// Stable id; 0 is the default column family.
    pub id: ColumnFamilyId,
    /// Unique name.
    pub name: String,
    /// Configuration (owns the comparator the files are sorted by).
    pub options: ColumnFamilyOptions,
    /// Internal-key comparator derived from `options.comparator`.
    pub icmp: InternalKeyComparator,
    /// Current version; readers clone the `Arc` to pin it.
    pub current: Arc<Version>,
    /// WAL segments numbered below this are fully flushed for this CF.
    pub log_number: u64,
    /// Per-level round-robin compaction cursors.
    pub compact_pointers: Vec<Vec<u8>>,
    /// Safe-to-ignore MANIFEST tags carried for re-emit.
    pub unknown_tags: Vec<(u32, Vec<u8>)>,
}

impl ColumnFamilyData {
    fn new(id: ColumnFamilyId, name: String, options: ColumnFamilyOptions) -> ColumnFamilyData {
        let icmp = InternalKeyComparator::new(options.comparator.clone());
        let num_levels = options.num_levels;
        ColumnFamilyData {
            id,
            name,
            options,
            icmp,
            current: Arc::new(Version::new(num_levels)),
            log_number: 0,
            compact_pointers: vec![Vec::new(); num_levels],
            unknown_tags: Vec::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// VersionSet
// ------------------------------------------------------------------------------------------------

/// Owner of all version state and the MANIFEST log.
///
/// All mutation funnels through [`VersionSet::log_and_apply`] (or the CF
/// create/drop variants); the engine serializes callers with its central
/// mutex.
pub struct VersionSet {
    env: Arc<dyn Env>,
    dbname: PathBuf,

    cfs: HashMap<ColumnFamilyId, ColumnFamilyData>,
    names: HashMap<String, ColumnFamilyId>,

    next_file_number: u64,
    manifest_file_number: u64,
    last_sequence: SequenceNumber,
    max_column_family: ColumnFamilyId,

    manifest_log: Option<LogWriter>,
}

impl VersionSet {
    /// Empty version set rooted at `dbname`.
    pub fn new(env: Arc<dyn Env>, dbname: &Path) -> VersionSet {
        VersionSet {
            env,
            dbname: dbname.to_path_buf(),
            cfs: HashMap::new(),
            names: HashMap::new(),
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            max_column_family: 0,
            manifest_log: None,
        }
    }

    /// Allocate a fresh file number.
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Ensure the counter stays above an externally observed number.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Globally last assigned sequence.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    /// Publish a new last sequence; must be monotonic.
    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = seq;
    }

    /// The active MANIFEST's file number.
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// Column family by id.
    pub fn cf(&self, id: ColumnFamilyId) -> Option<&ColumnFamilyData> {
        self.cfs.get(&id)
    }

    /// Column family by id, mutable.
    pub fn cf_mut(&mut self, id: ColumnFamilyId) -> Option<&mut ColumnFamilyData> {
        self.cfs.get_mut(&id)
    }

    /// Column family id by name.
    pub fn cf_id_by_name(&self, name: &str) -> Option<ColumnFamilyId> {
        self.names.get(name).copied()
    }

    /// All column family ids, ascending.
    pub fn cf_ids(&self) -> Vec<ColumnFamilyId> {
        let mut ids: Vec<_> = self.cfs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Register a column family in memory (no MANIFEST write).
    pub fn register_cf(
        &mut self,
        id: ColumnFamilyId,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<()> {
        if self.cfs.contains_key(&id) || self.names.contains_key(name) {
            return Err(Status::ColumnFamilyExists(name.to_string()));
        }
        self.names.insert(name.to_string(), id);
        self.cfs
            .insert(id, ColumnFamilyData::new(id, name.to_string(), options));
        self.max_column_family = self.max_column_family.max(id);
        Ok(())
    }

    /// Smallest `log_number` across column families — the WAL replay
    /// floor.
    pub fn min_log_number(&self) -> u64 {
        self.cfs.values().map(|cf| cf.log_number).min().unwrap_or(0)
    }

    /// File numbers referenced by any current version.
    pub fn live_file_numbers(&self) -> HashSet<u64> {
        let mut live = HashSet::new();
        for cf in self.cfs.values() {
            cf.current.collect_live_files(&mut live);
        }
        live
    }

    // --------------------------------------------------------------------------------------------
    // LogAndApply
    // --------------------------------------------------------------------------------------------

    /// Append `edit` to the MANIFEST with fsync, then install the new
    /// version for `cf_id`. Atomic: on error nothing changes in memory.
    pub fn log_and_apply(&mut self, cf_id: ColumnFamilyId, edit: &mut VersionEdit) -> Result<()> {
        let cfd = self
            .cfs
            .get(&cf_id)
            .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf_id}")))?;

        edit.column_family = cf_id;
        if edit.log_number.is_none() {
            edit.log_number = Some(cfd.log_number);
        }
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);

        // Build the new version first; a bad edit must not reach disk.
        let new_version = apply_edit(&cfd.icmp, &cfd.current, edit)?;

        let log = self
            .manifest_log
            .as_mut()
            .ok_or_else(|| Status::corruption("MANIFEST writer not open"))?;
        log.add_record(&edit.encode())?;
        log.sync()?;

        let cfd = self.cfs.get_mut(&cf_id).expect("checked above");
        cfd.current = new_version;
        if let Some(n) = edit.log_number {
            cfd.log_number = n;
        }
        for (level, key) in &edit.compact_pointers {
            if *level < cfd.compact_pointers.len() {
                cfd.compact_pointers[*level] = key.clone();
            }
        }

        debug!(
            cf = cf_id,
            added = edit.new_files.len(),
            deleted = edit.deleted_files.len(),
            "version edit applied"
        );
        Ok(())
    }

    /// Create a column family durably: MANIFEST record first, then the
    /// in-memory registration.
    pub fn log_and_apply_cf_add(
        &mut self,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<ColumnFamilyId> {
        if self.names.contains_key(name) {
            return Err(Status::ColumnFamilyExists(name.to_string()));
        }
        let id = self.max_column_family + 1;

        let edit = VersionEdit {
            column_family: id,
            column_family_add: Some(name.to_string()),
            comparator_name: Some(options.comparator.name().to_string()),
            max_column_family: Some(id),
            next_file_number: Some(self.next_file_number),
            last_sequence: Some(self.last_sequence),
            ..Default::default()
        };

        let log = self
            .manifest_log
            .as_mut()
            .ok_or_else(|| Status::corruption("MANIFEST writer not open"))?;
        log.add_record(&edit.encode())?;
        log.sync()?;

        self.register_cf(id, name, options)?;
        info!(cf = id, name, "column family created");
        Ok(id)
    }

    /// Drop a column family durably.
    pub fn log_and_apply_cf_drop(&mut self, cf_id: ColumnFamilyId) -> Result<()> {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            return Err(Status::CannotDropDefaultCf);
        }
        let name = self
            .cfs
            .get(&cf_id)
            .ok_or_else(|| Status::ColumnFamilyNotFound(format!("id {cf_id}")))?
            .name
            .clone();

        let edit = VersionEdit {
            column_family: cf_id,
            column_family_drop: true,
            next_file_number: Some(self.next_file_number),
            last_sequence: Some(self.last_sequence),
            ..Default::default()
        };

        let log = self
            .manifest_log
            .as_mut()
            .ok_or_else(|| Status::corruption("MANIFEST writer not open"))?;
        log.add_record(&edit.encode())?;
        log.sync()?;

        self.cfs.remove(&cf_id);
        self.names.remove(&name);
        info!(cf = cf_id, name, "column family dropped");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Snapshot + CURRENT
    // --------------------------------------------------------------------------------------------

    /// Start a fresh MANIFEST holding a full snapshot of the current
    /// state, then repoint CURRENT at it.
    pub fn write_snapshot_new_manifest(&mut self) -> Result<()> {
        let manifest_number = self.new_file_number();
        let path = manifest_file_name(&self.dbname, manifest_number);
        let file = self.env.new_writable_file(&path)?;
        let mut log = LogWriter::new(file);

        for id in self.cf_ids() {
            let cfd = &self.cfs[&id];

            if id != DEFAULT_COLUMN_FAMILY_ID {
                let add = VersionEdit {
                    column_family: id,
                    column_family_add: Some(cfd.name.clone()),
                    ..Default::default()
                };
                log.add_record(&add.encode())?;
            }

            let mut state = VersionEdit {
                column_family: id,
                comparator_name: Some(cfd.options.comparator.name().to_string()),
                log_number: Some(cfd.log_number),
                next_file_number: Some(self.next_file_number),
                last_sequence: Some(self.last_sequence),
                max_column_family: Some(self.max_column_family),
                unknown_tags: cfd.unknown_tags.clone(),
                ..Default::default()
            };
            for (level, files) in cfd.current.files.iter().enumerate() {
                for file in files {
                    state.new_files.push((level, (**file).clone()));
                }
                if !cfd.compact_pointers[level].is_empty() {
                    state
                        .compact_pointers
                        .push((level, cfd.compact_pointers[level].clone()));
                }
            }
            log.add_record(&state.encode())?;
        }

        log.sync()?;
        set_current_file(self.env.as_ref(), &self.dbname, manifest_number)?;
        self.manifest_file_number = manifest_number;
        self.manifest_log = Some(log);

        info!(manifest = manifest_number, "MANIFEST snapshot written");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Recovery
    // --------------------------------------------------------------------------------------------

    /// Rebuild state from CURRENT + MANIFEST.
    ///
    /// `descriptors` supplies options per column family name; families
    /// found in the MANIFEST without a descriptor reuse the default
    /// family's options.
    pub fn recover(&mut self, descriptors: &HashMap<String, ColumnFamilyOptions>) -> Result<()> {
        let manifest_name = read_current_file(self.env.as_ref(), &self.dbname)?;
        let manifest_path = self.dbname.join(&manifest_name);
        info!(manifest = %manifest_name, "recovering version state");

        let file = self.env.new_sequential_file(&manifest_path)?;
        let mut reader = LogReader::new(file, ReplayMode::Strict);

        let default_options = descriptors
            .get(DEFAULT_COLUMN_FAMILY_NAME)
            .cloned()
            .unwrap_or_default();

        // The default family exists before any edit mentions it.
        if !self.cfs.contains_key(&DEFAULT_COLUMN_FAMILY_ID) {
            self.register_cf(
                DEFAULT_COLUMN_FAMILY_ID,
                DEFAULT_COLUMN_FAMILY_NAME,
                default_options.clone(),
            )?;
        }

        while let Some(record) = reader.read_record()? {
            let edit = VersionEdit::decode(&record)?;
            let cf_id = edit.column_family;

            if let Some(name) = &edit.column_family_add {
                let options = descriptors
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| default_options.clone());
                if let Some(expected) = &edit.comparator_name
                    && expected != options.comparator.name()
                {
                    return Err(Status::corruption(format!(
                        "comparator mismatch for column family {name}: \
                         MANIFEST has {expected}, options have {}",
                        options.comparator.name()
                    )));
                }
                self.register_cf(cf_id, name, options)?;
                continue;
            }

            if edit.column_family_drop {
                if let Some(cfd) = self.cfs.remove(&cf_id) {
                    self.names.remove(&cfd.name);
                } else {
                    warn!(cf = cf_id, "drop record for unknown column family");
                }
                continue;
            }

            let Some(cfd) = self.cfs.get_mut(&cf_id) else {
                return Err(Status::corruption(format!(
                    "version edit references unknown column family {cf_id}"
                )));
            };

            if let Some(name) = &edit.comparator_name
                && name != cfd.options.comparator.name()
            {
                return Err(Status::corruption(format!(
                    "comparator mismatch: MANIFEST has {name}, options have {}",
                    cfd.options.comparator.name()
                )));
            }

            cfd.current = apply_edit(&cfd.icmp, &cfd.current, &edit)?;
            if let Some(n) = edit.log_number {
                cfd.log_number = n;
            }
            for (level, key) in &edit.compact_pointers {
                if *level < cfd.compact_pointers.len() {
                    cfd.compact_pointers[*level] = key.clone();
                }
            }
            cfd.unknown_tags.extend(edit.unknown_tags.iter().cloned());

            for (_, meta) in &edit.new_files {
                // Defensive floor: never re-issue a number some edit
                // already placed on disk.
                self.mark_file_number_used(meta.number);
            }
            if let Some(n) = edit.next_file_number {
                self.mark_file_number_used(n.saturating_sub(1));
            }
            if let Some(n) = edit.last_sequence {
                self.last_sequence = self.last_sequence.max(n);
            }
            if let Some(n) = edit.max_column_family {
                self.max_column_family = self.max_column_family.max(n);
            }
        }

        // Never reuse the recovered MANIFEST's own number.
        if let Some((_, number)) = crate::env::parse_file_name(&manifest_name) {
            self.mark_file_number_used(number);
        }

        info!(
            cfs = self.cfs.len(),
            next_file = self.next_file_number,
            last_sequence = self.last_sequence,
            "version state recovered"
        );
        Ok(())
    }
}
