//! Filesystem abstraction and database file naming.
//!
//! The engine never touches the filesystem directly; every open, sync,
//! rename, delete, listing, and directory fsync goes through the [`Env`]
//! trait object carried in [`crate::options::Options`]. Faults propagate
//! as [`Status::Io`]; the core never bypasses the VFS.
//!
//! # Database directory layout
//!
//! | File | Purpose |
//! |------|---------|
//! | `CURRENT` | one-line pointer to the active MANIFEST |
//! | `MANIFEST-NNNNNN` | VersionEdit log using WAL record framing |
//! | `NNNNNN.log` | write-ahead log segments |
//! | `NNNNNN.sst` | sorted tables |
//! | `NNNNNN.blob` | blob files for large-value separation |
//! | `OPTIONS-NNNNNN` | options snapshot (written by external tooling) |
//! | `LOCK` | process lock file |
//!
//! # Locking
//!
//! [`Env::lock_file`] combines lock-file creation with an in-process lock
//! table, so two handles in the same process cannot open one database
//! concurrently. Cross-process advisory locking is delegated to the
//! platform by keeping the lock file open for the lifetime of the lock.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;
use tracing::warn;

use crate::error::{Result, Status};

// ------------------------------------------------------------------------------------------------
// File traits
// ------------------------------------------------------------------------------------------------

/// Append-only file handle.
pub trait WritableFile: Send {
    /// Append bytes to the end of the file.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Flush library buffers to the OS.
    fn flush(&mut self) -> Result<()>;

    /// Durably persist all written bytes.
    fn sync(&mut self) -> Result<()>;
}

/// Positioned-read file handle; shareable across threads.
pub trait RandomAccessFile: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Total file size in bytes.
    fn size(&self) -> u64;
}

/// Forward-only read handle used by log replay.
pub trait SequentialFile: Send {
    /// Read up to `buf.len()` bytes; returns the count read (0 = EOF).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Token returned by [`Env::lock_file`]; pass back to unlock.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

// ------------------------------------------------------------------------------------------------
// Env trait
// ------------------------------------------------------------------------------------------------

/// The filesystem gateway.
pub trait Env: Send + Sync {
    /// Create (truncating) a file for appending.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Open an existing file for positioned reads.
    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>>;

    /// Open an existing file for sequential reads.
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;

    /// Delete a file.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Atomic same-directory rename.
    fn rename_file(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Whether a path exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// File size in bytes.
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Names (not paths) of a directory's entries.
    fn list_dir(&self, dir: &Path) -> Result<Vec<String>>;

    /// Create a directory and its parents.
    fn create_dir_all(&self, dir: &Path) -> Result<()>;

    /// Fsync a directory so renames and creations inside it are durable.
    fn fsync_dir(&self, dir: &Path) -> Result<()>;

    /// Take the database lock.
    fn lock_file(&self, path: &Path) -> Result<FileLock>;

    /// Release a lock taken with [`Env::lock_file`].
    fn unlock_file(&self, lock: FileLock) -> Result<()>;

    /// Wall-clock microseconds since the epoch.
    fn now_micros(&self) -> u64;
}

// ------------------------------------------------------------------------------------------------
// Posix implementation
// ------------------------------------------------------------------------------------------------

/// [`Env`] backed by `std::fs` with mmap'd random-access reads.
#[derive(Debug, Default)]
pub struct PosixEnv;

struct PosixWritableFile {
    file: File,
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

struct PosixRandomAccessFile {
    map: Mmap,
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Status::corruption("read range overflows"))?;
        if end > self.map.len() {
            return Err(Status::corruption(format!(
                "read past end of file: offset {} len {} size {}",
                offset,
                len,
                self.map.len()
            )));
        }
        Ok(self.map[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.map.len() as u64
    }
}

struct PosixSequentialFile {
    file: File,
}

impl SequentialFile for PosixSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }
}

fn locked_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static LOCKS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashSet::new()))
}

impl Env for PosixEnv {
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(PosixWritableFile { file }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        // Safety contract of memmap: the engine never writes a file after
        // finalizing it, so the mapping stays consistent.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Box::new(PosixRandomAccessFile { map }))
    }

    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(path)?;
        Ok(Box::new(PosixSequentialFile { file }))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn rename_file(&self, src: &Path, dst: &Path) -> Result<()> {
        fs::rename(src, dst)?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn create_dir_all(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn fsync_dir(&self, dir: &Path) -> Result<()> {
        match File::open(dir) {
            Ok(f) => {
                f.sync_all()?;
                Ok(())
            }
            Err(e) => {
                // Some filesystems refuse to open directories; renames on
                // those are already durable.
                warn!(dir = %dir.display(), error = %e, "directory fsync skipped");
                Ok(())
            }
        }
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        let canonical = path.to_path_buf();
        {
            let mut table = locked_paths()
                .lock()
                .map_err(|_| Status::corruption("lock table poisoned"))?;
            if !table.insert(canonical.clone()) {
                return Err(Status::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    format!("lock already held: {}", path.display()),
                )));
            }
        }
        let file = match OpenOptions::new().create(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                if let Ok(mut table) = locked_paths().lock() {
                    table.remove(&canonical);
                }
                return Err(Status::Io(e));
            }
        };
        Ok(FileLock {
            path: canonical,
            _file: file,
        })
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        let mut table = locked_paths()
            .lock()
            .map_err(|_| Status::corruption("lock table poisoned"))?;
        table.remove(&lock.path);
        Ok(())
    }

    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

// ------------------------------------------------------------------------------------------------
// File naming
// ------------------------------------------------------------------------------------------------

/// Kind of a file inside the database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// `NNNNNN.log`
    WalFile,
    /// `NNNNNN.sst`
    TableFile,
    /// `NNNNNN.blob`
    BlobFile,
    /// `MANIFEST-NNNNNN`
    ManifestFile,
    /// `CURRENT`
    CurrentFile,
    /// `LOCK`
    LockFile,
    /// `OPTIONS-NNNNNN`
    OptionsFile,
    /// `NNNNNN.dbtmp` scratch files
    TempFile,
}

/// Path of WAL segment `number`.
pub fn log_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.log"))
}

/// Path of table file `number`.
pub fn table_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.sst"))
}

/// Path of blob file `number`.
pub fn blob_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.blob"))
}

/// Path of MANIFEST file `number`.
pub fn manifest_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("MANIFEST-{number:06}"))
}

/// Path of the CURRENT pointer file.
pub fn current_file_name(db: &Path) -> PathBuf {
    db.join("CURRENT")
}

/// Path of the LOCK file.
pub fn lock_file_name(db: &Path) -> PathBuf {
    db.join("LOCK")
}

/// Path of a temp scratch file for `number`.
pub fn temp_file_name(db: &Path, number: u64) -> PathBuf {
    db.join(format!("{number:06}.dbtmp"))
}

/// Classify a directory entry name; `None` for foreign files.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "CURRENT" {
        return Some((FileType::CurrentFile, 0));
    }
    if name == "LOCK" {
        return Some((FileType::LockFile, 0));
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        let number = rest.parse::<u64>().ok()?;
        return Some((FileType::ManifestFile, number));
    }
    if let Some(rest) = name.strip_prefix("OPTIONS-") {
        let number = rest.parse::<u64>().ok()?;
        return Some((FileType::OptionsFile, number));
    }
    let (stem, ext) = name.rsplit_once('.')?;
    let number = stem.parse::<u64>().ok()?;
    match ext {
        "log" => Some((FileType::WalFile, number)),
        "sst" => Some((FileType::TableFile, number)),
        "blob" => Some((FileType::BlobFile, number)),
        "dbtmp" => Some((FileType::TempFile, number)),
        _ => None,
    }
}

/// Write `CURRENT` atomically: temp file, fsync, rename, dir fsync.
pub fn set_current_file(env: &dyn Env, db: &Path, manifest_number: u64) -> Result<()> {
    let tmp = temp_file_name(db, manifest_number);
    let contents = format!("MANIFEST-{manifest_number:06}\n");
    {
        let mut file = env.new_writable_file(&tmp)?;
        file.append(contents.as_bytes())?;
        file.sync()?;
    }
    env.rename_file(&tmp, &current_file_name(db))?;
    env.fsync_dir(db)?;
    Ok(())
}

/// Read and validate `CURRENT`, returning the manifest file name.
pub fn read_current_file(env: &dyn Env, db: &Path) -> Result<String> {
    let mut file = env.new_sequential_file(&current_file_name(db))?;
    let mut contents = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        contents.extend_from_slice(&chunk[..n]);
    }
    let text = String::from_utf8(contents)
        .map_err(|_| Status::corruption("CURRENT is not valid UTF-8"))?;
    let name = text
        .strip_suffix('\n')
        .ok_or_else(|| Status::corruption("CURRENT missing trailing newline"))?;
    if !name.starts_with("MANIFEST-") {
        return Err(Status::corruption(format!("CURRENT malformed: {name:?}")));
    }
    Ok(name.to_string())
}
