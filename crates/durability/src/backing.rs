//! Backing-store abstraction for WAL row files.
//!
//! The WAL row store does not decide where its bytes live. It asks a
//! [`BackingStore`] for a file keyed by an index, asks it how large the
//! next write buffer should be, and hands its handles back on close.
//!
//! [`DirectoryBackingStore`] is the provided implementation: one file per
//! index inside a directory, named `wal-NNNNNNNN.rows`.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// An open file handed out by a [`BackingStore`].
#[derive(Debug)]
pub struct BackingFile {
    index: u64,
    path: PathBuf,
    file: File,
    capacity: u64,
}

impl BackingFile {
    /// Index this file was allocated under
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Current path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying file handle
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Mutable file handle
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Buffer capacity granted at allocation
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Open an existing file at `path` for read and write. Never creates.
    pub fn open_existing(index: u64, path: PathBuf, capacity: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(BackingFile {
            index,
            path,
            file,
            capacity,
        })
    }
}

/// A failed [`BackingStore::relocate`].
///
/// The handle is consumed either way; `location` is where the file can be
/// reopened from.
#[derive(Debug, thiserror::Error)]
#[error("relocate failed, file is at {}: {source}", .location.display())]
pub struct RelocateError {
    /// Underlying failure
    #[source]
    pub source: io::Error,
    /// Path the file lives at after the failure
    pub location: PathBuf,
}

impl RelocateError {
    fn at(location: &Path) -> impl FnOnce(io::Error) -> RelocateError + '_ {
        move |source| RelocateError {
            source,
            location: location.to_path_buf(),
        }
    }
}

/// Supplier of growable, file-backed buffers.
pub trait BackingStore: Send + Sync + fmt::Debug {
    /// Open (creating if needed) the file for `index`.
    ///
    /// `size` is the requested initial buffer capacity.
    fn allocate(&self, index: u64, size: u64) -> io::Result<BackingFile>;

    /// Capacity to grow to when a buffer of `old_len` must hold `position` bytes.
    fn next_size(&self, old_len: u64, position: u64) -> u64;

    /// Release handles, syncing each one first.
    fn close(&self, handles: Vec<BackingFile>) -> io::Result<()>;

    /// Move a file into `dest_dir`, returning the reopened handle.
    ///
    /// Readers holding the old path either keep the pre-move file open or
    /// fail to reopen it; they never observe a partially copied file. On
    /// failure the error names the path the file ended up at.
    fn relocate(
        &self,
        handle: BackingFile,
        dest_dir: &Path,
    ) -> Result<BackingFile, RelocateError>;

    /// Path the file for `index` would live at.
    fn path_for(&self, index: u64) -> PathBuf;
}

/// Buffer growth policy: double until `max_step`, then grow linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Smallest capacity ever granted
    pub min_size: u64,
    /// Largest single growth step
    pub max_step: u64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        GrowthPolicy {
            min_size: 64 * 1024,
            max_step: 16 * 1024 * 1024,
        }
    }
}

impl GrowthPolicy {
    /// Compute the next capacity.
    ///
    /// Always returns a value >= `position` and >= `min_size`.
    pub fn next_size(&self, old_len: u64, position: u64) -> u64 {
        let mut size = old_len.max(self.min_size);
        while size < position {
            size = size.saturating_add(size.min(self.max_step));
        }
        size
    }
}

/// One file per index inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryBackingStore {
    dir: PathBuf,
    growth: GrowthPolicy,
}

impl DirectoryBackingStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DirectoryBackingStore {
            dir,
            growth: GrowthPolicy::default(),
        })
    }

    /// Use a custom growth policy (builder pattern).
    pub fn with_growth(mut self, growth: GrowthPolicy) -> Self {
        self.growth = growth;
        self
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for an index.
    ///
    /// Format: `wal-NNNNNNNN.rows` where NNNNNNNN is the zero-padded index.
    pub fn file_name(index: u64) -> String {
        format!("wal-{:08}.rows", index)
    }

    /// Parse an index back out of a file name.
    pub fn parse_file_name(name: &str) -> Option<u64> {
        name.strip_prefix("wal-")?
            .strip_suffix(".rows")?
            .parse::<u64>()
            .ok()
    }

    /// List every index with a file in the directory, sorted.
    pub fn list_indexes(&self) -> io::Result<Vec<u64>> {
        let mut indexes = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(index) = Self::parse_file_name(&name) {
                indexes.push(index);
            }
        }
        indexes.sort_unstable();
        Ok(indexes)
    }
}

impl BackingStore for DirectoryBackingStore {
    fn allocate(&self, index: u64, size: u64) -> io::Result<BackingFile> {
        let path = self.path_for(index);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        Ok(BackingFile {
            index,
            path,
            file,
            capacity: self.growth.next_size(0, size),
        })
    }

    fn next_size(&self, old_len: u64, position: u64) -> u64 {
        self.growth.next_size(old_len, position)
    }

    fn close(&self, handles: Vec<BackingFile>) -> io::Result<()> {
        for handle in handles {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    fn relocate(
        &self,
        handle: BackingFile,
        dest_dir: &Path,
    ) -> Result<BackingFile, RelocateError> {
        let BackingFile {
            index,
            path,
            file,
            capacity,
        } = handle;
        fs::create_dir_all(dest_dir).map_err(RelocateError::at(&path))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "backing file has no name"))
            .map_err(RelocateError::at(&path))?;
        let dest = dest_dir.join(file_name);

        file.sync_all().map_err(RelocateError::at(&path))?;
        drop(file);

        if let Err(rename_err) = fs::rename(&path, &dest) {
            // Rename cannot cross filesystems; copy into a temp name, sync,
            // then rename within the destination so the final name only ever
            // points at a complete file.
            tracing::debug!(
                from = %path.display(),
                to = %dest.display(),
                error = %rename_err,
                "rename failed, falling back to copy"
            );
            let tmp = dest.with_extension("rows.tmp");
            let copied = fs::copy(&path, &tmp)
                .and_then(|_| File::open(&tmp)?.sync_all())
                .and_then(|_| fs::rename(&tmp, &dest));
            if let Err(e) = copied {
                let _ = fs::remove_file(&tmp);
                return Err(RelocateError::at(&path)(e));
            }
            fs::remove_file(&path).map_err(RelocateError::at(&dest))?;
        }
        sync_dir(dest_dir).map_err(RelocateError::at(&dest))?;

        BackingFile::open_existing(index, dest.clone(), capacity).map_err(RelocateError::at(&dest))
    }

    fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(Self::file_name(index))
    }
}

/// fsync a directory so renames inside it are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
