//! Append-only WAL row store.
//!
//! One store owns one row file obtained from a [`BackingStore`]. Appends
//! are serialized by the writer lock; readers never take it. Scans open
//! their own file handle and are bounded by the committed end observed
//! when they start, so a concurrent append can never hand them a torn
//! record.
//!
//! # Transaction ids
//!
//! Every call to [`WalRowStore::append`] assigns the next transaction id
//! to all rows of the batch. Ids start at 1 and are strictly increasing in
//! append order, so file order and tx order coincide.
//!
//! # Lifecycle
//!
//! - `move_to` relocates the file atomically and bumps the store
//!   generation; active scans observe the bump and yield `Reopen`.
//! - `close` is idempotent; every later operation fails with `Closed`.

use super::config::WalConfig;
use super::error::WalError;
use super::row::{WalEntry, WalRow, WalRowDraft};
use super::scan::{read_record, RecordFailure, WalScan};
use crate::backing::{BackingFile, BackingStore};
use crate::format::frame::{find_intact_frame, MIN_FRAME_SIZE};
use crate::format::wal_row::{RowFileHeader, ROW_FILE_HEADER_SIZE};
use crate::stats::{IoStats, NoopIoStats};
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tideline_core::Durability;
use tracing::{debug, info, warn};

/// State visible to scans without taking the writer lock.
#[derive(Debug)]
pub(crate) struct SharedState {
    /// Current path of the row file
    pub(crate) path: RwLock<PathBuf>,
    /// Bumped on every move
    pub(crate) generation: AtomicU64,
    /// Set once by close
    pub(crate) closed: AtomicBool,
    /// End of the last fully written record
    pub(crate) committed_end: AtomicU64,
    /// Highest assigned tx id (0 = none)
    pub(crate) last_tx_id: AtomicU64,
    /// First record offset of every transaction, ascending
    pub(crate) tx_index: RwLock<Vec<(u64, u64)>>,
}

struct WriterState {
    handle: Option<BackingFile>,
    write_buf: Vec<u8>,
    buf_capacity: u64,
    last_sync: Instant,
    unsynced: bool,
}

/// How recovery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryStop {
    /// Every byte parsed
    EndOfData,
    /// A partial or garbage trailing record was cut off
    TruncatedTail {
        /// Offset where the bad tail began
        offset: u64,
    },
}

/// Summary of opening an existing row file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rows found
    pub rows_recovered: u64,
    /// Highest tx id found
    pub last_tx_id: Option<u64>,
    /// End of the valid region
    pub valid_end: u64,
    /// Bytes removed from the tail
    pub truncated_bytes: u64,
    /// Why recovery stopped
    pub stop: RecoveryStop,
}

/// Append-only log of rows for one versioned partition.
pub struct WalRowStore {
    backing: Arc<dyn BackingStore>,
    index: u64,
    config: WalConfig,
    stats: Arc<dyn IoStats>,
    writer: Mutex<WriterState>,
    reader: Mutex<Option<File>>,
    shared: Arc<SharedState>,
}

impl WalRowStore {
    /// Open (or create) the row file for `index`.
    ///
    /// Existing files are scanned to rebuild the tx index. A torn or
    /// garbage tail is truncated and reported, together with any
    /// transaction left without its batch end. Damage followed by intact
    /// records is a hard [`WalError::Corrupt`].
    pub fn open(
        backing: Arc<dyn BackingStore>,
        index: u64,
        config: WalConfig,
    ) -> Result<(Self, RecoveryReport), WalError> {
        Self::open_with_stats(backing, index, config, Arc::new(NoopIoStats))
    }

    /// Open with an I/O accounting sink.
    pub fn open_with_stats(
        backing: Arc<dyn BackingStore>,
        index: u64,
        config: WalConfig,
        stats: Arc<dyn IoStats>,
    ) -> Result<(Self, RecoveryReport), WalError> {
        config.validate()?;
        let mut handle = backing.allocate(index, config.initial_buffer_size)?;
        let file_len = handle.file().metadata()?.len();

        if file_len < ROW_FILE_HEADER_SIZE as u64 {
            if file_len > 0 {
                warn!(
                    path = %handle.path().display(),
                    file_len,
                    "Discarding partial WAL header"
                );
            }
            let file = handle.file_mut();
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&RowFileHeader::new(index).to_bytes())?;
            file.sync_all()?;
        } else {
            let mut header_bytes = [0u8; ROW_FILE_HEADER_SIZE];
            let file = handle.file_mut();
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut header_bytes)?;
            let header = RowFileHeader::from_bytes(&header_bytes)
                .ok_or_else(|| WalError::InvalidHeader("unreadable header".to_string()))?;
            if !header.is_valid() {
                return Err(WalError::InvalidHeader(format!(
                    "bad magic or version in {}",
                    handle.path().display()
                )));
            }
        }

        let recover_end = file_len.max(ROW_FILE_HEADER_SIZE as u64);
        let (tx_index, report) = Self::recover(&mut handle, recover_end)?;
        stats.record_read(report.valid_end);

        if report.truncated_bytes > 0 {
            warn!(
                path = %handle.path().display(),
                valid_end = report.valid_end,
                truncated_bytes = report.truncated_bytes,
                "Truncated torn WAL tail"
            );
        }
        debug!(
            path = %handle.path().display(),
            rows = report.rows_recovered,
            last_tx_id = ?report.last_tx_id,
            "Opened WAL row store"
        );

        let reader = File::open(handle.path())?;
        let buf_capacity = handle.capacity();
        let shared = Arc::new(SharedState {
            path: RwLock::new(handle.path().to_path_buf()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            committed_end: AtomicU64::new(report.valid_end),
            last_tx_id: AtomicU64::new(report.last_tx_id.unwrap_or(0)),
            tx_index: RwLock::new(tx_index),
        });

        let store = WalRowStore {
            backing,
            index,
            config,
            stats,
            writer: Mutex::new(WriterState {
                handle: Some(handle),
                write_buf: Vec::with_capacity(buf_capacity as usize),
                buf_capacity,
                last_sync: Instant::now(),
                unsynced: false,
            }),
            reader: Mutex::new(Some(reader)),
            shared,
        };
        Ok((store, report))
    }

    fn recover(
        handle: &mut BackingFile,
        file_len: u64,
    ) -> Result<(Vec<(u64, u64)>, RecoveryReport), WalError> {
        let header_end = ROW_FILE_HEADER_SIZE as u64;
        let mut tx_index: Vec<(u64, u64)> = Vec::new();
        let mut rows_recovered = 0u64;
        let mut last_tx_id: Option<u64> = None;
        let mut position = header_end;
        let mut stop = RecoveryStop::EndOfData;
        // (start offset, rows) of a transaction whose batch end is unseen
        let mut open_tx: Option<(u64, u64)> = None;

        {
            let mut file = handle.file();
            file.seek(SeekFrom::Start(header_end))?;
            let mut reader = BufReader::new(file);
            loop {
                match read_record(&mut reader, position, file_len) {
                    Ok(Some((record, size))) => {
                        let continues = last_tx_id == Some(record.tx_id);
                        if let Some(last) = last_tx_id {
                            if record.tx_id < last {
                                return Err(WalError::Corrupt {
                                    offset: position,
                                    detail: format!(
                                        "tx id {} follows {}",
                                        record.tx_id, last
                                    ),
                                });
                            }
                        }
                        if continues != open_tx.is_some() {
                            return Err(WalError::Corrupt {
                                offset: position,
                                detail: format!(
                                    "tx {} breaks the batch boundary of tx {:?}",
                                    record.tx_id, last_tx_id
                                ),
                            });
                        }
                        if !continues {
                            tx_index.push((record.tx_id, position));
                            open_tx = Some((position, 0));
                        }
                        if let Some((_, rows)) = open_tx.as_mut() {
                            *rows += 1;
                        }
                        if record.batch_end {
                            open_tx = None;
                        }
                        last_tx_id = Some(record.tx_id);
                        rows_recovered += 1;
                        position += size;
                    }
                    Ok(None) => break,
                    Err(RecordFailure::Torn) | Err(RecordFailure::BadLength(_)) => {
                        if Self::intact_record_follows(handle.file(), position, file_len)? {
                            return Err(WalError::Corrupt {
                                offset: position,
                                detail: "damaged record followed by intact records".to_string(),
                            });
                        }
                        stop = RecoveryStop::TruncatedTail { offset: position };
                        break;
                    }
                    Err(RecordFailure::Checksum { record_end }) if record_end >= file_len => {
                        stop = RecoveryStop::TruncatedTail { offset: position };
                        break;
                    }
                    Err(failure) => return Err(failure.into_wal_error(position)),
                }
            }
        }

        if let Some((start, rows)) = open_tx {
            warn!(
                tx_id = ?last_tx_id,
                offset = start,
                rows,
                "Dropping transaction torn mid-batch"
            );
            tx_index.pop();
            last_tx_id = tx_index.last().map(|(tx_id, _)| *tx_id);
            rows_recovered -= rows;
            position = start;
            stop = RecoveryStop::TruncatedTail { offset: start };
        }

        let truncated_bytes = file_len - position;
        if truncated_bytes > 0 {
            let file = handle.file_mut();
            file.set_len(position)?;
            file.sync_all()?;
        }

        Ok((
            tx_index,
            RecoveryReport {
                rows_recovered,
                last_tx_id,
                valid_end: position,
                truncated_bytes,
                stop,
            },
        ))
    }

    /// Whether a checksum-valid frame starts anywhere after `position`.
    fn intact_record_follows(
        mut file: &File,
        position: u64,
        file_len: u64,
    ) -> Result<bool, WalError> {
        if file_len - position <= MIN_FRAME_SIZE as u64 {
            return Ok(false);
        }
        let mut rest = Vec::with_capacity((file_len - position) as usize);
        file.seek(SeekFrom::Start(position))?;
        file.take(file_len - position).read_to_end(&mut rest)?;
        Ok(find_intact_frame(&rest).is_some())
    }

    /// Backing-store index of this file
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Current path of the row file
    pub fn path(&self) -> PathBuf {
        self.shared.path.read().clone()
    }

    /// Store generation (bumped on every move)
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Highest assigned transaction id
    pub fn last_tx_id(&self) -> Option<u64> {
        match self.shared.last_tx_id.load(Ordering::Acquire) {
            0 => None,
            tx_id => Some(tx_id),
        }
    }

    /// Bytes in the file (header included)
    pub fn size_in_bytes(&self) -> Result<u64, WalError> {
        self.ensure_open()?;
        Ok(self.shared.committed_end.load(Ordering::Acquire))
    }

    fn ensure_open(&self) -> Result<(), WalError> {
        if self.is_closed() {
            Err(WalError::Closed)
        } else {
            Ok(())
        }
    }

    /// Append a batch of rows under one new transaction id.
    ///
    /// On I/O failure the file is cut back to its previous end and no
    /// transaction id is consumed.
    pub fn append(&self, rows: &[WalRowDraft]) -> Result<u64, WalError> {
        if rows.is_empty() {
            return Err(WalError::EmptyBatch);
        }

        let mut guard = self.writer.lock();
        let writer = &mut *guard;
        if writer.handle.is_none() || self.is_closed() {
            return Err(WalError::Closed);
        }

        let last = self.shared.last_tx_id.load(Ordering::Acquire);
        let tx_id = last.checked_add(1).ok_or(WalError::TxIdOverflow)?;

        writer.write_buf.clear();
        let last_row = rows.len() - 1;
        for (i, row) in rows.iter().enumerate() {
            let bytes = row.to_record(tx_id, i == last_row).to_bytes();
            if bytes.len() > self.config.max_row_bytes {
                return Err(WalError::RowTooLarge {
                    size: bytes.len(),
                    max: self.config.max_row_bytes,
                });
            }
            let needed = (writer.write_buf.len() + bytes.len()) as u64;
            if needed > writer.buf_capacity {
                writer.buf_capacity = self.backing.next_size(writer.buf_capacity, needed);
                let additional = writer.buf_capacity as usize - writer.write_buf.len();
                writer.write_buf.reserve(additional);
            }
            writer.write_buf.extend_from_slice(&bytes);
        }

        let start = self.shared.committed_end.load(Ordering::Acquire);
        let len = writer.write_buf.len() as u64;
        let handle = writer.handle.as_mut().ok_or(WalError::Closed)?;
        let written = {
            let file = handle.file_mut();
            file.seek(SeekFrom::Start(start))
                .and_then(|_| file.write_all(&writer.write_buf))
        };
        if let Err(e) = written {
            if let Err(cut) = handle.file().set_len(start) {
                warn!(error = %cut, start, "Failed to cut back WAL after write error");
            }
            return Err(WalError::Io(e));
        }
        writer.unsynced = true;
        self.stats.record_write(len);

        if let Err(e) = self.apply_durability(writer) {
            if let Some(handle) = writer.handle.as_ref() {
                if let Err(cut) = handle.file().set_len(start) {
                    warn!(error = %cut, start, "Failed to cut back WAL after sync error");
                }
            }
            return Err(e);
        }

        self.shared.tx_index.write().push((tx_id, start));
        self.shared.last_tx_id.store(tx_id, Ordering::Release);
        self.shared
            .committed_end
            .store(start + len, Ordering::Release);

        Ok(tx_id)
    }

    fn apply_durability(&self, writer: &mut WriterState) -> Result<(), WalError> {
        let due = match self.config.durability {
            Durability::FsyncAlways => true,
            Durability::FsyncAsync { interval_ms } => {
                writer.last_sync.elapsed().as_millis() as u64 >= interval_ms
            }
            Durability::Ephemeral => false,
        };
        if due {
            Self::sync_writer(writer)?;
        }
        Ok(())
    }

    fn sync_writer(writer: &mut WriterState) -> Result<(), WalError> {
        if let Some(handle) = writer.handle.as_ref() {
            handle.file().sync_data()?;
        }
        writer.unsynced = false;
        writer.last_sync = Instant::now();
        Ok(())
    }

    /// Force durability of everything appended so far.
    ///
    /// With `fsync == false` this only reports whether unsynced data
    /// exists; appends are never held in user-space buffers.
    pub fn flush(&self, fsync: bool) -> Result<bool, WalError> {
        let mut writer = self.writer.lock();
        if writer.handle.is_none() {
            return Err(WalError::Closed);
        }
        let had_unsynced = writer.unsynced;
        if fsync && had_unsynced {
            Self::sync_writer(&mut writer)?;
        }
        Ok(had_unsynced)
    }

    /// Sync if the async interval has elapsed and there is unsynced data.
    ///
    /// Call periodically so `FsyncAsync` honors its interval even when no
    /// new appends arrive. Returns `true` if a sync was performed.
    pub fn sync_if_overdue(&self) -> Result<bool, WalError> {
        let mut writer = self.writer.lock();
        if writer.handle.is_none() || !writer.unsynced {
            return Ok(false);
        }
        if let Durability::FsyncAsync { interval_ms } = self.config.durability {
            if writer.last_sync.elapsed().as_millis() as u64 >= interval_ms {
                Self::sync_writer(&mut writer)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read the row (and value) whose record starts at `fp`.
    pub fn read_at(&self, fp: u64) -> Result<WalEntry, WalError> {
        self.ensure_open()?;
        let end = self.shared.committed_end.load(Ordering::Acquire);
        if fp < ROW_FILE_HEADER_SIZE as u64 || fp >= end {
            return Err(WalError::InvalidPosition(fp));
        }

        let mut guard = self.reader.lock();
        let file = guard.as_mut().ok_or(WalError::Closed)?;
        file.seek(SeekFrom::Start(fp))?;
        let mut reader = BufReader::with_capacity(self.config.read_buffer_size, &*file);
        match read_record(&mut reader, fp, end) {
            Ok(Some((record, size))) => {
                self.stats.record_read(size);
                Ok(WalEntry::from_record(record, fp))
            }
            Ok(None) => Err(WalError::InvalidPosition(fp)),
            Err(failure) => Err(failure.into_wal_error(fp)),
        }
    }

    /// Fetch the value payload located by `fp`.
    pub fn read_value(&self, fp: u64) -> Result<Option<Vec<u8>>, WalError> {
        Ok(self.read_at(fp)?.value)
    }

    /// Scan every row with `tx_id >= from_tx_id`, in append order.
    pub fn scan_from(&self, from_tx_id: u64) -> Result<WalScan, WalError> {
        self.ensure_open()?;
        let end = self.shared.committed_end.load(Ordering::Acquire);
        let start = {
            let index = self.shared.tx_index.read();
            let i = index.partition_point(|&(tx_id, _)| tx_id < from_tx_id);
            index.get(i).map(|&(_, offset)| offset).unwrap_or(end)
        };
        WalScan::open(
            Arc::clone(&self.shared),
            Arc::clone(&self.stats),
            start.min(end),
            end,
            from_tx_id,
            self.config.read_buffer_size,
        )
    }

    /// Scan every row.
    pub fn scan(&self) -> Result<WalScan, WalError> {
        self.scan_from(0)
    }

    /// Scan the records between two byte positions.
    ///
    /// `start_fp` must be a record boundary (a row's `fp` or the header
    /// end); `end_fp` is clamped to the committed end.
    pub fn scan_range(&self, start_fp: u64, end_fp: u64) -> Result<WalScan, WalError> {
        self.ensure_open()?;
        let committed = self.shared.committed_end.load(Ordering::Acquire);
        if start_fp < ROW_FILE_HEADER_SIZE as u64 || start_fp > committed {
            return Err(WalError::InvalidPosition(start_fp));
        }
        let end = end_fp.min(committed).max(start_fp);
        WalScan::open(
            Arc::clone(&self.shared),
            Arc::clone(&self.stats),
            start_fp,
            end,
            0,
            self.config.read_buffer_size,
        )
    }

    /// Scan rows with the given prefix from `from_tx_id` onward.
    ///
    /// Errors are passed through so the caller still sees truncation,
    /// corruption and reopen signals.
    pub fn scan_keys(
        &self,
        from_tx_id: u64,
        prefix: Vec<u8>,
    ) -> Result<impl Iterator<Item = Result<WalRow, WalError>>, WalError> {
        let scan = self.scan_from(from_tx_id)?;
        Ok(scan.filter(move |row| match row {
            Ok(row) => row.prefix.as_deref() == Some(prefix.as_slice()),
            Err(_) => true,
        }))
    }

    /// Atomically move the row file into `dest_dir`.
    ///
    /// Holds the writer lock for the duration, so no append interleaves.
    /// Active scans yield [`WalError::Reopen`] on their next pull.
    pub fn move_to(&self, dest_dir: &Path) -> Result<PathBuf, WalError> {
        let mut writer = self.writer.lock();
        let handle = writer.handle.take().ok_or(WalError::Closed)?;
        let old_path = handle.path().to_path_buf();
        let capacity = writer.buf_capacity;

        let moved = match self.backing.relocate(handle, dest_dir) {
            Ok(moved) => moved,
            Err(e) => {
                warn!(
                    error = %e.source,
                    location = %e.location.display(),
                    "WAL move failed"
                );
                self.reopen_after_failed_move(&mut writer, e.location, capacity);
                return Err(WalError::Io(e.source));
            }
        };

        let new_path = moved.path().to_path_buf();
        writer.handle = Some(moved);
        writer.unsynced = false;
        *self.shared.path.write() = new_path.clone();
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.reader.lock() = Some(File::open(&new_path)?);

        info!(
            from = %old_path.display(),
            to = %new_path.display(),
            generation,
            "Moved WAL row file"
        );
        Ok(new_path)
    }

    /// Reattach to the file wherever a failed move left it. Never creates a
    /// file; if nothing can be opened the store is closed.
    fn reopen_after_failed_move(
        &self,
        writer: &mut WriterState,
        location: PathBuf,
        capacity: u64,
    ) {
        let current = self.path();
        let candidates = if location == current {
            vec![location]
        } else {
            vec![location, current]
        };
        for path in candidates {
            match BackingFile::open_existing(self.index, path.clone(), capacity) {
                Ok(reopened) => {
                    if path != self.path() {
                        *self.shared.path.write() = path.clone();
                        self.shared.generation.fetch_add(1, Ordering::AcqRel);
                        *self.reader.lock() = File::open(&path).ok();
                    }
                    writer.handle = Some(reopened);
                    info!(path = %path.display(), "Reattached WAL after failed move");
                    return;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %path.display(),
                        "Cannot reopen WAL after failed move"
                    );
                }
            }
        }
        self.shared.closed.store(true, Ordering::Release);
        *self.reader.lock() = None;
    }

    /// Release the file. Idempotent.
    pub fn close(&self) -> Result<(), WalError> {
        let mut writer = self.writer.lock();
        self.shared.closed.store(true, Ordering::Release);
        *self.reader.lock() = None;
        match writer.handle.take() {
            Some(handle) => {
                self.backing.close(vec![handle])?;
                debug!(index = self.index, "Closed WAL row store");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for WalRowStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, index = self.index, "Error closing WAL row store on drop");
        }
    }
}

impl std::fmt::Debug for WalRowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalRowStore")
            .field("index", &self.index)
            .field("path", &self.path())
            .field("last_tx_id", &self.last_tx_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
