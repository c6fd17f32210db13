//! Streaming WAL scans.
//!
//! A [`WalScan`] is a pull iterator over the rows of one WAL file. It owns
//! its own file handle and reads one record per `next()` through a fixed
//! size buffer, so stopping early (dropping the iterator) never leaves
//! the store locked and never reads more than the buffer ahead.
//!
//! The scan is bounded by the committed end of the file at the time it
//! was opened. A move or close of the store is observed on the next pull:
//! the scan yields [`WalError::Reopen`] or [`WalError::Closed`] once and
//! then ends.

use super::error::WalError;
use super::row::{WalEntry, WalRow};
use super::row_store::SharedState;
use crate::format::frame::{frame_size, FrameError, FRAME_LENGTH_SIZE};
use crate::format::wal_row::{RowRecord, RowRecordError};
use crate::stats::IoStats;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Why a record could not be read.
#[derive(Debug)]
pub(crate) enum RecordFailure {
    /// Record runs past the readable end
    Torn,
    /// Length prefix is garbage
    BadLength(usize),
    /// CRC mismatch; `record_end` is where the record claims to end
    Checksum { record_end: u64 },
    /// Frame intact but payload malformed
    Malformed(String),
    /// Underlying read failed
    Io(io::Error),
}

impl RecordFailure {
    pub(crate) fn into_wal_error(self, offset: u64) -> WalError {
        match self {
            RecordFailure::Torn => WalError::Truncated { offset },
            RecordFailure::BadLength(len) => WalError::Corrupt {
                offset,
                detail: format!("invalid record length {}", len),
            },
            RecordFailure::Checksum { .. } => WalError::Corrupt {
                offset,
                detail: "checksum mismatch".to_string(),
            },
            RecordFailure::Malformed(detail) => WalError::Corrupt { offset, detail },
            RecordFailure::Io(e) => WalError::Io(e),
        }
    }
}

/// Read the record starting at `position`, never reading past `end`.
///
/// Returns `Ok(None)` at `end`, otherwise the record and its encoded size.
pub(crate) fn read_record<R: Read>(
    reader: &mut R,
    position: u64,
    end: u64,
) -> Result<Option<(RowRecord, u64)>, RecordFailure> {
    if position >= end {
        return Ok(None);
    }
    if end - position < FRAME_LENGTH_SIZE as u64 {
        return Err(RecordFailure::Torn);
    }

    let mut prefix = [0u8; FRAME_LENGTH_SIZE];
    read_exact(reader, &mut prefix)?;
    let size = match frame_size(&prefix) {
        Ok(size) => size,
        Err(FrameError::InvalidLength(len)) => return Err(RecordFailure::BadLength(len)),
        Err(e) => return Err(RecordFailure::Malformed(e.to_string())),
    };
    if position + size as u64 > end {
        return Err(RecordFailure::Torn);
    }

    let mut buf = vec![0u8; size];
    buf[..FRAME_LENGTH_SIZE].copy_from_slice(&prefix);
    read_exact(reader, &mut buf[FRAME_LENGTH_SIZE..])?;

    match RowRecord::from_bytes(&buf) {
        Ok((record, consumed)) => Ok(Some((record, consumed as u64))),
        Err(e) if e.is_truncation() => Err(RecordFailure::Torn),
        Err(RowRecordError::Frame(FrameError::ChecksumMismatch { .. })) => {
            Err(RecordFailure::Checksum {
                record_end: position + size as u64,
            })
        }
        Err(e) => Err(RecordFailure::Malformed(e.to_string())),
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), RecordFailure> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RecordFailure::Torn
        } else {
            RecordFailure::Io(e)
        }
    })
}

/// Lazy, restartable scan over a WAL file.
///
/// Yields every row with `tx_id >= min_tx_id` in append order, tombstones
/// included.
pub struct WalScan {
    shared: Arc<SharedState>,
    stats: Arc<dyn IoStats>,
    reader: Option<BufReader<File>>,
    position: u64,
    end: u64,
    generation: u64,
    min_tx_id: u64,
    done: bool,
}

impl WalScan {
    pub(crate) fn open(
        shared: Arc<SharedState>,
        stats: Arc<dyn IoStats>,
        start: u64,
        end: u64,
        min_tx_id: u64,
        read_buffer_size: usize,
    ) -> Result<Self, WalError> {
        let generation = shared.generation.load(Ordering::Acquire);
        let path = shared.path.read().clone();

        let reader = if start < end {
            let mut file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    let now = shared.generation.load(Ordering::Acquire);
                    if now != generation {
                        return Err(WalError::Reopen { generation: now });
                    }
                    return Err(WalError::Io(e));
                }
            };
            file.seek(SeekFrom::Start(start))?;
            Some(BufReader::with_capacity(read_buffer_size, file))
        } else {
            None
        };

        Ok(WalScan {
            shared,
            stats,
            reader,
            position: start,
            end,
            generation,
            min_tx_id,
            done: false,
        })
    }

    /// Byte position of the next record to be read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Pull the next row together with its value.
    pub fn next_entry(&mut self) -> Option<Result<WalEntry, WalError>> {
        loop {
            if self.done {
                return None;
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Some(self.fail(WalError::Closed));
            }
            let generation = self.shared.generation.load(Ordering::Acquire);
            if generation != self.generation {
                return Some(self.fail(WalError::Reopen { generation }));
            }

            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => {
                    self.done = true;
                    return None;
                }
            };

            let fp = self.position;
            match read_record(reader, fp, self.end) {
                Ok(Some((record, size))) => {
                    self.position += size;
                    self.stats.record_read(size);
                    if record.tx_id < self.min_tx_id {
                        continue;
                    }
                    return Some(Ok(WalEntry::from_record(record, fp)));
                }
                Ok(None) => {
                    self.done = true;
                    self.reader = None;
                    return None;
                }
                Err(failure) => return Some(self.fail(failure.into_wal_error(fp))),
            }
        }
    }

    /// Turn this scan into an iterator of rows with values.
    pub fn into_entries(mut self) -> impl Iterator<Item = Result<WalEntry, WalError>> {
        std::iter::from_fn(move || self.next_entry())
    }

    fn fail<T>(&mut self, err: WalError) -> Result<T, WalError> {
        self.done = true;
        self.reader = None;
        Err(err)
    }
}

impl Iterator for WalScan {
    type Item = Result<WalRow, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|r| r.map(|entry| entry.row))
    }
}

impl std::fmt::Debug for WalScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalScan")
            .field("position", &self.position)
            .field("end", &self.end)
            .field("generation", &self.generation)
            .field("min_tx_id", &self.min_tx_id)
            .field("done", &self.done)
            .finish()
    }
}
