//! On-disk byte formats for WAL row files and the highwater journal.
//!
//! This module centralizes all serialization logic for persistent storage.
//! Keeping serialization separate from operational logic (how files are
//! appended, scanned, and moved) makes format evolution easier to manage.
//!
//! # Module Structure
//!
//! - `frame`: Length-prefixed, CRC-checked record framing shared by both files
//! - `wal_row`: Row file header and row record format
//! - `journal`: Highwater journal header and entry format

pub mod frame;
pub mod journal;
pub mod wal_row;

pub use frame::{
    decode_frame, encode_frame, find_intact_frame, frame_size, FrameError, MAX_FRAME_LENGTH,
    MIN_FRAME_SIZE,
};
pub use journal::{
    JournalEntry, JournalEntryError, JournalHeader, LocalHighwater, RemoteHighwater,
    JOURNAL_ENTRY_FORMAT_VERSION, JOURNAL_FORMAT_VERSION, JOURNAL_HEADER_SIZE, JOURNAL_MAGIC,
};
pub use wal_row::{
    RowFileHeader, RowRecord, RowRecordError, ROW_FILE_FORMAT_VERSION, ROW_FILE_HEADER_SIZE,
    ROW_FILE_MAGIC, ROW_RECORD_FORMAT_VERSION,
};
