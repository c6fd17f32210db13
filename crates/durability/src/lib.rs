//! Durability layer for Tideline
//!
//! This crate handles everything that touches disk:
//!
//! - WAL: Append-only row store, one file per versioned partition
//! - Backing stores: where row files live and how their buffers grow
//! - Recovery: Torn-tail truncation and tx index rebuild on open
//! - Highwater journal: Durable remote and local highwaters
//! - Binary on-disk formats (row files, journal)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backing; // BackingStore trait and directory implementation
pub mod format; // Binary on-disk formats (frames, row records, journal entries)
pub mod journal; // Highwater journal (append, replay, compaction)
pub mod stats; // I/O accounting hooks
pub mod wal; // WAL row store, scans, config

// === Re-exports ===
pub use backing::{BackingFile, BackingStore, DirectoryBackingStore, GrowthPolicy, RelocateError};
pub use journal::{HighwaterJournal, JournalError, JournalState, JOURNAL_FILE_NAME};
pub use stats::{IoCounters, IoStats, NoopIoStats};
pub use wal::{
    RecoveryReport, RecoveryStop, WalConfig, WalConfigError, WalEntry, WalError, WalRow,
    WalRowDraft, WalRowStore, WalScan,
};
