//! WAL row store errors.

use super::config::WalConfigError;
use std::io;
use thiserror::Error;

/// Errors from WAL row store operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Storage I/O failed
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record inside the written region failed its checksum or could not
    /// be parsed
    #[error("Corrupt WAL record at offset {offset}: {detail}")]
    Corrupt {
        /// Byte offset of the bad record
        offset: u64,
        /// What was wrong
        detail: String,
    },

    /// A record ends past the readable region (torn write)
    #[error("Truncated WAL record at offset {offset}")]
    Truncated {
        /// Byte offset of the partial record
        offset: u64,
    },

    /// The file header is missing or unrecognized
    #[error("Invalid WAL header: {0}")]
    InvalidHeader(String),

    /// The store has been closed
    #[error("WAL store is closed")]
    Closed,

    /// The file moved while a reader was active; reopen the scan
    #[error("WAL moved during read (now generation {generation}); reopen")]
    Reopen {
        /// Store generation after the move
        generation: u64,
    },

    /// `append` was called with no rows
    #[error("Cannot append an empty batch")]
    EmptyBatch,

    /// A row exceeds the configured limit
    #[error("Row of {size} bytes exceeds limit of {max}")]
    RowTooLarge {
        /// Encoded row size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// A position does not address a record start inside the file
    #[error("Invalid WAL position {0}")]
    InvalidPosition(u64),

    /// Transaction ids exhausted
    #[error("Transaction id overflow")]
    TxIdOverflow,

    /// Configuration rejected
    #[error("Invalid WAL config: {0}")]
    Config(#[from] WalConfigError),
}

impl WalError {
    /// True when the error marks the end of what was safely written
    /// rather than a hard failure.
    pub fn is_truncation(&self) -> bool {
        matches!(self, WalError::Truncated { .. })
    }
}

impl From<WalError> for tideline_core::Error {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => tideline_core::Error::Io(io),
            WalError::Corrupt { .. } | WalError::Truncated { .. } | WalError::InvalidHeader(_) => {
                tideline_core::Error::Corruption(e.to_string())
            }
            WalError::Closed => tideline_core::Error::Closed(e.to_string()),
            WalError::Reopen { .. } => tideline_core::Error::Conflict(e.to_string()),
            WalError::EmptyBatch
            | WalError::RowTooLarge { .. }
            | WalError::InvalidPosition(_)
            | WalError::TxIdOverflow
            | WalError::Config(_) => tideline_core::Error::InvalidInput(e.to_string()),
        }
    }
}
