//! WAL configuration.
//!
//! This module provides configuration for the WAL row store.

use crate::format::frame::MAX_FRAME_LENGTH;
use tideline_core::Durability;

/// WAL configuration parameters.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// When appends are fsynced (default: async, 100ms).
    pub durability: Durability,

    /// Initial capacity of the append buffer in bytes (default: 64KB).
    ///
    /// The buffer grows through the backing store's growth policy when a
    /// batch does not fit.
    pub initial_buffer_size: u64,

    /// Read-ahead buffer used by scans (default: 64KB).
    ///
    /// This bounds how far a scan reads past the row it last returned.
    pub read_buffer_size: usize,

    /// Largest encoded row accepted by `append` (default: 16MB).
    pub max_row_bytes: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            durability: Durability::default(),
            initial_buffer_size: 64 * 1024,   // 64KB
            read_buffer_size: 64 * 1024,      // 64KB
            max_row_bytes: 16 * 1024 * 1024,  // 16MB
        }
    }
}

impl WalConfig {
    /// Create a new WAL configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set durability (builder pattern).
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Set scan read-ahead size (builder pattern).
    pub fn with_read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    /// Set maximum row size (builder pattern).
    pub fn with_max_row_bytes(mut self, bytes: usize) -> Self {
        self.max_row_bytes = bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), WalConfigError> {
        if self.read_buffer_size < 512 {
            return Err(WalConfigError::ReadBufferTooSmall);
        }
        if self.max_row_bytes == 0 || self.max_row_bytes > MAX_FRAME_LENGTH {
            return Err(WalConfigError::MaxRowOutOfRange);
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small buffers, fsync always).
    pub fn for_testing() -> Self {
        WalConfig {
            durability: Durability::FsyncAlways,
            initial_buffer_size: 1024,
            read_buffer_size: 4 * 1024,
            max_row_bytes: 1024 * 1024,
        }
    }
}

/// WAL configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalConfigError {
    /// Read-ahead buffer is too small (minimum 512 bytes).
    #[error("Read buffer size must be at least 512 bytes")]
    ReadBufferTooSmall,

    /// Row size limit is zero or above the frame limit.
    #[error("Max row size must be between 1 byte and the frame limit")]
    MaxRowOutOfRange,
}
