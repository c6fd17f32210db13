//! Highwater store errors.

use super::config::HighwaterConfigError;
use thiserror::Error;
use tideline_core::VersionedPartitionName;
use tideline_durability::JournalError;

/// Errors from highwater store operations.
#[derive(Debug, Error)]
pub enum HighwaterError {
    /// The durable journal write failed; memory was not changed
    #[error("Highwater journal error: {0}")]
    Journal(#[from] JournalError),

    /// The partition version was deleted; it accepts no further writes
    #[error("Partition {0} has been retired")]
    Retired(VersionedPartitionName),

    /// The caller's pre-flush hook failed; nothing was written
    #[error("Pre-flush hook failed: {0}")]
    PreFlush(String),

    /// Configuration rejected
    #[error("Invalid highwater config: {0}")]
    Config(#[from] HighwaterConfigError),
}

impl HighwaterError {
    /// True when the partition epoch is dead and the caller should drop it.
    pub fn is_retired(&self) -> bool {
        matches!(self, HighwaterError::Retired(_))
    }
}

impl From<HighwaterError> for tideline_core::Error {
    fn from(e: HighwaterError) -> Self {
        match e {
            HighwaterError::Journal(journal) => journal.into(),
            HighwaterError::Retired(partition) => tideline_core::Error::Retired(partition),
            HighwaterError::PreFlush(msg) => tideline_core::Error::Conflict(msg),
            HighwaterError::Config(config) => tideline_core::Error::InvalidInput(config.to_string()),
        }
    }
}
