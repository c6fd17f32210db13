//! Error types for Tideline
//!
//! Every crate in the workspace defines its own error enum for the
//! operations it owns and converts into [`Error`] at crate boundaries.
//! The variants keep the distinctions callers act on: a not-found
//! partition means "retry elsewhere", a stale version means "this epoch is
//! dead, drop it".

use crate::types::{PartitionName, RingMember, VersionedPartitionName};
use std::io;
use thiserror::Error;

/// Result type alias for Tideline operations
pub type Result<T> = std::result::Result<T, Error>;

/// What a not-found error refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// Partition unknown to this node
    Partition(PartitionName),
    /// Ring member unknown
    Member(RingMember),
    /// Ring unknown
    Ring(String),
}

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFound::Partition(p) => write!(f, "partition {}", p),
            NotFound::Member(m) => write!(f, "member {}", m),
            NotFound::Ring(r) => write!(f, "ring {}", r),
        }
    }
}

/// Error types for Tideline
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (storage unavailable, permissions, ...)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Referenced entity is unknown
    #[error("Not found: {0}")]
    NotFound(NotFound),

    /// Versioned partition no longer matches the current epoch
    #[error("Stale version for {partition}: requested v{requested}, current v{current}")]
    StaleVersion {
        /// Logical partition
        partition: PartitionName,
        /// Version the caller referenced
        requested: u64,
        /// Version the registry holds
        current: u64,
    },

    /// Versioned partition was deleted; no further state is accepted
    #[error("Partition retired: {0}")]
    Retired(VersionedPartitionName),

    /// A move or close raced with an active reader
    #[error("Concurrent mutation conflict: {0}")]
    Conflict(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Operation on a closed resource
    #[error("Closed: {0}")]
    Closed(String),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a not-found error for a partition
    pub fn partition_not_found(partition: PartitionName) -> Self {
        Error::NotFound(NotFound::Partition(partition))
    }

    /// Build an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// True for errors a caller may retry against another member
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::NotFound(_) | Error::Conflict(_))
    }

    /// True when the referenced partition epoch is dead
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::StaleVersion { .. } | Error::Retired(_))
    }

    /// True when the referenced entity is unknown
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
