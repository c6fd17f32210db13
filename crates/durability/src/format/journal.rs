//! Highwater journal file format.
//!
//! # File Layout
//!
//! ```text
//! ┌───────────────────────────────────┐
//! │ Header (16 bytes)                 │
//! ├───────────────────────────────────┤
//! │ Entry 1 (framed)                  │
//! ├───────────────────────────────────┤
//! │ Entry 2 (framed)                  │
//! ├───────────────────────────────────┤
//! │ ...                               │
//! └───────────────────────────────────┘
//! ```
//!
//! Each entry is a [`JournalEntry`] encoded with MessagePack inside the
//! shared CRC frame (see [`super::frame`]). One flush is one entry, so a
//! flush is either fully replayed or not at all.

use super::frame::{decode_frame, encode_frame, FrameError};
use serde::{Deserialize, Serialize};
use tideline_core::{RingMember, VersionedPartitionName};

/// Magic bytes identifying a highwater journal: "TDHW"
pub const JOURNAL_MAGIC: [u8; 4] = *b"TDHW";

/// Current journal file format version
pub const JOURNAL_FORMAT_VERSION: u32 = 1;

/// Size of the journal header in bytes
pub const JOURNAL_HEADER_SIZE: usize = 16;

/// Current entry format version
pub const JOURNAL_ENTRY_FORMAT_VERSION: u8 = 1;

/// Journal header (16 bytes).
///
/// `epoch` increments on every compaction rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    /// Magic bytes: "TDHW"
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u32,
    /// Rewrite counter
    pub epoch: u64,
}

impl JournalHeader {
    /// Create a header for the given epoch.
    pub fn new(epoch: u64) -> Self {
        JournalHeader {
            magic: JOURNAL_MAGIC,
            format_version: JOURNAL_FORMAT_VERSION,
            epoch,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut bytes = [0u8; JOURNAL_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.epoch.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; JOURNAL_HEADER_SIZE]) -> Option<Self> {
        Some(JournalHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            epoch: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
        })
    }

    /// Validate magic bytes and version.
    pub fn is_valid(&self) -> bool {
        self.magic == JOURNAL_MAGIC && self.format_version == JOURNAL_FORMAT_VERSION
    }
}

/// A durable remote highwater: how far `member` has taken from `partition`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHighwater {
    /// Partition version the highwater belongs to
    pub partition: VersionedPartitionName,
    /// Remote ring member
    pub member: RingMember,
    /// Highest transaction id taken
    pub tx_id: u64,
}

/// A durable local highwater for one partition version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalHighwater {
    /// Partition version
    pub partition: VersionedPartitionName,
    /// Local transaction id
    pub tx_id: u64,
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// A batch of flushed highwaters
    Flush {
        /// Remote highwaters in this flush
        remote: Vec<RemoteHighwater>,
        /// Local highwaters in this flush
        local: Vec<LocalHighwater>,
    },
    /// One member's highwater for one partition version was cleared
    Clear {
        /// Partition version
        partition: VersionedPartitionName,
        /// Member whose highwater was cleared
        member: RingMember,
    },
    /// One member's highwaters were cleared across all partitions
    ClearRing {
        /// Member whose highwaters were cleared
        member: RingMember,
    },
    /// A partition version was retired
    Delete {
        /// Retired partition version
        partition: VersionedPartitionName,
    },
}

/// Journal entry codec errors.
#[derive(Debug, thiserror::Error)]
pub enum JournalEntryError {
    /// Frame-level failure
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Payload did not decode
    #[error("Entry decode failed: {0}")]
    Decode(String),

    /// Entry did not encode
    #[error("Entry encode failed: {0}")]
    Encode(String),
}

impl JournalEntry {
    /// Encode as a framed record.
    pub fn to_bytes(&self) -> Result<Vec<u8>, JournalEntryError> {
        let payload =
            rmp_serde::to_vec(self).map_err(|e| JournalEntryError::Encode(e.to_string()))?;
        Ok(encode_frame(JOURNAL_ENTRY_FORMAT_VERSION, &payload))
    }

    /// Decode one framed record from the front of `bytes`.
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), JournalEntryError> {
        let (payload, consumed) = decode_frame(bytes, JOURNAL_ENTRY_FORMAT_VERSION)?;
        let entry = rmp_serde::from_slice(payload)
            .map_err(|e| JournalEntryError::Decode(e.to_string()))?;
        Ok((entry, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideline_core::{PartitionName, RingName};

    fn vpn(name: &str, version: u64) -> VersionedPartitionName {
        let ring = RingName::new("ring").unwrap();
        VersionedPartitionName::new(PartitionName::new(ring, name.as_bytes().to_vec()), version)
    }

    #[test]
    fn test_header_roundtrip() {
        let header = JournalHeader::new(7);
        let parsed = JournalHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.is_valid());
    }

    #[test]
    fn test_header_bad_magic() {
        let mut bytes = JournalHeader::new(0).to_bytes();
        bytes[0] = b'X';
        assert!(!JournalHeader::from_bytes(&bytes).unwrap().is_valid());
    }

    #[test]
    fn test_flush_entry_roundtrip() {
        let entry = JournalEntry::Flush {
            remote: vec![RemoteHighwater {
                partition: vpn("p", 1),
                member: RingMember::new("m1"),
                tx_id: 42,
            }],
            local: vec![LocalHighwater {
                partition: vpn("p", 1),
                tx_id: 9,
            }],
        };
        let bytes = entry.to_bytes().unwrap();
        let (parsed, consumed) = JournalEntry::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_corrupt_entry_detected() {
        let mut bytes = JournalEntry::Delete {
            partition: vpn("p", 3),
        }
        .to_bytes()
        .unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            JournalEntry::from_bytes(&bytes),
            Err(JournalEntryError::Frame(FrameError::ChecksumMismatch { .. }))
        ));
    }
}
