//! WAL row file and record format.
//!
//! Each versioned partition owns one row file. The file starts with a
//! fixed header followed by framed row records (see [`super::frame`]).
//!
//! # File Layout
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ File Header (16 bytes)             │
//! ├────────────────────────────────────┤
//! │ Row record 1                       │
//! ├────────────────────────────────────┤
//! │ Row record 2                       │
//! ├────────────────────────────────────┤
//! │ ...                                │
//! └────────────────────────────────────┘
//! ```
//!
//! # Row Payload
//!
//! ```text
//! ┌───────────┬───────────────┬─────────────┬───────────┐
//! │ TxId (8)  │ Timestamp (8) │ Version (8) │ Flags (1) │
//! ├───────────┴───────────────┴─────────────┴───────────┤
//! │ [prefix len (4) + prefix]  if FLAG_PREFIX            │
//! │ key len (4) + key                                    │
//! │ [value len (4) + value]    if FLAG_VALUE             │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The last row of every append carries `FLAG_BATCH_END`. A transaction
//! whose final record lacks it was torn mid-batch.

use super::frame::{decode_frame, encode_frame, FrameError};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Magic bytes identifying a WAL row file: "TDRW"
pub const ROW_FILE_MAGIC: [u8; 4] = *b"TDRW";

/// Current row file format version
pub const ROW_FILE_FORMAT_VERSION: u32 = 1;

/// Size of the row file header in bytes
pub const ROW_FILE_HEADER_SIZE: usize = 16;

/// Current row record format version
pub const ROW_RECORD_FORMAT_VERSION: u8 = 1;

const FLAG_TOMBSTONED: u8 = 0b001;
const FLAG_PREFIX: u8 = 0b010;
const FLAG_VALUE: u8 = 0b100;
const FLAG_BATCH_END: u8 = 0b1000;

/// Row file header (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFileHeader {
    /// Magic bytes: "TDRW"
    pub magic: [u8; 4],
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Backing-store index this file was allocated under
    pub index: u64,
}

impl RowFileHeader {
    /// Create a new header.
    pub fn new(index: u64) -> Self {
        RowFileHeader {
            magic: ROW_FILE_MAGIC,
            format_version: ROW_FILE_FORMAT_VERSION,
            index,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; ROW_FILE_HEADER_SIZE] {
        let mut bytes = [0u8; ROW_FILE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.index.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes.
    pub fn from_bytes(bytes: &[u8; ROW_FILE_HEADER_SIZE]) -> Option<Self> {
        Some(RowFileHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            index: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
        })
    }

    /// Validate magic bytes and version.
    pub fn is_valid(&self) -> bool {
        self.magic == ROW_FILE_MAGIC && self.format_version == ROW_FILE_FORMAT_VERSION
    }
}

/// One row as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    /// Transaction id shared by every row of one append
    pub tx_id: u64,
    /// Optional key prefix
    pub prefix: Option<Vec<u8>>,
    /// Row key
    pub key: Vec<u8>,
    /// Optional value payload
    pub value: Option<Vec<u8>>,
    /// Caller-supplied timestamp
    pub timestamp: i64,
    /// Logical deletion marker
    pub tombstoned: bool,
    /// Caller-supplied row version
    pub version: i64,
    /// Last row of its transaction
    pub batch_end: bool,
}

impl RowRecord {
    /// Serialize to a framed record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(
            25 + 12
                + self.key.len()
                + self.prefix.as_ref().map_or(0, Vec::len)
                + self.value.as_ref().map_or(0, Vec::len),
        );
        payload.extend_from_slice(&self.tx_id.to_le_bytes());
        payload.extend_from_slice(&self.timestamp.to_le_bytes());
        payload.extend_from_slice(&self.version.to_le_bytes());

        let mut flags = 0u8;
        if self.tombstoned {
            flags |= FLAG_TOMBSTONED;
        }
        if self.prefix.is_some() {
            flags |= FLAG_PREFIX;
        }
        if self.value.is_some() {
            flags |= FLAG_VALUE;
        }
        if self.batch_end {
            flags |= FLAG_BATCH_END;
        }
        payload.push(flags);

        if let Some(prefix) = &self.prefix {
            push_bytes(&mut payload, prefix);
        }
        push_bytes(&mut payload, &self.key);
        if let Some(value) = &self.value {
            push_bytes(&mut payload, value);
        }

        encode_frame(ROW_RECORD_FORMAT_VERSION, &payload)
    }

    /// Deserialize from the front of `bytes`.
    ///
    /// Returns (record, bytes_consumed) on success.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), RowRecordError> {
        let (payload, consumed) = decode_frame(bytes, ROW_RECORD_FORMAT_VERSION)?;
        let record = Self::parse_payload(payload).ok_or(RowRecordError::InvalidFormat)?;
        Ok((record, consumed))
    }

    fn parse_payload(mut payload: &[u8]) -> Option<Self> {
        let tx_id = payload.read_u64::<LittleEndian>().ok()?;
        let timestamp = payload.read_i64::<LittleEndian>().ok()?;
        let version = payload.read_i64::<LittleEndian>().ok()?;
        let flags = payload.read_u8().ok()?;

        let prefix = if flags & FLAG_PREFIX != 0 {
            Some(read_bytes(&mut payload)?)
        } else {
            None
        };
        let key = read_bytes(&mut payload)?;
        let value = if flags & FLAG_VALUE != 0 {
            Some(read_bytes(&mut payload)?)
        } else {
            None
        };

        if !payload.is_empty() {
            return None;
        }

        Some(RowRecord {
            tx_id,
            prefix,
            key,
            value,
            timestamp,
            tombstoned: flags & FLAG_TOMBSTONED != 0,
            version,
            batch_end: flags & FLAG_BATCH_END != 0,
        })
    }
}

fn push_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_bytes(payload: &mut &[u8]) -> Option<Vec<u8>> {
    let len = payload.read_u32::<LittleEndian>().ok()? as usize;
    if payload.len() < len {
        return None;
    }
    let mut bytes = vec![0u8; len];
    payload.read_exact(&mut bytes).ok()?;
    Some(bytes)
}

/// Row record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowRecordError {
    /// Framing failed (torn tail, bad checksum, bad length, bad version)
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Frame was intact but the payload is malformed
    #[error("Invalid row payload")]
    InvalidFormat,
}

impl RowRecordError {
    /// True when the bytes simply ran out (partial trailing record)
    pub fn is_truncation(&self) -> bool {
        matches!(self, RowRecordError::Frame(FrameError::InsufficientData))
    }
}
