//! Length-prefixed, checksummed record framing.
//!
//! Both the WAL row log and the highwater journal store their records in
//! the same self-delimiting frame:
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The length field contains the size of (format_version + payload + crc32).
//! The CRC covers format_version + payload.

use crc32fast::Hasher;

/// Bytes taken by the length prefix
pub const FRAME_LENGTH_SIZE: usize = 4;

/// Smallest legal length value: format version + CRC
const MIN_FRAME_LENGTH: usize = 5;

/// Smallest complete frame, length prefix included
pub const MIN_FRAME_SIZE: usize = FRAME_LENGTH_SIZE + MIN_FRAME_LENGTH;

/// Upper bound on a single frame; larger length fields are treated as garbage
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Frame parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough data to parse the frame (torn write at the tail)
    #[error("Insufficient data to parse frame")]
    InsufficientData,

    /// Length field is zero, too small, or absurdly large
    #[error("Invalid frame length: {0}")]
    InvalidLength(usize),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from frame
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),
}

/// Wrap `payload` in a frame tagged with `format_version`.
pub fn encode_frame(format_version: u8, payload: &[u8]) -> Vec<u8> {
    let body_len = 1 + payload.len();
    let total_len = body_len + 4;
    let mut frame = Vec::with_capacity(FRAME_LENGTH_SIZE + total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.push(format_version);
    frame.extend_from_slice(payload);
    let crc = compute_crc(&frame[FRAME_LENGTH_SIZE..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Read the length prefix of a frame.
///
/// Returns the total frame size (prefix included).
pub fn frame_size(prefix: &[u8; FRAME_LENGTH_SIZE]) -> Result<usize, FrameError> {
    let length = u32::from_le_bytes(*prefix) as usize;
    if !(MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&length) {
        return Err(FrameError::InvalidLength(length));
    }
    Ok(FRAME_LENGTH_SIZE + length)
}

/// Parse one frame from the front of `bytes`.
///
/// Returns (payload, bytes_consumed) on success. `expected_version` is
/// checked after the CRC so that a version mismatch is never confused with
/// corruption.
pub fn decode_frame(bytes: &[u8], expected_version: u8) -> Result<(&[u8], usize), FrameError> {
    if bytes.len() < FRAME_LENGTH_SIZE {
        return Err(FrameError::InsufficientData);
    }
    let mut prefix = [0u8; FRAME_LENGTH_SIZE];
    prefix.copy_from_slice(&bytes[..FRAME_LENGTH_SIZE]);
    let size = frame_size(&prefix)?;
    if bytes.len() < size {
        return Err(FrameError::InsufficientData);
    }

    let body = &bytes[FRAME_LENGTH_SIZE..size - 4];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[size - 4..size]);
    let stored_crc = u32::from_le_bytes(crc_bytes);
    let computed_crc = compute_crc(body);
    if stored_crc != computed_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: stored_crc,
            computed: computed_crc,
        });
    }

    if body[0] != expected_version {
        return Err(FrameError::UnsupportedVersion(body[0]));
    }

    Ok((&body[1..], size))
}

/// Offset of the first frame past `bytes[0]` whose checksum verifies.
///
/// Recovery uses this to tell a damaged tail, after which nothing intact
/// follows, from damage in the middle of a file.
pub fn find_intact_frame(bytes: &[u8]) -> Option<usize> {
    if bytes.len() <= MIN_FRAME_SIZE {
        return None;
    }
    (1..=bytes.len() - MIN_FRAME_SIZE).find(|&offset| frame_verifies(&bytes[offset..]))
}

fn frame_verifies(bytes: &[u8]) -> bool {
    let mut prefix = [0u8; FRAME_LENGTH_SIZE];
    prefix.copy_from_slice(&bytes[..FRAME_LENGTH_SIZE]);
    let size = match frame_size(&prefix) {
        Ok(size) if size <= bytes.len() => size,
        _ => return false,
    };
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[size - 4..size]);
    u32::from_le_bytes(crc_bytes) == compute_crc(&bytes[FRAME_LENGTH_SIZE..size - 4])
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
