//! Identity types for Tideline
//!
//! This module defines the foundational identities:
//! - RingName: Name of a ring (the member set that hosts partitions)
//! - RingMember: Stable identity of a cluster participant
//! - RingHost: Network address of a member
//! - PartitionName: Logical partition (ring + partition bytes)
//! - VersionedPartitionName: A partition tagged with its epoch

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a ring name
pub const MAX_RING_NAME_LENGTH: usize = 256;

/// Name of a ring
///
/// Ring names follow the same rules as other user-facing identifiers:
///
/// - Length: 1-256 characters
/// - Characters: `[a-zA-Z0-9_.-]`
/// - Cannot start with `-` or `.`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RingName(String);

/// Error when validating a ring name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingNameError {
    /// Name is empty
    #[error("ring name cannot be empty")]
    Empty,
    /// Name exceeds maximum length
    #[error("ring name too long: {length} > {max}")]
    TooLong {
        /// Actual length of the name
        length: usize,
        /// Maximum allowed length
        max: usize,
    },
    /// Name contains an invalid character
    #[error("invalid character {char:?} at position {position}")]
    InvalidChar {
        /// The invalid character
        char: char,
        /// Position of the invalid character
        position: usize,
    },
    /// Name starts with `-` or `.`
    #[error("ring name cannot start with {char:?}")]
    InvalidStart {
        /// The invalid starting character
        char: char,
    },
}

impl RingName {
    /// Create a validated ring name
    pub fn new(name: impl Into<String>) -> Result<Self, RingNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(RingName(name))
    }

    /// Validate a candidate ring name without constructing it
    pub fn validate(name: &str) -> Result<(), RingNameError> {
        if name.is_empty() {
            return Err(RingNameError::Empty);
        }
        if name.len() > MAX_RING_NAME_LENGTH {
            return Err(RingNameError::TooLong {
                length: name.len(),
                max: MAX_RING_NAME_LENGTH,
            });
        }
        for (position, c) in name.chars().enumerate() {
            if position == 0 && (c == '-' || c == '.') {
                return Err(RingNameError::InvalidStart { char: c });
            }
            if !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
                return Err(RingNameError::InvalidChar { char: c, position });
            }
        }
        Ok(())
    }

    /// Get the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a cluster participant
///
/// Opaque and stable across restarts. Members are compared and ordered
/// by their string form so that ring layouts are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RingMember(String);

impl RingMember {
    /// Create a member from an existing identity string
    pub fn new(member: impl Into<String>) -> Self {
        RingMember(member.into())
    }

    /// Generate a fresh member identity (UUID v4)
    pub fn generate() -> Self {
        RingMember(Uuid::new_v4().to_string())
    }

    /// Get the member identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network address of a ring member
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RingHost {
    /// Datacenter label (may be empty)
    pub datacenter: String,
    /// Rack label (may be empty)
    pub rack: String,
    /// Host name or IP
    pub host: String,
    /// Port
    pub port: u16,
}

impl RingHost {
    /// Create a host address without datacenter/rack labels
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        RingHost {
            datacenter: String::new(),
            rack: String::new(),
            host: host.into(),
            port,
        }
    }

    /// Attach datacenter and rack labels
    pub fn with_location(mut self, datacenter: impl Into<String>, rack: impl Into<String>) -> Self {
        self.datacenter = datacenter.into();
        self.rack = rack.into();
        self
    }
}

impl fmt::Display for RingHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Logical partition identity
///
/// A partition is named by the ring that hosts it plus opaque partition
/// bytes. Ordering is ring first, then name bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionName {
    ring_name: RingName,
    name: Vec<u8>,
}

impl PartitionName {
    /// Create a partition name
    pub fn new(ring_name: RingName, name: impl Into<Vec<u8>>) -> Self {
        PartitionName {
            ring_name,
            name: name.into(),
        }
    }

    /// Ring hosting this partition
    pub fn ring_name(&self) -> &RingName {
        &self.ring_name
    }

    /// Raw partition name bytes
    pub fn name(&self) -> &[u8] {
        &self.name
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.ring_name, String::from_utf8_lossy(&self.name))
    }
}

/// A partition tagged with its epoch
///
/// The version advances whenever the partition is destroyed and
/// re-created. Two values with the same [`PartitionName`] but different
/// versions are causally unrelated for replication purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedPartitionName {
    partition_name: PartitionName,
    version: u64,
}

impl VersionedPartitionName {
    /// Create a versioned partition name
    pub fn new(partition_name: PartitionName, version: u64) -> Self {
        VersionedPartitionName {
            partition_name,
            version,
        }
    }

    /// The logical partition
    pub fn partition_name(&self) -> &PartitionName {
        &self.partition_name
    }

    /// The epoch
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The same partition at the next epoch
    pub fn next_version(&self) -> Self {
        VersionedPartitionName {
            partition_name: self.partition_name.clone(),
            version: self.version + 1,
        }
    }
}

impl fmt::Display for VersionedPartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.partition_name, self.version)
    }
}
