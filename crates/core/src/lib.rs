//! Core types for Tideline
//!
//! This crate defines the foundational types used throughout the system:
//! - RingName, RingMember, RingHost: Cluster identities
//! - PartitionName, VersionedPartitionName: Partition identity and epoch
//! - RingTopology: Immutable, cache-id-versioned ring membership snapshot
//! - PartitionProperties, Durability, PartitionStatus: Partition configuration
//! - WalHighwater, LOCAL_NONE: Highwater snapshots and the wire sentinel
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod highwater;
pub mod partition;
pub mod ring;
pub mod types;

pub use error::{Error, NotFound, Result};
pub use highwater::{
    highwater_from_wire, highwater_to_wire, RingMemberHighwater, WalHighwater, LOCAL_NONE,
};
pub use partition::{Durability, PartitionProperties, PartitionStatus};
pub use ring::{RingMemberAndHost, RingTopology, RingTopologyError};
pub use types::{
    PartitionName, RingHost, RingMember, RingName, RingNameError, VersionedPartitionName,
    MAX_RING_NAME_LENGTH,
};
