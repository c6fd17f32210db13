//! Replication engine for Tideline
//!
//! This crate orchestrates the lower layers:
//! - PartitionRegistry: versioned partition identity and lifecycle events
//! - RingTopologyCache: cached ring views with background refresh
//! - PartitionStores: one WAL per hosted partition version, commit and retire paths
//! - TakeService: anti-entropy catch-up between ring members
//! - Node: façade wiring everything from a data directory and `tideline.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod manifest;
pub mod node;
pub mod notify;
pub mod partition;
pub mod registry;
pub mod ring;
pub mod take;

pub use config::{HighwaterSection, TidelineConfig, CONFIG_FILE_NAME};
pub use manifest::{ManifestEntry, PartitionManifest, MANIFEST_FILE_NAME};
pub use node::Node;
pub use notify::{CommitNotifier, CommitOutcome, CommitSink, SinkError};
pub use partition::{PartitionError, PartitionStores, ARCHIVE_DIR_NAME, WAL_DIR_NAME};
pub use registry::{
    MemberPartitions, PartitionRegistry, RegistryError, RegistryEvent, RingMembership,
};
pub use ring::{MemberRings, RingTopologyCache, RingTopologyProvider};
pub use take::{TakeBatch, TakeError, TakeService};
