//! Tideline - replication and durability core for a partitioned key-value store
//!
//! Tideline keeps an append-only WAL per versioned partition, tracks how far
//! every ring member has applied each partition (highwater marks), and
//! serves incremental catch-up ("take") between members.
//!
//! # Quick Start
//!
//! ```ignore
//! use tideline::{Node, PartitionName, PartitionProperties, RingName, WalRowDraft};
//!
//! let node = Node::open(dir, provider)?;
//! let name = PartitionName::new(RingName::new("main")?, b"users".to_vec());
//! let vpn = node.register_partition(name, PartitionProperties::default())?;
//! let outcome = node.commit(&vpn, &[WalRowDraft::put(b"k".to_vec(), b"v".to_vec(), 0, 0)])?;
//! assert_eq!(node.highwaters().get_local(&vpn), Some(outcome.tx_id));
//! ```
//!
//! # Crates
//!
//! - `tideline-core`: identities, ring topology, errors
//! - `tideline-durability`: WAL row store, highwater journal
//! - `tideline-storage`: sharded highwater store
//! - `tideline-engine`: registry, ring cache, take service, node

pub use tideline_core::{
    highwater_from_wire, highwater_to_wire, Durability, Error, NotFound, PartitionName,
    PartitionProperties, PartitionStatus, Result, RingHost, RingMember, RingMemberAndHost,
    RingMemberHighwater, RingName, RingTopology, VersionedPartitionName, WalHighwater,
    LOCAL_NONE,
};
pub use tideline_durability::{
    BackingStore, DirectoryBackingStore, IoCounters, IoStats, RecoveryReport, WalConfig,
    WalEntry, WalError, WalRow, WalRowDraft, WalRowStore, WalScan,
};
pub use tideline_engine::{
    CommitOutcome, CommitSink, MemberRings, Node, PartitionRegistry, PartitionStores,
    RegistryError, RegistryEvent, RingMembership, RingTopologyCache, RingTopologyProvider,
    SinkError, TakeBatch, TakeError, TakeService, TidelineConfig,
};
pub use tideline_storage::{HighwaterConfig, HighwaterError, HighwaterStore};
