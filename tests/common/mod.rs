//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
pub use tideline::{
    CommitOutcome, Durability, Node, PartitionName, PartitionProperties, PartitionStatus,
    RingHost, RingMember, RingMemberAndHost, RingName, RingTopology, RingTopologyProvider,
    TidelineConfig, VersionedPartitionName, WalRowDraft,
};
use tempfile::TempDir;

/// Route `tracing` output through the test harness; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Ring provider
// ============================================================================

/// In-memory membership service shared by every node in a test.
#[derive(Default)]
pub struct StaticRings {
    rings: Mutex<HashMap<RingName, RingTopology>>,
}

impl StaticRings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace `ring`'s members; the root is the first member.
    pub fn set(&self, ring: &RingName, cache_id: u64, members: &[&str]) -> RingTopology {
        let entries = members
            .iter()
            .enumerate()
            .map(|(i, m)| {
                RingMemberAndHost::new(
                    RingMember::new(*m),
                    RingHost::new("127.0.0.1", 9000 + i as u16),
                )
            })
            .collect();
        let topology = RingTopology::new(cache_id, 1, entries, 0).expect("valid topology");
        self.rings.lock().insert(ring.clone(), topology.clone());
        topology
    }
}

impl RingTopologyProvider for StaticRings {
    fn fetch(&self, ring: &RingName) -> tideline::Result<RingTopology> {
        self.rings.lock().get(ring).cloned().ok_or_else(|| {
            tideline::Error::NotFound(tideline::NotFound::Ring(ring.to_string()))
        })
    }
}

// ============================================================================
// Names and rows
// ============================================================================

pub fn ring(name: &str) -> RingName {
    RingName::new(name).expect("valid ring name")
}

pub fn partition(ring_name: &str, name: &str) -> PartitionName {
    PartitionName::new(ring(ring_name), name.as_bytes().to_vec())
}

pub fn put(key: &str, value: &str) -> WalRowDraft {
    WalRowDraft::put(key.as_bytes().to_vec(), value.as_bytes().to_vec(), 0, 0)
}

pub fn strict_properties() -> PartitionProperties {
    PartitionProperties::default().with_durability(Durability::FsyncAlways)
}

// ============================================================================
// TestNode
// ============================================================================

/// A node in its own temporary directory.
pub struct TestNode {
    node: Option<Node>,
    pub dir: TempDir,
    pub rings: Arc<StaticRings>,
    pub config: TidelineConfig,
}

impl TestNode {
    /// Open a node named `member` using the shared membership service.
    pub fn new(member: &str, rings: Arc<StaticRings>) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = TidelineConfig::for_testing();
        config.member = Some(member.to_string());
        let node = Node::open_with_config(dir.path(), config.clone(), rings.clone())
            .expect("Failed to open node");
        TestNode {
            node: Some(node),
            dir,
            rings,
            config,
        }
    }

    pub fn node(&self) -> &Node {
        self.node.as_ref().expect("node is open")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Close and reopen the node on the same directory.
    pub fn reopen(&mut self) {
        if let Some(node) = self.node.take() {
            node.close().expect("close");
        }
        let node = Node::open_with_config(self.dir.path(), self.config.clone(), self.rings.clone())
            .expect("Failed to reopen node");
        self.node = Some(node);
    }

    /// Refresh `ring` into this node's cache from the membership service.
    pub fn sync_ring(&self, ring_name: &RingName) {
        self.node().rings().refresh_now(ring_name).expect("ring refresh");
    }

    /// Commit one single-row batch per key.
    pub fn commit_keys(&self, vpn: &VersionedPartitionName, keys: &[&str]) -> Vec<u64> {
        keys.iter()
            .map(|key| self.node().commit(vpn, &[put(key, "v")]).expect("commit").tx_id)
            .collect()
    }
}
