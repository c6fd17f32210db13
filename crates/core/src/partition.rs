//! Partition properties and status
//!
//! Properties are owned by the partition registry and replaced wholesale
//! when they change; readers hold them behind an `Arc`.

use serde::{Deserialize, Serialize};

/// How a partition's WAL makes appends durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Durability {
    /// fsync after every append
    FsyncAlways,
    /// fsync at most every `interval_ms`; appends in between may be lost
    FsyncAsync {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
    },
    /// Never fsync; data survives process exit but not power loss
    Ephemeral,
}

impl Durability {
    /// True when every append must be followed by an fsync
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, Durability::FsyncAlways)
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Durability::FsyncAlways => "fsync always (safest, slowest)",
            Durability::FsyncAsync { .. } => "fsync async (balanced)",
            Durability::Ephemeral => "ephemeral (no fsync)",
        }
    }
}

impl Default for Durability {
    fn default() -> Self {
        Durability::FsyncAsync { interval_ms: 100 }
    }
}

/// Per-partition configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionProperties {
    /// WAL durability
    #[serde(default)]
    pub durability: Durability,
    /// How many ring members a catch-up asks for rows
    #[serde(default = "default_take_from_factor")]
    pub take_from_factor: usize,
    /// Whether the partition replicates to other members at all
    #[serde(default = "default_replicated")]
    pub replicated: bool,
    /// How long tombstones must be retained before they may be dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone_retention_ms: Option<u64>,
}

fn default_take_from_factor() -> usize {
    2
}

fn default_replicated() -> bool {
    true
}

impl Default for PartitionProperties {
    fn default() -> Self {
        PartitionProperties {
            durability: Durability::default(),
            take_from_factor: default_take_from_factor(),
            replicated: default_replicated(),
            tombstone_retention_ms: None,
        }
    }
}

impl PartitionProperties {
    /// Set durability (builder pattern)
    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    /// Set take-from factor (builder pattern)
    pub fn with_take_from_factor(mut self, factor: usize) -> Self {
        self.take_from_factor = factor;
        self
    }

    /// Mark the partition local-only (builder pattern)
    pub fn local_only(mut self) -> Self {
        self.replicated = false;
        self
    }
}

/// Lifecycle status reported to commit listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionStatus {
    /// Created but not yet serving (still catching up)
    Bootstrap,
    /// Serving reads and writes
    Online,
    /// Retired; no further writes accepted
    Expunged,
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PartitionStatus::Bootstrap => "bootstrap",
            PartitionStatus::Online => "online",
            PartitionStatus::Expunged => "expunged",
        };
        f.write_str(s)
    }
}
