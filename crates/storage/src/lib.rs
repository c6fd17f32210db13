//! Storage layer for Tideline
//!
//! This crate implements highwater tracking for replication catch-up:
//! - HighwaterStore: per-member and local highwater marks per versioned partition
//! - DashMap of partitions with per-partition RwLock for consistent snapshots
//! - Sharded update buffers selected by delta index
//! - Durable flush through the highwater journal
//!
//! # Sharding
//!
//! Writers on different shards never contend:
//! - `set_if_larger` locks only its shard
//! - `flush` persists only its shard's buffered updates
//! - `clear`, `clear_ring` and `delete` lock every shard

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod highwater;

pub use highwater::{HighwaterConfig, HighwaterConfigError, HighwaterError, HighwaterStore};
