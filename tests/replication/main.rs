//! Replication Test Suite
//!
//! End-to-end coverage of the node: WAL commits and scans, highwater
//! semantics, the take exchange between two nodes, and partition
//! lifecycle across version changes and restarts.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test replication
//! cargo test --test replication take_exchange::
//! ```

#[path = "../common/mod.rs"]
mod common;

mod commit_and_scan;
mod highwater_semantics;
mod lifecycle;
mod take_exchange;
