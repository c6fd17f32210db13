//! Ring topology value type
//!
//! A [`RingTopology`] is an immutable snapshot of the members hosting a
//! ring. The owning subsystem recomputes it wholesale whenever membership
//! changes and readers hold it behind an `Arc`, so nobody ever observes a
//! partially updated member list.
//!
//! ## Staleness
//!
//! `ring_cache_id` and `node_cache_id` change if and only if the
//! underlying membership (or this node's view of it) changed. Routing code
//! compares the ids on every request instead of the entry lists.

use crate::types::{RingHost, RingMember};
use serde::{Deserialize, Serialize};

/// A member together with its address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMemberAndHost {
    /// Member identity
    pub member: RingMember,
    /// Member address
    pub host: RingHost,
}

impl RingMemberAndHost {
    /// Pair a member with its host
    pub fn new(member: RingMember, host: RingHost) -> Self {
        RingMemberAndHost { member, host }
    }
}

/// Error building a ring topology
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingTopologyError {
    /// Root index does not address an entry
    #[error("root member index {index} out of bounds for {len} entries")]
    RootOutOfBounds {
        /// Requested root index
        index: usize,
        /// Number of entries
        len: usize,
    },
    /// A member appears twice
    #[error("duplicate ring member {0}")]
    DuplicateMember(RingMember),
}

/// Immutable view of which members host a ring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingTopology {
    ring_cache_id: u64,
    node_cache_id: u64,
    entries: Vec<RingMemberAndHost>,
    root_member_index: Option<usize>,
}

impl RingTopology {
    /// Build a topology
    ///
    /// `root_member_index` must address an entry when `entries` is
    /// non-empty; it is ignored (normalized to `None`) for an empty ring.
    pub fn new(
        ring_cache_id: u64,
        node_cache_id: u64,
        entries: Vec<RingMemberAndHost>,
        root_member_index: usize,
    ) -> Result<Self, RingTopologyError> {
        if entries.is_empty() {
            return Ok(Self::empty(ring_cache_id, node_cache_id));
        }
        if root_member_index >= entries.len() {
            return Err(RingTopologyError::RootOutOfBounds {
                index: root_member_index,
                len: entries.len(),
            });
        }
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.member == entry.member) {
                return Err(RingTopologyError::DuplicateMember(entry.member.clone()));
            }
        }
        Ok(RingTopology {
            ring_cache_id,
            node_cache_id,
            entries,
            root_member_index: Some(root_member_index),
        })
    }

    /// A ring with no members
    pub fn empty(ring_cache_id: u64, node_cache_id: u64) -> Self {
        RingTopology {
            ring_cache_id,
            node_cache_id,
            entries: Vec::new(),
            root_member_index: None,
        }
    }

    /// Membership-list version token
    pub fn ring_cache_id(&self) -> u64 {
        self.ring_cache_id
    }

    /// This node's view version token
    pub fn node_cache_id(&self) -> u64 {
        self.node_cache_id
    }

    /// Ordered entries
    pub fn entries(&self) -> &[RingMemberAndHost] {
        &self.entries
    }

    /// Index of the designated primary
    pub fn root_member_index(&self) -> Option<usize> {
        self.root_member_index
    }

    /// The designated primary, if the ring has members
    pub fn root_member(&self) -> Option<&RingMemberAndHost> {
        self.root_member_index.map(|i| &self.entries[i])
    }

    /// Entry at position `index`
    pub fn member_and_host(&self, index: usize) -> Option<&RingMemberAndHost> {
        self.entries.get(index)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the ring has no members
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `member` is part of this ring
    pub fn contains(&self, member: &RingMember) -> bool {
        self.entries.iter().any(|e| &e.member == member)
    }

    /// Look up a member's host
    pub fn host_of(&self, member: &RingMember) -> Option<&RingHost> {
        self.entries
            .iter()
            .find(|e| &e.member == member)
            .map(|e| &e.host)
    }

    /// Cheap staleness check: same cache ids means same membership
    #[inline]
    pub fn is_same_view(&self, other: &RingTopology) -> bool {
        self.ring_cache_id == other.ring_cache_id && self.node_cache_id == other.node_cache_id
    }

    /// Entries starting at the root and wrapping around
    ///
    /// This is the order in which writes are routed and catch-up sources
    /// are asked.
    pub fn ordered_from_root(&self) -> impl Iterator<Item = &RingMemberAndHost> + '_ {
        let start = self.root_member_index.unwrap_or(0);
        let len = self.entries.len();
        (0..len).map(move |i| &self.entries[(start + i) % len])
    }
}
