//! Highwater snapshot types
//!
//! A highwater is the highest transaction id a member is known to have
//! durably applied for a versioned partition. Absence is `None`; the
//! legacy wire sentinel [`LOCAL_NONE`] is produced only at the wire
//! boundary.

use crate::types::RingMember;
use serde::{Deserialize, Serialize};

/// Wire sentinel for "no highwater recorded yet"
///
/// Distinct from `0`, which means "seen through tx 0".
pub const LOCAL_NONE: i64 = -2;

/// Encode an optional highwater for the wire
pub fn highwater_to_wire(highwater: Option<u64>) -> i64 {
    match highwater {
        Some(tx_id) => tx_id as i64,
        None => LOCAL_NONE,
    }
}

/// Decode a wire highwater
///
/// Any negative value decodes as absent.
pub fn highwater_from_wire(value: i64) -> Option<u64> {
    if value < 0 {
        None
    } else {
        Some(value as u64)
    }
}

/// One member's highwater in a partition snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMemberHighwater {
    /// The member
    pub member: RingMember,
    /// Highest applied tx id
    pub tx_id: u64,
}

/// Point-in-time highwaters for one versioned partition
///
/// Members are sorted so that two snapshots of the same state compare
/// equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalHighwater {
    /// Per-member highwaters, ordered by member
    pub ring_member_highwaters: Vec<RingMemberHighwater>,
}

impl WalHighwater {
    /// Build a snapshot, sorting entries by member
    pub fn new(mut ring_member_highwaters: Vec<RingMemberHighwater>) -> Self {
        ring_member_highwaters.sort_by(|a, b| a.member.cmp(&b.member));
        WalHighwater {
            ring_member_highwaters,
        }
    }

    /// True when no member has a recorded highwater
    pub fn is_empty(&self) -> bool {
        self.ring_member_highwaters.is_empty()
    }

    /// Highwater recorded for `member`
    pub fn get(&self, member: &RingMember) -> Option<u64> {
        self.ring_member_highwaters
            .iter()
            .find(|h| &h.member == member)
            .map(|h| h.tx_id)
    }

    /// Smallest highwater across members (the replicated-through point)
    pub fn min_tx_id(&self) -> Option<u64> {
        self.ring_member_highwaters.iter().map(|h| h.tx_id).min()
    }
}
