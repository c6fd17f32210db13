//! Take exchange
//!
//! Serves anti-entropy catch-up between ring members. A requester asks for
//! every row of a partition version past the transaction id it already
//! holds; the service validates the version, checks the requester is in
//! the partition's ring, and streams a bounded batch from the WAL. When the
//! requester has applied the batch it acks, which raises its highwater.
//!
//! Batches never split a transaction: once the row limit is reached the
//! batch still runs to the end of the current transaction id.

use crate::partition::PartitionStores;
use crate::registry::{PartitionRegistry, RegistryError};
use crate::ring::RingTopologyCache;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tideline_core::{
    RingMember, RingMemberAndHost, RingName, VersionedPartitionName, WalHighwater,
};
use tideline_durability::{WalEntry, WalError};
use tideline_storage::{HighwaterError, HighwaterStore};
use tracing::debug;

/// Errors from the take exchange.
#[derive(Debug, Error)]
pub enum TakeError {
    /// Partition unknown or the requested version is not current
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No topology is cached for the partition's ring
    #[error("Ring {0} is unknown")]
    UnknownRing(RingName),

    /// The requester is not a member of the partition's ring
    #[error("{member} is not a member of ring {ring}")]
    NotAMember {
        /// Requesting member
        member: RingMember,
        /// Partition's ring
        ring: RingName,
    },

    /// This node does not host the partition version
    #[error("{0} is not hosted here")]
    NotHosted(VersionedPartitionName),

    /// WAL read failed, or the WAL moved under the scan
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Highwater update failed
    #[error(transparent)]
    Highwater(#[from] HighwaterError),
}

impl TakeError {
    /// Worth retrying here or at another member
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TakeError::UnknownRing(_)
                | TakeError::NotHosted(_)
                | TakeError::Wal(WalError::Reopen { .. })
        )
    }

    /// The requested epoch is dead
    pub fn is_stale(&self) -> bool {
        match self {
            TakeError::Registry(e) => e.is_stale(),
            TakeError::Highwater(e) => e.is_retired(),
            _ => false,
        }
    }
}

impl From<TakeError> for tideline_core::Error {
    fn from(e: TakeError) -> Self {
        match e {
            TakeError::Registry(e) => e.into(),
            TakeError::UnknownRing(ring) => {
                tideline_core::Error::NotFound(tideline_core::NotFound::Ring(ring.to_string()))
            }
            TakeError::NotAMember { member, .. } => {
                tideline_core::Error::NotFound(tideline_core::NotFound::Member(member))
            }
            TakeError::NotHosted(vpn) => {
                tideline_core::Error::partition_not_found(vpn.partition_name().clone())
            }
            TakeError::Wal(e) => e.into(),
            TakeError::Highwater(e) => e.into(),
        }
    }
}

/// One batch of rows answering a take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeBatch {
    /// Rows with values, ascending by transaction id
    pub rows: Vec<WalEntry>,
    /// Highest transaction id in `rows`, if any
    pub last_tx_id: Option<u64>,
    /// More rows exist past this batch
    pub more_available: bool,
    /// Partition highwater snapshot, local frontier included
    pub highwater: WalHighwater,
}

/// Serves take requests for the local member.
pub struct TakeService {
    local_member: RingMember,
    registry: Arc<PartitionRegistry>,
    rings: Arc<RingTopologyCache>,
    stores: Arc<PartitionStores>,
    highwaters: Arc<HighwaterStore>,
    batch_rows: usize,
}

impl TakeService {
    /// Wire the service to the node's components.
    pub fn new(
        local_member: RingMember,
        registry: Arc<PartitionRegistry>,
        rings: Arc<RingTopologyCache>,
        stores: Arc<PartitionStores>,
        highwaters: Arc<HighwaterStore>,
        batch_rows: usize,
    ) -> Self {
        TakeService {
            local_member,
            registry,
            rings,
            stores,
            highwaters,
            batch_rows: batch_rows.max(1),
        }
    }

    fn check_member(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
    ) -> Result<(), TakeError> {
        let ring = partition.partition_name().ring_name();
        let topology = self
            .rings
            .get(ring)
            .ok_or_else(|| TakeError::UnknownRing(ring.clone()))?;
        if !topology.contains(member) {
            return Err(TakeError::NotAMember {
                member: member.clone(),
                ring: ring.clone(),
            });
        }
        Ok(())
    }

    /// Rows of `partition` past `highwater` for `requester`.
    ///
    /// `highwater` is the last transaction id the requester holds; `None`
    /// asks from the beginning.
    pub fn take(
        &self,
        requester: &RingMember,
        partition: &VersionedPartitionName,
        highwater: Option<u64>,
    ) -> Result<TakeBatch, TakeError> {
        self.registry.validate(partition)?;
        self.check_member(requester, partition)?;
        let store = self
            .stores
            .get(partition)
            .ok_or_else(|| TakeError::NotHosted(partition.clone()))?;

        let from_tx_id = highwater.map_or(0, |tx| tx.saturating_add(1));
        let mut scan = store.scan_from(from_tx_id)?;
        let mut rows = Vec::new();
        let mut last_tx_id = None;
        while let Some(entry) = scan.next_entry() {
            let entry = entry?;
            if rows.len() >= self.batch_rows && Some(entry.row.tx_id) != last_tx_id {
                break;
            }
            last_tx_id = Some(entry.row.tx_id);
            rows.push(entry);
        }

        let frontier = last_tx_id.or(highwater).unwrap_or(0);
        let more_available = store.last_tx_id().map_or(false, |last| last > frontier);
        let snapshot = self.highwaters.get_partition_highwater(partition, true);

        debug!(
            partition = %partition,
            requester = %requester,
            from_tx_id,
            rows = rows.len(),
            more_available,
            "Served take"
        );
        Ok(TakeBatch {
            rows,
            last_tx_id,
            more_available,
            highwater: snapshot,
        })
    }

    /// Record that `requester` applied everything up to `tx_id`.
    ///
    /// Returns `true` when the requester's highwater rose.
    pub fn ack(
        &self,
        requester: &RingMember,
        partition: &VersionedPartitionName,
        tx_id: u64,
    ) -> Result<bool, TakeError> {
        self.registry.validate(partition)?;
        self.check_member(requester, partition)?;
        let raised = self.highwaters.set_if_larger(
            requester,
            partition,
            tx_id,
            delta_index(partition),
            1,
        )?;
        Ok(raised)
    }

    /// Highwater snapshot of a current partition version.
    pub fn partition_highwater(
        &self,
        partition: &VersionedPartitionName,
    ) -> Result<WalHighwater, TakeError> {
        self.registry.validate(partition)?;
        Ok(self.highwaters.get_partition_highwater(partition, true))
    }

    /// Members to take `partition` from, in the order to ask them.
    ///
    /// Starts at the ring root, skips the local member and stops after the
    /// partition's `take_from_factor`.
    pub fn take_sources(
        &self,
        partition: &VersionedPartitionName,
    ) -> Result<Vec<RingMemberAndHost>, TakeError> {
        let properties = self.registry.get_properties(partition.partition_name())?;
        self.registry.validate(partition)?;
        let ring = partition.partition_name().ring_name();
        let topology = self
            .rings
            .get(ring)
            .ok_or_else(|| TakeError::UnknownRing(ring.clone()))?;
        Ok(topology
            .ordered_from_root()
            .filter(|entry| entry.member != self.local_member)
            .take(properties.take_from_factor)
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for TakeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TakeService")
            .field("local_member", &self.local_member)
            .field("batch_rows", &self.batch_rows)
            .finish()
    }
}

/// Shard selector for a partition's highwater updates.
pub(crate) fn delta_index(partition: &VersionedPartitionName) -> usize {
    let mut hasher = FxHasher::default();
    partition.hash(&mut hasher);
    hasher.finish() as usize
}
