//! Versioned partition registry
//!
//! Maps each logical partition to its current version (epoch), its
//! properties and its lifecycle status. A partition that is removed and
//! registered again comes back under a higher version, so the two
//! incarnations can never be confused by highwater state or WAL files.
//!
//! Retirements (version advances and removals) are queued as
//! [`RegistryEvent`]s for the owner to act on: close the retired WAL,
//! delete its highwaters.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use thiserror::Error;
use tideline_core::{
    PartitionName, PartitionProperties, PartitionStatus, RingName, VersionedPartitionName,
};
use tracing::{debug, info};

/// Errors from registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The partition is not registered (or was removed)
    #[error("Partition {0} is not registered")]
    NotFound(PartitionName),

    /// The caller holds an old epoch
    #[error("Partition {partition} is at v{current}, not v{requested}")]
    StaleVersion {
        /// Logical partition
        partition: PartitionName,
        /// Version the caller referenced
        requested: u64,
        /// Current version
        current: u64,
    },
}

impl RegistryError {
    /// True when the caller's epoch is dead
    pub fn is_stale(&self) -> bool {
        matches!(self, RegistryError::StaleVersion { .. })
    }
}

impl From<RegistryError> for tideline_core::Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(partition) => {
                tideline_core::Error::partition_not_found(partition)
            }
            RegistryError::StaleVersion {
                partition,
                requested,
                current,
            } => tideline_core::Error::StaleVersion {
                partition,
                requested,
                current,
            },
        }
    }
}

/// Lifecycle changes observed by the registry owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A partition version came into existence
    Registered(VersionedPartitionName),
    /// A partition version was superseded or removed
    Retired(VersionedPartitionName),
}

/// Predicate deciding whether the local member belongs to a ring.
pub trait RingMembership {
    /// Whether the member participates in `ring`
    fn is_member(&self, ring: &RingName) -> bool;
}

impl<F> RingMembership for F
where
    F: Fn(&RingName) -> bool,
{
    fn is_member(&self, ring: &RingName) -> bool {
        self(ring)
    }
}

#[derive(Debug, Clone)]
struct PartitionEntry {
    version: u64,
    properties: Arc<PartitionProperties>,
    status: PartitionStatus,
}

impl PartitionEntry {
    fn is_live(&self) -> bool {
        self.status != PartitionStatus::Expunged
    }
}

/// Registry of partitions and their current versions.
#[derive(Debug, Default)]
pub struct PartitionRegistry {
    partitions: RwLock<BTreeMap<PartitionName, PartitionEntry>>,
    events: parking_lot::Mutex<Vec<RegistryEvent>>,
}

impl PartitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, returning its current version.
    ///
    /// New partitions start at version 1 in `Bootstrap` status. A
    /// registered partition keeps its version and properties. A removed
    /// partition comes back one version past the one it was removed at.
    pub fn register(
        &self,
        name: PartitionName,
        properties: PartitionProperties,
    ) -> VersionedPartitionName {
        let mut partitions = self.partitions.write();
        if let Some(entry) = partitions.get_mut(&name) {
            if entry.is_live() {
                return VersionedPartitionName::new(name, entry.version);
            }
            entry.version += 1;
            entry.properties = Arc::new(properties);
            entry.status = PartitionStatus::Bootstrap;
            let vpn = VersionedPartitionName::new(name, entry.version);
            self.push_event(RegistryEvent::Registered(vpn.clone()));
            info!(partition = %vpn, "Re-registered partition");
            return vpn;
        }

        partitions.insert(
            name.clone(),
            PartitionEntry {
                version: 1,
                properties: Arc::new(properties),
                status: PartitionStatus::Bootstrap,
            },
        );
        let vpn = VersionedPartitionName::new(name, 1);
        self.push_event(RegistryEvent::Registered(vpn.clone()));
        debug!(partition = %vpn, "Registered partition");
        vpn
    }

    /// Properties of a live partition.
    pub fn get_properties(
        &self,
        name: &PartitionName,
    ) -> Result<Arc<PartitionProperties>, RegistryError> {
        self.live_entry(name).map(|entry| entry.properties)
    }

    /// Replace a partition's properties wholesale.
    pub fn update_properties(
        &self,
        name: &PartitionName,
        properties: PartitionProperties,
    ) -> Result<(), RegistryError> {
        let mut partitions = self.partitions.write();
        match partitions.get_mut(name) {
            Some(entry) if entry.is_live() => {
                entry.properties = Arc::new(properties);
                Ok(())
            }
            _ => Err(RegistryError::NotFound(name.clone())),
        }
    }

    /// Current version of a live partition.
    pub fn current(&self, name: &PartitionName) -> Result<VersionedPartitionName, RegistryError> {
        self.live_entry(name)
            .map(|entry| VersionedPartitionName::new(name.clone(), entry.version))
    }

    /// Lifecycle status of a live partition.
    pub fn status(&self, name: &PartitionName) -> Result<PartitionStatus, RegistryError> {
        self.live_entry(name).map(|entry| entry.status)
    }

    /// Set the lifecycle status of a live partition.
    ///
    /// `Expunged` is reserved for [`remove`](Self::remove).
    pub fn set_status(
        &self,
        name: &PartitionName,
        status: PartitionStatus,
    ) -> Result<(), RegistryError> {
        let mut partitions = self.partitions.write();
        match partitions.get_mut(name) {
            Some(entry) if entry.is_live() && status != PartitionStatus::Expunged => {
                entry.status = status;
                Ok(())
            }
            _ => Err(RegistryError::NotFound(name.clone())),
        }
    }

    /// Check that `vpn` names the current epoch of a live partition.
    pub fn validate(&self, vpn: &VersionedPartitionName) -> Result<(), RegistryError> {
        let entry = self.live_entry(vpn.partition_name())?;
        if entry.version != vpn.version() {
            return Err(RegistryError::StaleVersion {
                partition: vpn.partition_name().clone(),
                requested: vpn.version(),
                current: entry.version,
            });
        }
        Ok(())
    }

    /// Bump the epoch of a live partition (re-creation).
    ///
    /// The superseded version is queued as [`RegistryEvent::Retired`].
    pub fn advance_version(
        &self,
        name: &PartitionName,
    ) -> Result<VersionedPartitionName, RegistryError> {
        let mut partitions = self.partitions.write();
        let entry = match partitions.get_mut(name) {
            Some(entry) if entry.is_live() => entry,
            _ => return Err(RegistryError::NotFound(name.clone())),
        };
        let retired = VersionedPartitionName::new(name.clone(), entry.version);
        entry.version += 1;
        entry.status = PartitionStatus::Bootstrap;
        let current = VersionedPartitionName::new(name.clone(), entry.version);
        self.push_event(RegistryEvent::Retired(retired.clone()));
        self.push_event(RegistryEvent::Registered(current.clone()));
        info!(retired = %retired, current = %current, "Advanced partition version");
        Ok(current)
    }

    /// Unregister a partition, returning the retired identity.
    pub fn remove(&self, name: &PartitionName) -> Result<VersionedPartitionName, RegistryError> {
        let mut partitions = self.partitions.write();
        let entry = match partitions.get_mut(name) {
            Some(entry) if entry.is_live() => entry,
            _ => return Err(RegistryError::NotFound(name.clone())),
        };
        entry.status = PartitionStatus::Expunged;
        let retired = VersionedPartitionName::new(name.clone(), entry.version);
        self.push_event(RegistryEvent::Retired(retired.clone()));
        info!(partition = %retired, "Removed partition");
        Ok(retired)
    }

    /// Live partitions in rings accepted by `membership`.
    ///
    /// The iterator reads the live registry one step at a time; partitions
    /// added or removed while iterating may or may not be observed.
    pub fn get_member_partitions<M: RingMembership>(
        &self,
        membership: M,
    ) -> MemberPartitions<'_, M> {
        MemberPartitions {
            registry: self,
            membership,
            last: None,
        }
    }

    /// Reinstate a partition from persisted state without queuing events.
    ///
    /// Used when a node reopens; an entry already at a newer version wins.
    pub fn restore(
        &self,
        vpn: VersionedPartitionName,
        properties: PartitionProperties,
        status: PartitionStatus,
    ) {
        let mut partitions = self.partitions.write();
        let name = vpn.partition_name().clone();
        if let Some(entry) = partitions.get(&name) {
            if entry.version >= vpn.version() {
                return;
            }
        }
        partitions.insert(
            name,
            PartitionEntry {
                version: vpn.version(),
                properties: Arc::new(properties),
                status,
            },
        );
    }

    /// Every known partition at its current version, removed ones included.
    pub fn entries(&self) -> Vec<(VersionedPartitionName, Arc<PartitionProperties>, PartitionStatus)> {
        self.partitions
            .read()
            .iter()
            .map(|(name, entry)| {
                (
                    VersionedPartitionName::new(name.clone(), entry.version),
                    Arc::clone(&entry.properties),
                    entry.status,
                )
            })
            .collect()
    }

    /// Number of live partitions
    pub fn len(&self) -> usize {
        self.partitions
            .read()
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }

    /// Whether no partition is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all queued lifecycle events, oldest first.
    pub fn drain_events(&self) -> Vec<RegistryEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn live_entry(&self, name: &PartitionName) -> Result<PartitionEntry, RegistryError> {
        match self.partitions.read().get(name) {
            Some(entry) if entry.is_live() => Ok(entry.clone()),
            _ => Err(RegistryError::NotFound(name.clone())),
        }
    }

    fn push_event(&self, event: RegistryEvent) {
        self.events.lock().push(event);
    }
}

/// Lazy iterator over a ring member's partitions.
///
/// Each step takes the registry read lock briefly and resumes after the
/// last name it yielded.
pub struct MemberPartitions<'a, M> {
    registry: &'a PartitionRegistry,
    membership: M,
    last: Option<PartitionName>,
}

impl<M: RingMembership> Iterator for MemberPartitions<'_, M> {
    type Item = VersionedPartitionName;

    fn next(&mut self) -> Option<Self::Item> {
        let partitions = self.registry.partitions.read();
        let lower = match &self.last {
            Some(last) => Bound::Excluded(last),
            None => Bound::Unbounded,
        };
        let found = partitions
            .range::<PartitionName, _>((lower, Bound::Unbounded))
            .find(|(name, entry)| entry.is_live() && self.membership.is_member(name.ring_name()))
            .map(|(name, entry)| VersionedPartitionName::new(name.clone(), entry.version));
        drop(partitions);

        if let Some(vpn) = &found {
            self.last = Some(vpn.partition_name().clone());
        }
        found
    }
}

impl<M> std::fmt::Debug for MemberPartitions<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberPartitions")
            .field("last", &self.last)
            .finish()
    }
}
