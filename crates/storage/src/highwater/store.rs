//! Sharded highwater store
//!
//! Tracks, per versioned partition, the highest transaction id each remote
//! ring member has applied, plus this node's own local frontier.
//!
//! # Design
//!
//! - DashMap of partition -> `Arc<RwLock<FxHashMap<member, tx_id>>>`;
//!   snapshots take the partition's read lock so they see one point in time
//! - Update shards: `delta_index % shard_count` selects a `Mutex<Shard>`
//!   holding the dirty entries not yet flushed; different shards never
//!   contend
//! - One journal (behind its own mutex) holds both keyspaces durably
//!
//! # Lock Order
//!
//! shard locks (ascending index) -> local dirty lock -> journal lock.
//! Map entries and per-partition locks are leaves.
//!
//! # Clears and Deletes
//!
//! `clear`, `clear_ring` and `delete` lock every shard, append their
//! journal entry, and only then change memory and purge matching dirty
//! entries. A failed journal write leaves memory untouched, and a later
//! flush can never resurrect what was cleared.

use super::config::HighwaterConfig;
use super::error::HighwaterError;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use tideline_core::{RingMember, RingMemberHighwater, VersionedPartitionName, WalHighwater};
use tideline_durability::format::{JournalEntry, LocalHighwater, RemoteHighwater};
use tideline_durability::{HighwaterJournal, JournalState};
use tracing::{debug, info, warn};

type MemberHighwaters = Arc<RwLock<FxHashMap<RingMember, u64>>>;

/// Buffered updates for one shard
#[derive(Debug, Default)]
struct Shard {
    dirty: FxHashMap<(VersionedPartitionName, RingMember), u64>,
    pending_updates: u64,
}

/// Journal plus the state it durably holds
#[derive(Debug)]
struct JournalSlot {
    journal: HighwaterJournal,
    durable: JournalState,
    compacted_size: u64,
}

/// Remote and local highwater marks with durable, sharded flushing.
pub struct HighwaterStore {
    local_member: RingMember,
    config: HighwaterConfig,
    remote: DashMap<VersionedPartitionName, MemberHighwaters>,
    local: DashMap<VersionedPartitionName, u64>,
    retired: DashSet<VersionedPartitionName>,
    shards: Vec<Mutex<Shard>>,
    local_dirty: Mutex<FxHashMap<VersionedPartitionName, u64>>,
    journal: Mutex<JournalSlot>,
}

impl HighwaterStore {
    /// Open the store in `dir`, replaying its journal.
    ///
    /// `local_member` names this node in partition snapshots that include
    /// the local frontier.
    pub fn open(
        dir: &Path,
        local_member: RingMember,
        config: HighwaterConfig,
    ) -> Result<Self, HighwaterError> {
        config.validate()?;
        let (journal, durable) = HighwaterJournal::open(dir)?;

        let remote = DashMap::new();
        for (partition, members) in &durable.remote {
            let map: FxHashMap<RingMember, u64> =
                members.iter().map(|(m, tx)| (m.clone(), *tx)).collect();
            remote.insert(partition.clone(), Arc::new(RwLock::new(map)));
        }
        let local = DashMap::new();
        for (partition, tx_id) in &durable.local {
            local.insert(partition.clone(), *tx_id);
        }
        let retired = DashSet::new();
        for partition in &durable.retired {
            retired.insert(partition.clone());
        }

        info!(
            dir = %dir.display(),
            partitions = remote.len(),
            local = local.len(),
            retired = retired.len(),
            shards = config.shard_count,
            "Opened highwater store"
        );

        let shards = (0..config.shard_count)
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        let compacted_size = journal.size_in_bytes();
        Ok(HighwaterStore {
            local_member,
            config,
            remote,
            local,
            retired,
            shards,
            local_dirty: Mutex::new(FxHashMap::default()),
            journal: Mutex::new(JournalSlot {
                journal,
                durable,
                compacted_size,
            }),
        })
    }

    /// Member reported for the local frontier
    pub fn local_member(&self) -> &RingMember {
        &self.local_member
    }

    /// Number of update shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Whether `partition` has been deleted
    pub fn is_retired(&self, partition: &VersionedPartitionName) -> bool {
        self.retired.contains(partition)
    }

    fn shard(&self, delta_index: usize) -> &Mutex<Shard> {
        &self.shards[delta_index % self.shards.len()]
    }

    fn lock_all_shards(&self) -> Vec<MutexGuard<'_, Shard>> {
        self.shards.iter().map(|shard| shard.lock()).collect()
    }

    fn members_of(&self, partition: &VersionedPartitionName) -> Option<MemberHighwaters> {
        self.remote.get(partition).map(|entry| Arc::clone(entry.value()))
    }

    /// Raise `member`'s highwater for `partition` to `tx_id` if larger.
    ///
    /// Returns `true` when the stored value changed. `updates` is the
    /// caller's batch count and accumulates on the shard until the next
    /// flush.
    pub fn set_if_larger(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
        tx_id: u64,
        delta_index: usize,
        updates: u64,
    ) -> Result<bool, HighwaterError> {
        let mut shard = self.shard(delta_index).lock();
        if self.retired.contains(partition) {
            return Err(HighwaterError::Retired(partition.clone()));
        }

        let members = Arc::clone(
            self.remote
                .entry(partition.clone())
                .or_insert_with(Default::default)
                .value(),
        );
        let mut members = members.write();
        if let Some(&current) = members.get(member) {
            if current >= tx_id {
                return Ok(false);
            }
        }
        members.insert(member.clone(), tx_id);
        shard
            .dirty
            .insert((partition.clone(), member.clone()), tx_id);
        shard.pending_updates += updates;
        Ok(true)
    }

    /// Last known highwater for (`member`, `partition`).
    pub fn get(&self, member: &RingMember, partition: &VersionedPartitionName) -> Option<u64> {
        self.members_of(partition)
            .and_then(|members| members.read().get(member).copied())
    }

    /// Point-in-time snapshot of every member's highwater for `partition`.
    ///
    /// With `include_local`, the local frontier is reported under
    /// [`local_member`](Self::local_member).
    pub fn get_partition_highwater(
        &self,
        partition: &VersionedPartitionName,
        include_local: bool,
    ) -> WalHighwater {
        let mut highwaters: Vec<RingMemberHighwater> = match self.members_of(partition) {
            Some(members) => members
                .read()
                .iter()
                .map(|(member, tx_id)| RingMemberHighwater {
                    member: member.clone(),
                    tx_id: *tx_id,
                })
                .collect(),
            None => Vec::new(),
        };
        if include_local {
            if let Some(tx_id) = self.get_local(partition) {
                highwaters.retain(|h| h.member != self.local_member);
                highwaters.push(RingMemberHighwater {
                    member: self.local_member.clone(),
                    tx_id,
                });
            }
        }
        WalHighwater::new(highwaters)
    }

    /// Forget `member`'s highwater for `partition`.
    pub fn clear(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
    ) -> Result<(), HighwaterError> {
        let mut shards = self.lock_all_shards();
        self.append_journal(JournalEntry::Clear {
            partition: partition.clone(),
            member: member.clone(),
        })?;

        if let Some(members) = self.members_of(partition) {
            members.write().remove(member);
        }
        self.remote
            .remove_if(partition, |_, members| members.read().is_empty());
        let key = (partition.clone(), member.clone());
        for shard in shards.iter_mut() {
            shard.dirty.remove(&key);
        }
        debug!(member = %member, partition = %partition, "Cleared highwater");
        Ok(())
    }

    /// Forget `member`'s highwaters for every partition.
    pub fn clear_ring(&self, member: &RingMember) -> Result<(), HighwaterError> {
        let mut shards = self.lock_all_shards();
        self.append_journal(JournalEntry::ClearRing {
            member: member.clone(),
        })?;

        for entry in self.remote.iter() {
            entry.value().write().remove(member);
        }
        self.remote
            .retain(|_, members| !members.read().is_empty());
        for shard in shards.iter_mut() {
            shard.dirty.retain(|(_, m), _| m != member);
        }
        debug!(member = %member, "Cleared ring member highwaters");
        Ok(())
    }

    /// Permanently remove all state for `partition`.
    ///
    /// Drops every member's highwater and the local frontier, and retires
    /// the identity: later writes for it fail with
    /// [`HighwaterError::Retired`]. Deleting twice is a no-op.
    pub fn delete(&self, partition: &VersionedPartitionName) -> Result<(), HighwaterError> {
        let mut shards = self.lock_all_shards();
        let mut local_dirty = self.local_dirty.lock();
        if self.retired.contains(partition) {
            return Ok(());
        }
        self.append_journal(JournalEntry::Delete {
            partition: partition.clone(),
        })?;

        self.retired.insert(partition.clone());
        self.remote.remove(partition);
        self.local.remove(partition);
        local_dirty.remove(partition);
        for shard in shards.iter_mut() {
            shard.dirty.retain(|(p, _), _| p != partition);
        }
        info!(partition = %partition, "Deleted partition highwaters");
        Ok(())
    }

    /// Record this node's own frontier for `partition`. Never lowers it.
    pub fn set_local(
        &self,
        partition: &VersionedPartitionName,
        tx_id: u64,
    ) -> Result<(), HighwaterError> {
        let mut local_dirty = self.local_dirty.lock();
        if self.retired.contains(partition) {
            return Err(HighwaterError::Retired(partition.clone()));
        }
        let mut frontier = self.local.entry(partition.clone()).or_insert(tx_id);
        if *frontier < tx_id {
            *frontier = tx_id;
        }
        let current = *frontier;
        drop(frontier);
        local_dirty.insert(partition.clone(), current);
        Ok(())
    }

    /// This node's frontier for `partition`, if one was ever set.
    pub fn get_local(&self, partition: &VersionedPartitionName) -> Option<u64> {
        self.local.get(partition).map(|entry| *entry.value())
    }

    /// Make buffered local frontiers durable.
    ///
    /// Returns `true` when anything was written.
    pub fn flush_local(&self) -> Result<bool, HighwaterError> {
        let mut local_dirty = self.local_dirty.lock();
        if local_dirty.is_empty() {
            return Ok(false);
        }
        let local: Vec<LocalHighwater> = local_dirty
            .iter()
            .map(|(partition, tx_id)| LocalHighwater {
                partition: partition.clone(),
                tx_id: *tx_id,
            })
            .collect();
        let count = local.len();
        self.append_journal(JournalEntry::Flush {
            remote: Vec::new(),
            local,
        })?;
        local_dirty.clear();
        debug!(count, "Flushed local highwaters");
        Ok(true)
    }

    /// Make one shard's buffered remote highwaters durable.
    ///
    /// `pre_flush` runs with the shard lock held, right before the journal
    /// write; if it fails nothing is written and the updates stay
    /// buffered. Without `force`, a shard with nothing buffered is
    /// skipped. Returns `true` when a durability step ran.
    pub fn flush<F>(
        &self,
        delta_index: usize,
        force: bool,
        pre_flush: F,
    ) -> Result<bool, HighwaterError>
    where
        F: FnOnce() -> Result<(), HighwaterError>,
    {
        let mut shard = self.shard(delta_index).lock();
        if shard.dirty.is_empty() && !force {
            return Ok(false);
        }

        pre_flush()?;

        if shard.dirty.is_empty() {
            self.journal.lock().journal.sync()?;
            return Ok(true);
        }

        let remote: Vec<RemoteHighwater> = shard
            .dirty
            .iter()
            .map(|((partition, member), tx_id)| RemoteHighwater {
                partition: partition.clone(),
                member: member.clone(),
                tx_id: *tx_id,
            })
            .collect();
        let count = remote.len();
        let updates = shard.pending_updates;
        self.append_journal(JournalEntry::Flush {
            remote,
            local: Vec::new(),
        })?;
        shard.dirty.clear();
        shard.pending_updates = 0;
        debug!(
            shard = delta_index % self.shards.len(),
            count, updates, "Flushed remote highwaters"
        );
        Ok(true)
    }

    /// Flush every shard and the local keyspace.
    pub fn flush_all(&self, force: bool) -> Result<(), HighwaterError> {
        for index in 0..self.shards.len() {
            self.flush(index, force, || Ok(()))?;
        }
        self.flush_local()?;
        Ok(())
    }

    /// Updates buffered on a shard since its last flush.
    pub fn pending_updates(&self, delta_index: usize) -> u64 {
        self.shard(delta_index).lock().pending_updates
    }

    /// Current journal size in bytes
    pub fn journal_size(&self) -> u64 {
        self.journal.lock().journal.size_in_bytes()
    }

    /// Rewrite the journal to its compact form now.
    pub fn compact(&self) -> Result<(), HighwaterError> {
        let mut slot = self.journal.lock();
        let JournalSlot {
            journal,
            durable,
            compacted_size,
        } = &mut *slot;
        journal.rewrite(durable)?;
        *compacted_size = journal.size_in_bytes();
        Ok(())
    }

    fn append_journal(&self, entry: JournalEntry) -> Result<(), HighwaterError> {
        let mut slot = self.journal.lock();
        let JournalSlot {
            journal,
            durable,
            compacted_size,
        } = &mut *slot;
        journal.append(&entry)?;
        durable.apply(&entry);

        let size = journal.size_in_bytes();
        if size > self.config.compact_threshold_bytes && size > compacted_size.saturating_mul(2) {
            // The entry is already durable; a failed rewrite only delays
            // compaction.
            match journal.rewrite(durable) {
                Ok(()) => *compacted_size = journal.size_in_bytes(),
                Err(e) => warn!(error = %e, "Highwater journal compaction failed"),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HighwaterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighwaterStore")
            .field("local_member", &self.local_member)
            .field("partitions", &self.remote.len())
            .field("shards", &self.shards.len())
            .finish()
    }
}
