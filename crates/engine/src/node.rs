//! Node façade
//!
//! Wires the registry, ring cache, highwater store, partition WALs and
//! take service together from a data directory and its `tideline.toml`.
//!
//! Registry lifecycle events are applied under one lock, so a version's
//! retirement is always processed before its successor is created.
//!
//! A background thread (`tideline-hw-flush`) periodically makes buffered
//! highwaters durable and syncs WALs whose fsync interval has elapsed.

use crate::config::{TidelineConfig, CONFIG_FILE_NAME};
use crate::notify::{CommitNotifier, CommitOutcome, CommitSink};
use crate::partition::PartitionStores;
use crate::registry::{PartitionRegistry, RegistryEvent};
use crate::ring::{RingTopologyCache, RingTopologyProvider};
use crate::take::TakeService;
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tideline_core::{
    Error, PartitionName, PartitionProperties, PartitionStatus, Result, RingMember,
    VersionedPartitionName,
};
use tideline_durability::{WalRowDraft, WalScan};
use tideline_storage::HighwaterStore;
use tracing::{debug, info, warn};

struct FlusherSignal {
    stop: Mutex<bool>,
    wake: Condvar,
}

struct Flusher {
    signal: Arc<FlusherSignal>,
    handle: JoinHandle<()>,
}

/// A replication node rooted at one data directory.
pub struct Node {
    data_dir: PathBuf,
    config: TidelineConfig,
    local_member: RingMember,
    registry: Arc<PartitionRegistry>,
    rings: Arc<RingTopologyCache>,
    stores: Arc<PartitionStores>,
    highwaters: Arc<HighwaterStore>,
    notifier: CommitNotifier,
    take: TakeService,
    lifecycle: Mutex<()>,
    flusher: Mutex<Option<Flusher>>,
    closed: AtomicBool,
}

impl Node {
    /// Open the node in `data_dir`, reading (or creating) `tideline.toml`.
    ///
    /// A missing member id is generated and written back to the file so
    /// the node keeps its identity across restarts.
    pub fn open(data_dir: &Path, provider: Arc<dyn RingTopologyProvider>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        TidelineConfig::write_default_if_missing(&config_path)?;
        let mut config = TidelineConfig::from_file(&config_path)?;
        if config.member.is_none() {
            config.member = Some(RingMember::generate().as_str().to_string());
            config.write_to_file(&config_path)?;
        }
        Self::open_with_config(data_dir, config, provider)
    }

    /// Open with an explicit configuration; `tideline.toml` is not read.
    pub fn open_with_config(
        data_dir: &Path,
        config: TidelineConfig,
        provider: Arc<dyn RingTopologyProvider>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(data_dir)?;
        let local_member = match &config.member {
            Some(member) => RingMember::new(member.clone()),
            None => RingMember::generate(),
        };

        let stores = Arc::new(PartitionStores::open(data_dir, config.wal_config()?, None)?);
        let highwaters = Arc::new(HighwaterStore::open(
            data_dir,
            local_member.clone(),
            config.highwater_config()?,
        )?);

        let registry = Arc::new(PartitionRegistry::new());
        for entry in stores.manifest_entries() {
            registry.restore(entry.partition, entry.properties, entry.status);
        }

        let rings = Arc::new(RingTopologyCache::new(provider)?);
        let take = TakeService::new(
            local_member.clone(),
            Arc::clone(&registry),
            Arc::clone(&rings),
            Arc::clone(&stores),
            Arc::clone(&highwaters),
            config.take_batch_rows,
        );

        let node = Node {
            data_dir: data_dir.to_path_buf(),
            local_member,
            registry,
            rings,
            stores,
            highwaters,
            notifier: CommitNotifier::new(),
            take,
            lifecycle: Mutex::new(()),
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        };
        if let Some(interval) = node.config.flush_interval() {
            node.start_flusher(interval)?;
        }
        info!(
            dir = %node.data_dir.display(),
            member = %node.local_member,
            partitions = node.registry.len(),
            "Opened node"
        );
        Ok(node)
    }

    fn start_flusher(&self, interval: Duration) -> Result<()> {
        let signal = Arc::new(FlusherSignal {
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });
        let worker_signal = Arc::clone(&signal);
        let highwaters = Arc::clone(&self.highwaters);
        let stores = Arc::clone(&self.stores);
        let handle = std::thread::Builder::new()
            .name("tideline-hw-flush".to_string())
            .spawn(move || flush_loop(&worker_signal, interval, &highwaters, &stores))?;
        *self.flusher.lock() = Some(Flusher { signal, handle });
        Ok(())
    }

    /// Data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Effective configuration
    pub fn config(&self) -> &TidelineConfig {
        &self.config
    }

    /// This node's ring member id
    pub fn local_member(&self) -> &RingMember {
        &self.local_member
    }

    /// Partition registry
    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    /// Ring topology cache
    pub fn rings(&self) -> &RingTopologyCache {
        &self.rings
    }

    /// Highwater store
    pub fn highwaters(&self) -> &HighwaterStore {
        &self.highwaters
    }

    /// Take service
    pub fn take(&self) -> &TakeService {
        &self.take
    }

    /// Add a commit listener.
    pub fn register_sink(&self, sink: Arc<dyn CommitSink>) {
        self.notifier.register(sink);
    }

    /// Register a partition and open its WAL. Returns the current version.
    pub fn register_partition(
        &self,
        name: PartitionName,
        properties: PartitionProperties,
    ) -> Result<VersionedPartitionName> {
        let _guard = self.lifecycle.lock();
        let vpn = self.registry.register(name, properties);
        self.apply_events()?;
        Ok(vpn)
    }

    /// Re-create a partition under a new version, retiring the old one.
    pub fn advance_version(&self, name: &PartitionName) -> Result<VersionedPartitionName> {
        let _guard = self.lifecycle.lock();
        let vpn = self.registry.advance_version(name)?;
        self.apply_events()?;
        Ok(vpn)
    }

    /// Remove a partition, retiring its current version.
    pub fn remove_partition(&self, name: &PartitionName) -> Result<VersionedPartitionName> {
        let _guard = self.lifecycle.lock();
        let vpn = self.registry.remove(name)?;
        self.apply_events()?;
        Ok(vpn)
    }

    /// Change a live partition's status and persist it.
    pub fn set_status(&self, name: &PartitionName, status: PartitionStatus) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.registry.set_status(name, status)?;
        let vpn = self.registry.current(name)?;
        let properties = self.registry.get_properties(name)?;
        self.stores.record(&vpn, &properties, status)?;
        Ok(())
    }

    /// Replace a live partition's properties and persist them.
    ///
    /// Durability changes take effect when the WAL is next opened.
    pub fn update_properties(
        &self,
        name: &PartitionName,
        properties: PartitionProperties,
    ) -> Result<()> {
        let _guard = self.lifecycle.lock();
        self.registry.update_properties(name, properties.clone())?;
        let vpn = self.registry.current(name)?;
        let status = self.registry.status(name)?;
        self.stores.record(&vpn, &properties, status)?;
        Ok(())
    }

    fn apply_events(&self) -> Result<()> {
        for event in self.registry.drain_events() {
            match event {
                RegistryEvent::Retired(vpn) => {
                    self.stores.retire(&vpn, &self.highwaters)?;
                }
                RegistryEvent::Registered(vpn) => {
                    let name = vpn.partition_name();
                    let properties = self.registry.get_properties(name)?;
                    let status = self.registry.status(name)?;
                    self.stores.create(&vpn, &properties, status)?;
                    debug!(partition = %vpn, "Created partition WAL");
                }
            }
        }
        Ok(())
    }

    /// Append a batch to a current partition version.
    pub fn commit(
        &self,
        partition: &VersionedPartitionName,
        rows: &[WalRowDraft],
    ) -> Result<CommitOutcome> {
        self.registry.validate(partition)?;
        let status = self.registry.status(partition.partition_name())?;
        let outcome = self.stores.commit(
            partition,
            status,
            rows,
            &self.highwaters,
            &self.notifier,
        )?;
        Ok(outcome)
    }

    /// Scan a hosted partition version from `from_tx_id`.
    pub fn scan_from(
        &self,
        partition: &VersionedPartitionName,
        from_tx_id: u64,
    ) -> Result<WalScan> {
        let store = self
            .stores
            .get(partition)
            .ok_or_else(|| Error::partition_not_found(partition.partition_name().clone()))?;
        Ok(store.scan_from(from_tx_id)?)
    }

    /// Value payload at `fp` in a hosted partition version.
    pub fn read_value(
        &self,
        partition: &VersionedPartitionName,
        fp: u64,
    ) -> Result<Option<Vec<u8>>> {
        let store = self
            .stores
            .get(partition)
            .ok_or_else(|| Error::partition_not_found(partition.partition_name().clone()))?;
        Ok(store.read_value(fp)?)
    }

    /// Live partitions in rings this node belongs to, per the ring cache.
    pub fn member_partitions(&self) -> Vec<VersionedPartitionName> {
        self.registry
            .get_member_partitions(self.rings.for_member(self.local_member.clone()))
            .collect()
    }

    /// Make all highwaters durable and fsync every WAL.
    pub fn flush(&self, force: bool) -> Result<()> {
        self.highwaters.flush_all(force)?;
        self.stores.flush_all(true)?;
        Ok(())
    }

    fn stop_flusher(&self) {
        if let Some(flusher) = self.flusher.lock().take() {
            *flusher.signal.stop.lock() = true;
            flusher.signal.wake.notify_all();
            if flusher.handle.join().is_err() {
                warn!("Highwater flusher panicked");
            }
        }
    }

    /// Stop background work, flush and close every WAL. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_flusher();
        self.rings.shutdown();
        self.flush(false)?;
        self.stores.close_all()?;
        info!(member = %self.local_member, "Closed node");
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Error closing node on drop");
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("data_dir", &self.data_dir)
            .field("local_member", &self.local_member)
            .field("partitions", &self.registry.len())
            .finish()
    }
}

fn flush_loop(
    signal: &FlusherSignal,
    interval: Duration,
    highwaters: &HighwaterStore,
    stores: &PartitionStores,
) {
    loop {
        {
            let mut stop = signal.stop.lock();
            if *stop {
                return;
            }
            signal.wake.wait_for(&mut stop, interval);
            if *stop {
                return;
            }
        }
        if let Err(e) = highwaters.flush_all(false) {
            warn!(error = %e, "Background highwater flush failed");
        }
        let synced = stores.sync_overdue();
        if synced > 0 {
            debug!(synced, "Synced overdue WALs");
        }
    }
}
