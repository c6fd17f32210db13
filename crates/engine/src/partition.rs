//! Per-partition WAL stores
//!
//! `PartitionStores` owns one [`WalRowStore`] per live versioned partition
//! and the manifest that maps each to its backing file. It implements the
//! two paths that tie the WAL to the highwater store:
//!
//! - **commit**: append the batch, advance the local highwater to the new
//!   transaction id, notify commit sinks
//! - **retire**: move the WAL into the archive directory, close it, delete
//!   the version's highwaters
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//!   partitions.manifest
//!   wal/wal-NNNNNNNN.rows
//!   archive/wal-NNNNNNNN.rows
//! ```

use crate::manifest::{ManifestEntry, PartitionManifest};
use crate::notify::{CommitNotifier, CommitOutcome};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tideline_core::{PartitionProperties, PartitionStatus, VersionedPartitionName};
use tideline_durability::{
    BackingStore, DirectoryBackingStore, IoStats, NoopIoStats, WalConfig, WalError, WalRowDraft,
    WalRowStore,
};
use tideline_storage::{HighwaterError, HighwaterStore};
use tracing::{debug, info, warn};

/// WAL directory under the data directory
pub const WAL_DIR_NAME: &str = "wal";
/// Archive directory for retired WAL files
pub const ARCHIVE_DIR_NAME: &str = "archive";

/// Errors from partition store operations.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// No WAL is open for this partition version on this node
    #[error("No WAL open for {0}")]
    NotHosted(VersionedPartitionName),

    /// WAL failure
    #[error(transparent)]
    Wal(#[from] WalError),

    /// Highwater failure
    #[error(transparent)]
    Highwater(#[from] HighwaterError),

    /// Manifest could not be read or written
    #[error("Partition manifest error: {0}")]
    Manifest(#[source] io::Error),
}

impl From<PartitionError> for tideline_core::Error {
    fn from(e: PartitionError) -> Self {
        match e {
            PartitionError::NotHosted(vpn) => tideline_core::Error::partition_not_found(
                vpn.partition_name().clone(),
            ),
            PartitionError::Wal(e) => e.into(),
            PartitionError::Highwater(e) => e.into(),
            PartitionError::Manifest(e) => tideline_core::Error::Io(e),
        }
    }
}

/// The WAL stores of every hosted partition version.
pub struct PartitionStores {
    backing: Arc<DirectoryBackingStore>,
    archive_dir: PathBuf,
    wal_config: WalConfig,
    stats: Arc<dyn IoStats>,
    stores: DashMap<VersionedPartitionName, Arc<WalRowStore>>,
    manifest: Mutex<PartitionManifest>,
}

impl PartitionStores {
    /// Open every partition recorded in `data_dir`'s manifest.
    ///
    /// `wal_config` supplies buffer sizes and the durability of partitions
    /// whose properties do not override it.
    pub fn open(
        data_dir: &Path,
        wal_config: WalConfig,
        stats: Option<Arc<dyn IoStats>>,
    ) -> Result<Self, PartitionError> {
        let backing = Arc::new(
            DirectoryBackingStore::new(data_dir.join(WAL_DIR_NAME)).map_err(WalError::Io)?,
        );
        let manifest =
            PartitionManifest::load_or_default(data_dir).map_err(PartitionError::Manifest)?;
        let stores = PartitionStores {
            backing,
            archive_dir: data_dir.join(ARCHIVE_DIR_NAME),
            wal_config,
            stats: stats.unwrap_or_else(|| Arc::new(NoopIoStats)),
            stores: DashMap::new(),
            manifest: Mutex::new(manifest),
        };

        let hosted: Vec<ManifestEntry> = stores
            .manifest
            .lock()
            .entries()
            .iter()
            .filter(|entry| entry.index.is_some())
            .cloned()
            .collect();
        for entry in hosted {
            if let Some(index) = entry.index {
                stores.open_store(&entry.partition, &entry.properties, index)?;
            }
        }
        info!(partitions = stores.stores.len(), "Opened partition stores");
        Ok(stores)
    }

    fn open_store(
        &self,
        partition: &VersionedPartitionName,
        properties: &PartitionProperties,
        index: u64,
    ) -> Result<Arc<WalRowStore>, PartitionError> {
        let config = self.wal_config.clone().with_durability(properties.durability);
        let backing: Arc<dyn BackingStore> = self.backing.clone();
        let (store, report) =
            WalRowStore::open_with_stats(backing, index, config, Arc::clone(&self.stats))?;
        if report.truncated_bytes > 0 {
            warn!(
                partition = %partition,
                truncated_bytes = report.truncated_bytes,
                "Partition WAL recovered with truncated tail"
            );
        }
        debug!(
            partition = %partition,
            index,
            rows = report.rows_recovered,
            last_tx_id = ?report.last_tx_id,
            "Opened partition WAL"
        );
        let store = Arc::new(store);
        self.stores.insert(partition.clone(), Arc::clone(&store));
        Ok(store)
    }

    /// Every partition recorded in the manifest, retired ones included.
    pub fn manifest_entries(&self) -> Vec<ManifestEntry> {
        self.manifest.lock().entries().to_vec()
    }

    /// Open (creating if needed) the WAL for `partition`.
    pub fn create(
        &self,
        partition: &VersionedPartitionName,
        properties: &PartitionProperties,
        status: PartitionStatus,
    ) -> Result<Arc<WalRowStore>, PartitionError> {
        if let Some(store) = self.get(partition) {
            return Ok(store);
        }
        let index = {
            let mut manifest = self.manifest.lock();
            let index = manifest.assign(partition, properties.clone(), status);
            manifest.save().map_err(PartitionError::Manifest)?;
            index
        };
        self.open_store(partition, properties, index)
    }

    /// WAL of a hosted partition version
    pub fn get(&self, partition: &VersionedPartitionName) -> Option<Arc<WalRowStore>> {
        self.stores
            .get(partition)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Persist new properties or status for a hosted partition.
    pub fn record(
        &self,
        partition: &VersionedPartitionName,
        properties: &PartitionProperties,
        status: PartitionStatus,
    ) -> Result<(), PartitionError> {
        let mut manifest = self.manifest.lock();
        manifest.update(partition, properties.clone(), status);
        manifest.save().map_err(PartitionError::Manifest)
    }

    /// Append `rows`, advance the local highwater and notify sinks.
    ///
    /// Once the append succeeds the commit is reported as such: a sink or
    /// highwater failure is recorded in the outcome and the append stands.
    pub fn commit(
        &self,
        partition: &VersionedPartitionName,
        status: PartitionStatus,
        rows: &[WalRowDraft],
        highwaters: &HighwaterStore,
        notifier: &CommitNotifier,
    ) -> Result<CommitOutcome, PartitionError> {
        let store = self
            .get(partition)
            .ok_or_else(|| PartitionError::NotHosted(partition.clone()))?;
        let tx_id = store.append(rows)?;
        let advanced = highwaters.set_local(partition, tx_id);
        let mut outcome = notifier.notify(partition, status, tx_id);
        if let Err(e) = advanced {
            warn!(
                partition = %partition,
                tx_id,
                error = %e,
                "Committed without advancing local highwater"
            );
            outcome.highwater_error = Some(e.to_string());
        }
        Ok(outcome)
    }

    /// Retire `partition`: archive its WAL and delete its highwaters.
    ///
    /// Returns where the WAL was archived, if this node hosted it.
    /// Retiring a version twice is a no-op the second time. If the WAL
    /// cannot be archived the partition stays hosted and nothing else
    /// changes, so the retire can be retried.
    pub fn retire(
        &self,
        partition: &VersionedPartitionName,
        highwaters: &HighwaterStore,
    ) -> Result<Option<PathBuf>, PartitionError> {
        let archived = match self.get(partition) {
            Some(store) => {
                // Stays hosted until the move has succeeded
                let path = store.move_to(&self.archive_dir)?;
                self.stores.remove(partition);
                if let Err(e) = store.close() {
                    warn!(partition = %partition, error = %e, "Failed to close archived WAL");
                }
                Some(path)
            }
            None => None,
        };
        highwaters.delete(partition)?;

        let mut manifest = self.manifest.lock();
        if manifest.retire(partition).is_some() || archived.is_some() {
            manifest.save().map_err(PartitionError::Manifest)?;
        }
        info!(partition = %partition, archived = ?archived, "Retired partition");
        Ok(archived)
    }

    /// Sync every WAL whose fsync interval has elapsed.
    ///
    /// Failures are logged per store; returns how many stores synced.
    pub fn sync_overdue(&self) -> usize {
        let stores: Vec<(VersionedPartitionName, Arc<WalRowStore>)> = self
            .stores
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        let mut synced = 0;
        for (partition, store) in stores {
            match store.sync_if_overdue() {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => warn!(partition = %partition, error = %e, "WAL sync failed"),
            }
        }
        synced
    }

    /// Flush (and optionally fsync) every WAL.
    pub fn flush_all(&self, fsync: bool) -> Result<(), PartitionError> {
        for entry in self.stores.iter() {
            entry.value().flush(fsync)?;
        }
        Ok(())
    }

    /// Close every WAL. Stores stay registered but reject further use.
    pub fn close_all(&self) -> Result<(), PartitionError> {
        for entry in self.stores.iter() {
            entry.value().close()?;
        }
        Ok(())
    }

    /// Number of hosted partition versions
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// True when nothing is hosted
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Directory retired WALs are moved into
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }
}

impl std::fmt::Debug for PartitionStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStores")
            .field("wal_dir", &self.backing.dir())
            .field("archive_dir", &self.archive_dir)
            .field("partitions", &self.stores.len())
            .finish()
    }
}
