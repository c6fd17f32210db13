//! Partition manifest (`partitions.manifest`)
//!
//! Records every partition the node knows at its current version, with
//! its properties, status and the backing index of its WAL file. Retired
//! versions keep their entry without an index so a re-registration still
//! gets a higher version after restart.
//!
//! Written atomically via temp + fsync + rename.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tideline_core::{PartitionProperties, PartitionStatus, VersionedPartitionName};

/// Manifest file name inside the data directory.
pub const MANIFEST_FILE_NAME: &str = "partitions.manifest";

/// Magic bytes for the partition manifest
const MANIFEST_MAGIC: &[u8; 4] = b"TDPM";
/// Current manifest version
const MANIFEST_VERSION: u32 = 1;

/// One partition as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Partition at its current version
    pub partition: VersionedPartitionName,
    /// Properties at the time of the last save
    pub properties: PartitionProperties,
    /// Lifecycle status
    pub status: PartitionStatus,
    /// Backing index of the WAL file; `None` once retired
    pub index: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestData {
    next_index: u64,
    entries: Vec<ManifestEntry>,
}

/// In-memory manifest bound to its file.
#[derive(Debug)]
pub struct PartitionManifest {
    path: PathBuf,
    data: ManifestData,
}

impl PartitionManifest {
    /// Load the manifest in `dir`, or start an empty one.
    pub fn load_or_default(dir: &Path) -> io::Result<Self> {
        let path = dir.join(MANIFEST_FILE_NAME);
        let data = if path.exists() {
            load_manifest(&path)?
        } else {
            ManifestData::default()
        };
        Ok(PartitionManifest { path, data })
    }

    /// File backing this manifest
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All persisted entries
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.data.entries
    }

    /// Backing index assigned to `partition`, if it has a live WAL.
    pub fn index_of(&self, partition: &VersionedPartitionName) -> Option<u64> {
        self.data
            .entries
            .iter()
            .find(|entry| &entry.partition == partition)
            .and_then(|entry| entry.index)
    }

    /// Record `partition` with a fresh backing index, replacing any entry
    /// for the same logical partition. Returns the index.
    pub fn assign(
        &mut self,
        partition: &VersionedPartitionName,
        properties: PartitionProperties,
        status: PartitionStatus,
    ) -> u64 {
        if let Some(index) = self.index_of(partition) {
            return index;
        }
        let index = self.data.next_index;
        self.data.next_index += 1;
        self.upsert(ManifestEntry {
            partition: partition.clone(),
            properties,
            status,
            index: Some(index),
        });
        index
    }

    /// Update properties and status of a recorded partition.
    pub fn update(
        &mut self,
        partition: &VersionedPartitionName,
        properties: PartitionProperties,
        status: PartitionStatus,
    ) {
        if let Some(entry) = self
            .data
            .entries
            .iter_mut()
            .find(|entry| &entry.partition == partition)
        {
            entry.properties = properties;
            entry.status = status;
        }
    }

    /// Mark `partition` retired, returning its former backing index.
    pub fn retire(&mut self, partition: &VersionedPartitionName) -> Option<u64> {
        let entry = self
            .data
            .entries
            .iter_mut()
            .find(|entry| &entry.partition == partition)?;
        entry.status = PartitionStatus::Expunged;
        entry.index.take()
    }

    /// Persist atomically.
    pub fn save(&self) -> io::Result<()> {
        write_manifest(&self.path, &self.data)
    }

    fn upsert(&mut self, new_entry: ManifestEntry) {
        let name = new_entry.partition.partition_name();
        match self
            .data
            .entries
            .iter_mut()
            .find(|entry| entry.partition.partition_name() == name)
        {
            Some(entry) => *entry = new_entry,
            None => self.data.entries.push(new_entry),
        }
    }
}

fn write_manifest(path: &Path, data: &ManifestData) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;

    let payload = rmp_serde::to_vec_named(data)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("serialize error: {}", e)))?;

    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(MANIFEST_MAGIC);
    buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
    buf.extend_from_slice(&payload);

    let tmp_path = path.with_extension("manifest.tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    File::open(dir)?.sync_all()
}

fn load_manifest(path: &Path) -> io::Result<ManifestData> {
    let buf = std::fs::read(path)?;
    if buf.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "manifest too small"));
    }
    if &buf[0..4] != MANIFEST_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad manifest magic"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&buf[4..8]);
    let version = u32::from_le_bytes(version);
    if version != MANIFEST_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported manifest version {}", version),
        ));
    }
    rmp_serde::from_slice(&buf[8..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("decode error: {}", e)))
}
