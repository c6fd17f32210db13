//! Durable highwater journal.
//!
//! An append-only file of [`JournalEntry`] records holding both the remote
//! and the local highwater keyspaces. Opening the journal replays it into a
//! [`JournalState`]; the caller keeps that state in memory and appends one
//! entry per flush or clear.
//!
//! Once the file grows past a threshold the owner calls
//! [`HighwaterJournal::rewrite`] with its current state, which replaces the
//! file using the write-fsync-rename pattern:
//!
//! 1. Write header and snapshot entries to `highwaters.journal.tmp`
//! 2. fsync the temporary file
//! 3. Atomic rename over the live journal
//! 4. fsync the parent directory

use crate::backing::sync_dir;
use crate::format::frame::{find_intact_frame, frame_size, FrameError, FRAME_LENGTH_SIZE};
use crate::format::journal::{
    JournalEntry, JournalEntryError, JournalHeader, LocalHighwater, RemoteHighwater,
    JOURNAL_HEADER_SIZE,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tideline_core::{RingMember, VersionedPartitionName};
use tracing::{debug, info, warn};

/// Journal file name inside its directory
pub const JOURNAL_FILE_NAME: &str = "highwaters.journal";

/// Errors from the highwater journal.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Storage I/O failed
    #[error("Journal I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entry before the tail is unreadable
    #[error("Corrupt journal entry at offset {offset}: {detail}")]
    Corrupt {
        /// Byte offset of the bad entry
        offset: u64,
        /// What was wrong
        detail: String,
    },

    /// Header missing or unrecognized
    #[error("Invalid journal header in {0}")]
    InvalidHeader(PathBuf),

    /// Entry could not be encoded
    #[error("Journal encode failed: {0}")]
    Encode(String),
}

impl From<JournalError> for tideline_core::Error {
    fn from(e: JournalError) -> Self {
        match e {
            JournalError::Io(io) => tideline_core::Error::Io(io),
            JournalError::Corrupt { .. } | JournalError::InvalidHeader(_) => {
                tideline_core::Error::Corruption(e.to_string())
            }
            JournalError::Encode(msg) => tideline_core::Error::Serialization(msg),
        }
    }
}

/// Replayed contents of the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalState {
    /// Remote highwaters per partition version
    pub remote: BTreeMap<VersionedPartitionName, BTreeMap<RingMember, u64>>,
    /// Local highwater per partition version
    pub local: BTreeMap<VersionedPartitionName, u64>,
    /// Partition versions that have been deleted
    pub retired: BTreeSet<VersionedPartitionName>,
}

impl JournalState {
    /// Fold one entry into the state.
    pub fn apply(&mut self, entry: &JournalEntry) {
        match entry {
            JournalEntry::Flush { remote, local } => {
                for hw in remote {
                    if self.retired.contains(&hw.partition) {
                        continue;
                    }
                    // Flushes from different shards may land out of order
                    self.remote
                        .entry(hw.partition.clone())
                        .or_default()
                        .entry(hw.member.clone())
                        .and_modify(|tx_id| *tx_id = (*tx_id).max(hw.tx_id))
                        .or_insert(hw.tx_id);
                }
                for hw in local {
                    if self.retired.contains(&hw.partition) {
                        continue;
                    }
                    self.local.insert(hw.partition.clone(), hw.tx_id);
                }
            }
            JournalEntry::Clear { partition, member } => {
                if let Some(members) = self.remote.get_mut(partition) {
                    members.remove(member);
                    if members.is_empty() {
                        self.remote.remove(partition);
                    }
                }
            }
            JournalEntry::ClearRing { member } => {
                self.remote.retain(|_, members| {
                    members.remove(member);
                    !members.is_empty()
                });
            }
            JournalEntry::Delete { partition } => {
                self.remote.remove(partition);
                self.local.remove(partition);
                self.retired.insert(partition.clone());
            }
        }
    }

    /// Entries that reproduce this state when replayed in order.
    pub fn to_entries(&self) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self
            .retired
            .iter()
            .map(|partition| JournalEntry::Delete {
                partition: partition.clone(),
            })
            .collect();

        let remote: Vec<RemoteHighwater> = self
            .remote
            .iter()
            .flat_map(|(partition, members)| {
                members.iter().map(move |(member, tx_id)| RemoteHighwater {
                    partition: partition.clone(),
                    member: member.clone(),
                    tx_id: *tx_id,
                })
            })
            .collect();
        let local: Vec<LocalHighwater> = self
            .local
            .iter()
            .map(|(partition, tx_id)| LocalHighwater {
                partition: partition.clone(),
                tx_id: *tx_id,
            })
            .collect();
        if !remote.is_empty() || !local.is_empty() {
            entries.push(JournalEntry::Flush { remote, local });
        }
        entries
    }
}

/// Append-only highwater journal file.
#[derive(Debug)]
pub struct HighwaterJournal {
    path: PathBuf,
    file: File,
    len: u64,
    epoch: u64,
}

impl HighwaterJournal {
    /// Open the journal in `dir`, creating it if missing, and replay it.
    pub fn open(dir: &Path) -> Result<(Self, JournalState), JournalError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE_NAME);
        let tmp = tmp_path(&path);
        if tmp.exists() {
            // Interrupted rewrite; the live journal is still authoritative.
            fs::remove_file(&tmp)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < JOURNAL_HEADER_SIZE {
            if !bytes.is_empty() {
                warn!(path = %path.display(), "Discarding partial journal header");
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&JournalHeader::new(0).to_bytes())?;
            file.sync_all()?;
            sync_dir(dir)?;
            debug!(path = %path.display(), "Created highwater journal");
            return Ok((
                HighwaterJournal {
                    path,
                    file,
                    len: JOURNAL_HEADER_SIZE as u64,
                    epoch: 0,
                },
                JournalState::default(),
            ));
        }

        let mut header_bytes = [0u8; JOURNAL_HEADER_SIZE];
        header_bytes.copy_from_slice(&bytes[..JOURNAL_HEADER_SIZE]);
        let header = JournalHeader::from_bytes(&header_bytes)
            .filter(JournalHeader::is_valid)
            .ok_or_else(|| JournalError::InvalidHeader(path.clone()))?;

        let (state, valid_end, entries) = replay(&bytes)?;
        let file_len = bytes.len() as u64;
        if valid_end < file_len {
            warn!(
                path = %path.display(),
                valid_end,
                truncated_bytes = file_len - valid_end,
                "Truncated torn journal tail"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }
        debug!(
            path = %path.display(),
            entries,
            epoch = header.epoch,
            "Replayed highwater journal"
        );

        Ok((
            HighwaterJournal {
                path,
                file,
                len: valid_end,
                epoch: header.epoch,
            },
            state,
        ))
    }

    /// Path of the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size in bytes
    pub fn size_in_bytes(&self) -> u64 {
        self.len
    }

    /// Number of completed rewrites
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Append one entry and fsync.
    ///
    /// On failure the file is cut back so a partial entry never survives.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        let bytes = entry
            .to_bytes()
            .map_err(|e| JournalError::Encode(e.to_string()))?;
        let start = self.len;
        let result = self
            .file
            .seek(SeekFrom::Start(start))
            .and_then(|_| self.file.write_all(&bytes))
            .and_then(|_| self.file.sync_data());
        if let Err(e) = result {
            if let Err(cut) = self.file.set_len(start) {
                warn!(error = %cut, start, "Failed to cut back journal after write error");
            }
            return Err(JournalError::Io(e));
        }
        self.len = start + bytes.len() as u64;
        Ok(())
    }

    /// fsync the journal file.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Replace the journal with a compact image of `state`.
    pub fn rewrite(&mut self, state: &JournalState) -> Result<(), JournalError> {
        let epoch = self.epoch + 1;
        let tmp = tmp_path(&self.path);

        let mut buf = JournalHeader::new(epoch).to_bytes().to_vec();
        for entry in state.to_entries() {
            let bytes = entry
                .to_bytes()
                .map_err(|e| JournalError::Encode(e.to_string()))?;
            buf.extend_from_slice(&bytes);
        }

        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        if let Some(parent) = self.path.parent() {
            sync_dir(parent)?;
        }

        let before = self.len;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.len = buf.len() as u64;
        self.epoch = epoch;
        info!(
            path = %self.path.display(),
            before_bytes = before,
            after_bytes = self.len,
            epoch,
            "Compacted highwater journal"
        );
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("journal.tmp")
}

/// Replay every entry after the header.
///
/// Returns the state, the end of the valid region, and the entry count.
/// Damage counts as a torn tail only when no intact entry follows it.
fn replay(bytes: &[u8]) -> Result<(JournalState, u64, usize), JournalError> {
    let mut state = JournalState::default();
    let mut offset = JOURNAL_HEADER_SIZE;
    let mut entries = 0usize;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < FRAME_LENGTH_SIZE {
            break;
        }
        let mut prefix = [0u8; FRAME_LENGTH_SIZE];
        prefix.copy_from_slice(&remaining[..FRAME_LENGTH_SIZE]);
        let size = match frame_size(&prefix) {
            Ok(size) => size,
            Err(e) => {
                ensure_tail(remaining, offset, &e.to_string())?;
                break;
            }
        };
        let is_last = offset + size >= bytes.len();

        match JournalEntry::from_bytes(remaining) {
            Ok((entry, consumed)) => {
                state.apply(&entry);
                entries += 1;
                offset += consumed;
            }
            Err(JournalEntryError::Frame(FrameError::InsufficientData)) => {
                ensure_tail(remaining, offset, "entry runs past end of file")?;
                break;
            }
            Err(JournalEntryError::Frame(FrameError::ChecksumMismatch { .. })) if is_last => break,
            Err(e) => {
                return Err(JournalError::Corrupt {
                    offset: offset as u64,
                    detail: e.to_string(),
                })
            }
        }
    }

    Ok((state, offset as u64, entries))
}

fn ensure_tail(remaining: &[u8], offset: usize, detail: &str) -> Result<(), JournalError> {
    match find_intact_frame(remaining) {
        Some(next) => Err(JournalError::Corrupt {
            offset: offset as u64,
            detail: format!("{}; intact entry at offset {}", detail, offset + next),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tideline_core::{PartitionName, RingName};

    fn vpn(name: &str, version: u64) -> VersionedPartitionName {
        let ring = RingName::new("ring").unwrap();
        VersionedPartitionName::new(PartitionName::new(ring, name.as_bytes().to_vec()), version)
    }

    fn flush(partition: VersionedPartitionName, member: &str, tx_id: u64) -> JournalEntry {
        JournalEntry::Flush {
            remote: vec![RemoteHighwater {
                partition,
                member: RingMember::new(member),
                tx_id,
            }],
            local: vec![],
        }
    }

    #[test]
    fn test_open_empty() {
        let dir = tempdir().unwrap();
        let (journal, state) = HighwaterJournal::open(dir.path()).unwrap();
        assert_eq!(state, JournalState::default());
        assert_eq!(journal.size_in_bytes(), JOURNAL_HEADER_SIZE as u64);
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempdir().unwrap();
        {
            let (mut journal, _) = HighwaterJournal::open(dir.path()).unwrap();
            journal.append(&flush(vpn("a", 1), "m1", 10)).unwrap();
            journal.append(&flush(vpn("a", 1), "m2", 20)).unwrap();
            journal
                .append(&JournalEntry::ClearRing {
                    member: RingMember::new("m1"),
                })
                .unwrap();
        }
        let (_, state) = HighwaterJournal::open(dir.path()).unwrap();
        let members = &state.remote[&vpn("a", 1)];
        assert_eq!(members.get(&RingMember::new("m1")), None);
        assert_eq!(members.get(&RingMember::new("m2")), Some(&20));
    }

    #[test]
    fn test_delete_retires_partition() {
        let mut state = JournalState::default();
        state.apply(&flush(vpn("a", 1), "m1", 10));
        state.apply(&JournalEntry::Delete {
            partition: vpn("a", 1),
        });
        state.apply(&flush(vpn("a", 1), "m1", 11));
        assert!(state.remote.is_empty());
        assert!(state.retired.contains(&vpn("a", 1)));
    }

    #[test]
    fn test_out_of_order_flushes_keep_max() {
        let mut state = JournalState::default();
        state.apply(&flush(vpn("a", 1), "m1", 10));
        state.apply(&flush(vpn("a", 1), "m1", 7));
        assert_eq!(state.remote[&vpn("a", 1)][&RingMember::new("m1")], 10);

        state.apply(&JournalEntry::Clear {
            partition: vpn("a", 1),
            member: RingMember::new("m1"),
        });
        state.apply(&flush(vpn("a", 1), "m1", 2));
        assert_eq!(state.remote[&vpn("a", 1)][&RingMember::new("m1")], 2);
    }

    #[test]
    fn test_torn_tail_truncated() {
        let dir = tempdir().unwrap();
        let path = {
            let (mut journal, _) = HighwaterJournal::open(dir.path()).unwrap();
            journal.append(&flush(vpn("a", 1), "m1", 10)).unwrap();
            journal.path().to_path_buf()
        };
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x20, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let (journal, state) = HighwaterJournal::open(dir.path()).unwrap();
        assert_eq!(state.remote[&vpn("a", 1)][&RingMember::new("m1")], 10);
        assert_eq!(fs::metadata(&path).unwrap().len(), journal.size_in_bytes());
    }

    #[test]
    fn test_rewrite_preserves_state() {
        let dir = tempdir().unwrap();
        let (mut journal, mut state) = HighwaterJournal::open(dir.path()).unwrap();
        for tx in 0..50 {
            let entry = flush(vpn("a", 1), "m1", tx);
            journal.append(&entry).unwrap();
            state.apply(&entry);
        }
        let delete = JournalEntry::Delete {
            partition: vpn("b", 2),
        };
        journal.append(&delete).unwrap();
        state.apply(&delete);

        let before = journal.size_in_bytes();
        journal.rewrite(&state).unwrap();
        assert!(journal.size_in_bytes() < before);
        assert_eq!(journal.epoch(), 1);
        drop(journal);

        let (journal, replayed) = HighwaterJournal::open(dir.path()).unwrap();
        assert_eq!(replayed, state);
        assert_eq!(journal.epoch(), 1);
    }
}
