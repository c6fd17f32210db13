//! Corruption detection simulation tests
//!
//! These tests verify that row file damage is classified correctly:
//! - CRC32 detects bit flips
//! - A torn tail is truncated on open and reported
//! - A bad record before the tail is a hard error, not silent data loss
//! - Earlier records survive tail damage
//! - A transaction torn mid-batch is dropped whole
//! - A damaged length before intact records is corruption, in the WAL
//!   and in the highwater journal

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tideline_core::{PartitionName, RingMember, RingName, VersionedPartitionName};
use tideline_durability::format::{
    JournalEntry, RemoteHighwater, JOURNAL_HEADER_SIZE, ROW_FILE_HEADER_SIZE,
};
use tideline_durability::{
    BackingStore, DirectoryBackingStore, HighwaterJournal, JournalError, RecoveryStop, WalConfig,
    WalError, WalRow, WalRowDraft, WalRowStore,
};

fn backing(dir: &TempDir) -> Arc<DirectoryBackingStore> {
    Arc::new(DirectoryBackingStore::new(dir.path()).unwrap())
}

fn row(i: u32) -> WalRowDraft {
    WalRowDraft::put(format!("key-{}", i), vec![i as u8; 32], i as i64, 1)
}

/// Write `n` single-row transactions, returning the rows and the file path.
fn write_rows(dir: &TempDir, n: u32) -> (Vec<WalRow>, PathBuf) {
    let store_backing = backing(dir);
    let path = store_backing.path_for(1);
    let (store, _) = WalRowStore::open(store_backing, 1, WalConfig::for_testing()).unwrap();
    for i in 0..n {
        store.append(&[row(i)]).unwrap();
    }
    let rows = store.scan().unwrap().map(|r| r.unwrap()).collect();
    store.close().unwrap();
    (rows, path)
}

fn flip_byte(path: &PathBuf, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut buf = [0u8; 1];
    file.read_exact(&mut buf).unwrap();
    buf[0] ^= 0xFF;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&buf).unwrap();
    file.sync_all().unwrap();
}

fn reopen(dir: &TempDir) -> Result<(WalRowStore, tideline_durability::RecoveryReport), WalError> {
    WalRowStore::open(backing(dir), 1, WalConfig::for_testing())
}

#[test]
fn test_crc_detects_bit_flip_before_tail() {
    let dir = TempDir::new().unwrap();
    let (rows, path) = write_rows(&dir, 3);

    // Damage the value bytes of the first record
    flip_byte(&path, rows[0].fp + 30);

    match reopen(&dir) {
        Err(WalError::Corrupt { offset, .. }) => assert_eq!(offset, rows[0].fp),
        other => panic!("expected Corrupt, got {:?}", other.map(|(_, r)| r)),
    }
}

#[test]
fn test_bit_flip_in_last_record_is_truncated() {
    let dir = TempDir::new().unwrap();
    let (rows, path) = write_rows(&dir, 3);
    flip_byte(&path, rows[2].fp + 30);

    let (store, report) = reopen(&dir).unwrap();
    assert_eq!(report.rows_recovered, 2);
    assert_eq!(report.last_tx_id, Some(2));
    assert_eq!(report.stop, RecoveryStop::TruncatedTail { offset: rows[2].fp });
    assert_eq!(store.size_in_bytes().unwrap(), rows[2].fp);
}

#[test]
fn test_truncated_entry_handling() {
    let dir = TempDir::new().unwrap();
    let (rows, path) = write_rows(&dir, 4);

    // Chop the final record in half
    let file_len = std::fs::metadata(&path).unwrap().len();
    let cut = rows[3].fp + (file_len - rows[3].fp) / 2;
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(cut)
        .unwrap();

    let (store, report) = reopen(&dir).unwrap();
    assert_eq!(report.rows_recovered, 3);
    assert_eq!(report.truncated_bytes, cut - rows[3].fp);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), rows[3].fp);

    // Appends continue after the recovered tail with the next tx id
    assert_eq!(store.append(&[row(99)]).unwrap(), 4);
    let recovered: Vec<WalRow> = store.scan().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(recovered.len(), 4);
    assert_eq!(recovered[3].key, b"key-99".to_vec());
}

#[test]
fn test_garbage_length_tail() {
    let dir = TempDir::new().unwrap();
    let (_, path) = write_rows(&dir, 2);
    let valid_len = std::fs::metadata(&path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xFF, 0xFF, 0xFF, 0x7F, 1, 2, 3]).unwrap();
    drop(file);

    let (_, report) = reopen(&dir).unwrap();
    assert_eq!(report.rows_recovered, 2);
    assert_eq!(report.valid_end, valid_len);
    assert_eq!(report.truncated_bytes, 7);
}

#[test]
fn test_zero_length_file() {
    let dir = TempDir::new().unwrap();
    let path = backing(&dir).path_for(1);
    std::fs::File::create(&path).unwrap();

    let (store, report) = reopen(&dir).unwrap();
    assert_eq!(report.rows_recovered, 0);
    assert_eq!(store.size_in_bytes().unwrap(), ROW_FILE_HEADER_SIZE as u64);
    assert_eq!(store.append(&[row(0)]).unwrap(), 1);
}

#[test]
fn test_partial_header_is_rewritten() {
    let dir = TempDir::new().unwrap();
    let path = backing(&dir).path_for(1);
    std::fs::write(&path, b"TDR").unwrap();

    let (store, report) = reopen(&dir).unwrap();
    assert_eq!(report.rows_recovered, 0);
    assert_eq!(store.last_tx_id(), None);
}

#[test]
fn test_bad_magic_rejected() {
    let dir = TempDir::new().unwrap();
    let path = backing(&dir).path_for(1);
    std::fs::write(&path, [0xABu8; 64]).unwrap();

    assert!(matches!(reopen(&dir), Err(WalError::InvalidHeader(_))));
}

#[test]
fn test_corruption_preserves_earlier_entries() {
    let dir = TempDir::new().unwrap();
    let (rows, path) = write_rows(&dir, 5);

    // Tear the last two records off at an odd offset
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(rows[3].fp + 3)
        .unwrap();

    let (store, _) = reopen(&dir).unwrap();
    let recovered: Vec<WalRow> = store.scan().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(recovered, rows[..3].to_vec());
    for row in &recovered {
        assert!(store.read_value(row.fp).unwrap().is_some());
    }
}

#[test]
fn test_bad_length_before_intact_records_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let (rows, path) = write_rows(&dir, 5);
    let file_len = std::fs::metadata(&path).unwrap().len();

    // High byte of the first record's length prefix
    flip_byte(&path, rows[0].fp + 3);

    match reopen(&dir) {
        Err(WalError::Corrupt { offset, .. }) => assert_eq!(offset, rows[0].fp),
        other => panic!("expected Corrupt, got {:?}", other.map(|(_, r)| r)),
    }
    assert_eq!(std::fs::metadata(&path).unwrap().len(), file_len);
}

#[test]
fn test_overlong_length_before_intact_records_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let (rows, path) = write_rows(&dir, 5);

    // Second byte: the length stays legal but runs past the end of file
    flip_byte(&path, rows[1].fp + 1);

    match reopen(&dir) {
        Err(WalError::Corrupt { offset, .. }) => assert_eq!(offset, rows[1].fp),
        other => panic!("expected Corrupt, got {:?}", other.map(|(_, r)| r)),
    }
}

#[test]
fn test_torn_batch_is_dropped_whole() {
    for tear in [5u64, 0] {
        let dir = TempDir::new().unwrap();
        let store_backing = backing(&dir);
        let path = store_backing.path_for(1);
        let rows: Vec<WalRow> = {
            let (store, _) =
                WalRowStore::open(store_backing, 1, WalConfig::for_testing()).unwrap();
            store.append(&[row(0)]).unwrap();
            store.append(&[row(1), row(2), row(3)]).unwrap();
            let rows = store.scan().unwrap().map(|r| r.unwrap()).collect();
            store.close().unwrap();
            rows
        };

        // Cut inside, or exactly at the start of, the batch's last row
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(rows[3].fp + tear)
            .unwrap();

        let (store, report) = reopen(&dir).unwrap();
        assert_eq!(report.rows_recovered, 1, "tear {}", tear);
        assert_eq!(report.last_tx_id, Some(1));
        assert_eq!(report.stop, RecoveryStop::TruncatedTail { offset: rows[1].fp });
        assert_eq!(std::fs::metadata(&path).unwrap().len(), rows[1].fp);
        assert_eq!(store.scan().unwrap().count(), 1);
        assert_eq!(store.append(&[row(4)]).unwrap(), 2);
    }
}

fn journal_vpn(name: &str) -> VersionedPartitionName {
    let ring = RingName::new("ring").unwrap();
    VersionedPartitionName::new(PartitionName::new(ring, name.as_bytes().to_vec()), 1)
}

#[test]
fn test_journal_bad_length_before_intact_entries_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = {
        let (mut journal, _) = HighwaterJournal::open(dir.path()).unwrap();
        journal
            .append(&JournalEntry::Flush {
                remote: vec![RemoteHighwater {
                    partition: journal_vpn("a"),
                    member: RingMember::new("m1"),
                    tx_id: 10,
                }],
                local: vec![],
            })
            .unwrap();
        journal
            .append(&JournalEntry::Clear {
                partition: journal_vpn("a"),
                member: RingMember::new("m1"),
            })
            .unwrap();
        journal.path().to_path_buf()
    };

    flip_byte(&path, JOURNAL_HEADER_SIZE as u64 + 3);

    match HighwaterJournal::open(dir.path()) {
        Err(JournalError::Corrupt { offset, .. }) => {
            assert_eq!(offset, JOURNAL_HEADER_SIZE as u64)
        }
        Err(e) => panic!("expected Corrupt, got {}", e),
        Ok((_, state)) => panic!("expected Corrupt, replayed {:?}", state.remote),
    }
}
