//! Commits through the node and scans of the resulting WAL.

use crate::common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tideline::{CommitSink, SinkError, WalError};

fn setup() -> (TestNode, VersionedPartitionName) {
    let rings = StaticRings::new();
    rings.set(&ring("main"), 1, &["a", "b"]);
    let node = TestNode::new("a", rings);
    let vpn = node
        .node()
        .register_partition(partition("main", "users"), strict_properties())
        .unwrap();
    (node, vpn)
}

#[test]
fn tx_ids_increase_and_match_scan_order() {
    let (node, vpn) = setup();
    let tx_ids = node.commit_keys(&vpn, &["a", "b", "c", "d", "e"]);
    assert_eq!(tx_ids, vec![1, 2, 3, 4, 5]);

    let scanned: Vec<u64> = node
        .node()
        .scan_from(&vpn, 0)
        .unwrap()
        .map(|row| row.unwrap().tx_id)
        .collect();
    assert_eq!(scanned, tx_ids);
}

#[test]
fn scan_from_middle_and_stop_early() {
    let (node, vpn) = setup();
    node.commit_keys(&vpn, &["a", "b", "c", "d", "e"]);

    let from_three: Vec<u64> = node
        .node()
        .scan_from(&vpn, 3)
        .unwrap()
        .map(|row| row.unwrap().tx_id)
        .collect();
    assert_eq!(from_three, vec![3, 4, 5]);

    let first_two: Vec<u64> = node
        .node()
        .scan_from(&vpn, 1)
        .unwrap()
        .take(2)
        .map(|row| row.unwrap().tx_id)
        .collect();
    assert_eq!(first_two, vec![1, 2]);
}

#[test]
fn batch_shares_one_tx_id_and_streams_tombstones() {
    let (node, vpn) = setup();
    let outcome = node
        .node()
        .commit(
            &vpn,
            &[
                put("k1", "v1"),
                WalRowDraft::tombstone(b"k2".to_vec(), 5, 1),
            ],
        )
        .unwrap();
    assert_eq!(outcome.tx_id, 1);

    let rows: Vec<_> = node
        .node()
        .scan_from(&vpn, 0)
        .unwrap()
        .map(|row| row.unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.tx_id == 1));
    assert!(!rows[0].tombstoned);
    assert!(rows[1].tombstoned);

    assert_eq!(
        node.node().read_value(&vpn, rows[0].fp).unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(node.node().read_value(&vpn, rows[1].fp).unwrap(), None);
}

#[test]
fn empty_batch_is_rejected() {
    let (node, vpn) = setup();
    let err = node.node().commit(&vpn, &[]).unwrap_err();
    assert!(matches!(err, tideline::Error::InvalidInput(_)));
    assert_eq!(node.node().highwaters().get_local(&vpn), None);
}

#[test]
fn commit_to_stale_version_is_rejected() {
    let (node, vpn) = setup();
    let v2 = node
        .node()
        .advance_version(vpn.partition_name())
        .unwrap();
    assert_eq!(v2.version(), 2);

    let err = node.node().commit(&vpn, &[put("k", "v")]).unwrap_err();
    assert!(err.is_stale());
    assert_eq!(node.node().commit(&v2, &[put("k", "v")]).unwrap().tx_id, 1);
}

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<(VersionedPartitionName, PartitionStatus, u64)>>,
}

impl CommitSink for Recording {
    fn on_commit(
        &self,
        partition: &VersionedPartitionName,
        status: PartitionStatus,
        tx_id: u64,
    ) -> Result<(), SinkError> {
        self.seen.lock().push((partition.clone(), status, tx_id));
        Ok(())
    }
}

struct Unreachable;

impl CommitSink for Unreachable {
    fn on_commit(
        &self,
        _partition: &VersionedPartitionName,
        _status: PartitionStatus,
        _tx_id: u64,
    ) -> Result<(), SinkError> {
        Err(SinkError::new("peer unreachable"))
    }
}

#[test]
fn sinks_hear_commits_and_failures_do_not_unwind() {
    let (node, vpn) = setup();
    let recording = Arc::new(Recording::default());
    node.node().register_sink(recording.clone());
    node.node().register_sink(Arc::new(Unreachable));
    node.node()
        .set_status(vpn.partition_name(), PartitionStatus::Online)
        .unwrap();

    let outcome = node.node().commit(&vpn, &[put("k", "v")]).unwrap();
    assert_eq!(outcome.notified, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(
        *recording.seen.lock(),
        vec![(vpn.clone(), PartitionStatus::Online, 1)]
    );
    assert_eq!(node.node().highwaters().get_local(&vpn), Some(1));
}

#[test]
fn scan_after_close_reports_closed() {
    let (mut node, vpn) = setup();
    node.commit_keys(&vpn, &["a", "b"]);
    let mut scan = node.node().scan_from(&vpn, 0).unwrap();
    node.node().close().unwrap();
    assert!(matches!(scan.next(), Some(Err(WalError::Closed))));
    assert!(scan.next().is_none());
    node.reopen();
}
