//! Partition versions across re-creation, removal and restart.

use crate::common::*;
use tideline::{Error, WalError};

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

fn archived_files(node: &TestNode) -> usize {
    match std::fs::read_dir(node.path().join("archive")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn advance_version_archives_old_wal() {
    let (node, v1) = setup();
    node.commit_keys(&v1, &["a", "b"]);
    node.node()
        .highwaters()
        .set_if_larger(&RingMember::new("b"), &v1, 2, 0, 1)
        .unwrap();

    let v2 = node.node().advance_version(v1.partition_name()).unwrap();
    assert_eq!(v2.version(), v1.version() + 1);
    assert_eq!(archived_files(&node), 1);

    let err = node.node().commit(&v1, &[put("c", "v")]).unwrap_err();
    assert!(err.is_stale());
    assert!(node.node().scan_from(&v1, 0).is_err());
    assert_eq!(node.node().highwaters().get(&RingMember::new("b"), &v1), None);

    // the new version starts empty
    assert_eq!(node.node().scan_from(&v2, 0).unwrap().count(), 0);
    assert_eq!(node.commit_keys(&v2, &["c"]), vec![1]);
}

#[test]
fn remove_then_register_comes_back_one_version_later() {
    let (node, v1) = setup();
    node.commit_keys(&v1, &["a"]);

    let removed = node.node().remove_partition(v1.partition_name()).unwrap();
    assert_eq!(removed, v1);
    let err = node.node().commit(&v1, &[put("b", "v")]).unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        node.node().remove_partition(v1.partition_name()),
        Err(Error::NotFound(_))
    ));

    let v2 = node
        .node()
        .register_partition(v1.partition_name().clone(), strict_properties())
        .unwrap();
    assert_eq!(v2.version(), 2);
    assert_eq!(
        node.node().registry().status(v2.partition_name()).unwrap(),
        PartitionStatus::Bootstrap
    );
    assert_eq!(node.commit_keys(&v2, &["b"]), vec![1]);
}

#[test]
fn register_is_idempotent_for_live_partition() {
    let (node, v1) = setup();
    let again = node
        .node()
        .register_partition(v1.partition_name().clone(), PartitionProperties::default())
        .unwrap();
    assert_eq!(again, v1);
    let properties = node
        .node()
        .registry()
        .get_properties(v1.partition_name())
        .unwrap();
    assert_eq!(properties.durability, Durability::FsyncAlways);
}

#[test]
fn restart_restores_registry_wal_and_status() {
    let (mut node, v1) = setup();
    node.commit_keys(&v1, &["a", "b", "c"]);
    let v2 = node.node().advance_version(v1.partition_name()).unwrap();
    node.commit_keys(&v2, &["d"]);
    node.node()
        .set_status(v2.partition_name(), PartitionStatus::Online)
        .unwrap();
    let gone = node
        .node()
        .register_partition(partition("main", "gone"), strict_properties())
        .unwrap();
    node.node().remove_partition(gone.partition_name()).unwrap();

    node.reopen();

    let registry = node.node().registry();
    assert_eq!(registry.current(v2.partition_name()).unwrap(), v2);
    assert_eq!(
        registry.status(v2.partition_name()).unwrap(),
        PartitionStatus::Online
    );
    assert!(node.node().commit(&v1, &[put("x", "v")]).unwrap_err().is_stale());
    assert_eq!(node.node().highwaters().get_local(&v2), Some(1));
    assert_eq!(node.commit_keys(&v2, &["e"]), vec![2]);

    // removed partitions stay removed and keep counting versions
    assert!(registry.current(gone.partition_name()).is_err());
    let back = node
        .node()
        .register_partition(gone.partition_name().clone(), strict_properties())
        .unwrap();
    assert_eq!(back.version(), gone.version() + 1);
}

#[test]
fn member_partitions_follow_ring_cache() {
    let (node, users) = setup();
    let elsewhere = node
        .node()
        .register_partition(partition("other", "p"), strict_properties())
        .unwrap();
    let orders = node
        .node()
        .register_partition(partition("main", "orders"), strict_properties())
        .unwrap();

    // nothing cached yet
    assert!(node.node().member_partitions().is_empty());

    node.sync_ring(&ring("main"));
    let mut expected = vec![orders, users];
    expected.sort_by(|a, b| a.partition_name().cmp(b.partition_name()));
    assert_eq!(node.node().member_partitions(), expected);
    assert!(!node.node().member_partitions().contains(&elsewhere));

    node.rings.set(&ring("other"), 1, &["a"]);
    node.sync_ring(&ring("other"));
    assert_eq!(node.node().member_partitions().len(), 3);
}

#[test]
fn retire_during_scan_ends_the_scan() {
    let (node, v1) = setup();
    node.commit_keys(&v1, &["a", "b", "c"]);

    let mut scan = node.node().scan_from(&v1, 0).unwrap();
    assert_eq!(scan.next().unwrap().unwrap().tx_id, 1);

    node.node().advance_version(v1.partition_name()).unwrap();

    match scan.next() {
        Some(Err(WalError::Reopen { .. })) | Some(Err(WalError::Closed)) => {
            assert!(scan.next().is_none());
        }
        Some(Ok(row)) => panic!("scan read row {} after retirement", row.tx_id),
        other => panic!("unexpected scan result: {:?}", other),
    }
}
