//! Highwater behavior as seen through a node.

use crate::common::*;
use tideline::{highwater_from_wire, highwater_to_wire, LOCAL_NONE};

fn setup() -> (TestNode, VersionedPartitionName) {
    let rings = StaticRings::new();
    rings.set(&ring("main"), 1, &["a", "b", "c"]);
    let node = TestNode::new("a", rings);
    let vpn = node
        .node()
        .register_partition(partition("main", "orders"), strict_properties())
        .unwrap();
    (node, vpn)
}

#[test]
fn set_three_then_two_keeps_three() {
    let (node, vpn) = setup();
    let highwaters = node.node().highwaters();
    let b = RingMember::new("b");

    assert!(highwaters.set_if_larger(&b, &vpn, 3, 0, 1).unwrap());
    assert!(!highwaters.set_if_larger(&b, &vpn, 2, 0, 1).unwrap());
    assert_eq!(highwaters.get(&b, &vpn), Some(3));
}

#[test]
fn local_is_absent_until_set() {
    let (node, vpn) = setup();
    let highwaters = node.node().highwaters();

    assert_eq!(highwaters.get_local(&vpn), None);
    assert_eq!(highwater_to_wire(highwaters.get_local(&vpn)), LOCAL_NONE);

    node.commit_keys(&vpn, &["x"]);
    assert_eq!(highwaters.get_local(&vpn), Some(1));
    assert_eq!(highwater_from_wire(highwater_to_wire(Some(1))), Some(1));
}

#[test]
fn clear_then_get_is_absent() {
    let (node, vpn) = setup();
    let highwaters = node.node().highwaters();
    let b = RingMember::new("b");
    let c = RingMember::new("c");
    highwaters.set_if_larger(&b, &vpn, 4, 0, 1).unwrap();
    highwaters.set_if_larger(&c, &vpn, 6, 1, 1).unwrap();

    highwaters.clear(&b, &vpn).unwrap();
    assert_eq!(highwaters.get(&b, &vpn), None);
    assert_eq!(highwaters.get(&c, &vpn), Some(6));

    // A fresh set after a clear tracks again
    assert!(highwaters.set_if_larger(&b, &vpn, 1, 0, 1).unwrap());
    assert_eq!(highwaters.get(&b, &vpn), Some(1));
}

#[test]
fn removing_partition_deletes_every_member() {
    let (node, vpn) = setup();
    let highwaters = node.node().highwaters();
    for (i, member) in ["b", "c"].iter().enumerate() {
        highwaters
            .set_if_larger(&RingMember::new(*member), &vpn, 10, i, 1)
            .unwrap();
    }
    node.commit_keys(&vpn, &["x"]);

    node.node().remove_partition(vpn.partition_name()).unwrap();

    assert!(highwaters.get_partition_highwater(&vpn, true).is_empty());
    assert_eq!(highwaters.get_local(&vpn), None);
    let err = highwaters
        .set_if_larger(&RingMember::new("b"), &vpn, 11, 0, 1)
        .unwrap_err();
    assert!(err.is_retired());
}

#[test]
fn snapshot_includes_local_frontier() {
    let (node, vpn) = setup();
    node.commit_keys(&vpn, &["x", "y"]);
    node.node()
        .highwaters()
        .set_if_larger(&RingMember::new("b"), &vpn, 1, 0, 1)
        .unwrap();

    let snapshot = node.node().highwaters().get_partition_highwater(&vpn, true);
    assert_eq!(snapshot.get(&RingMember::new("a")), Some(2));
    assert_eq!(snapshot.get(&RingMember::new("b")), Some(1));
    assert_eq!(snapshot.min_tx_id(), Some(1));

    let remote_only = node.node().highwaters().get_partition_highwater(&vpn, false);
    assert_eq!(remote_only.get(&RingMember::new("a")), None);
}

#[test]
fn highwaters_survive_restart() {
    let (mut node, vpn) = setup();
    node.commit_keys(&vpn, &["x", "y", "z"]);
    node.node()
        .highwaters()
        .set_if_larger(&RingMember::new("b"), &vpn, 2, 0, 1)
        .unwrap();
    node.node().flush(false).unwrap();

    node.reopen();

    let highwaters = node.node().highwaters();
    assert_eq!(highwaters.get_local(&vpn), Some(3));
    assert_eq!(highwaters.get(&RingMember::new("b"), &vpn), Some(2));
}
