//! The take exchange between two nodes of one ring.

use crate::common::*;
use tideline::{TakeBatch, TakeError, WalEntry};

struct Pair {
    a: TestNode,
    b: TestNode,
    vpn: VersionedPartitionName,
}

fn pair() -> Pair {
    let rings = StaticRings::new();
    rings.set(&ring("main"), 1, &["a", "b"]);
    let a = TestNode::new("a", rings.clone());
    let b = TestNode::new("b", rings);
    a.sync_ring(&ring("main"));
    b.sync_ring(&ring("main"));

    let vpn = a
        .node()
        .register_partition(partition("main", "events"), strict_properties())
        .unwrap();
    let on_b = b
        .node()
        .register_partition(partition("main", "events"), strict_properties())
        .unwrap();
    assert_eq!(vpn, on_b);
    Pair { a, b, vpn }
}

/// Re-commit a batch on the taking node, one commit per source transaction.
fn apply(node: &TestNode, vpn: &VersionedPartitionName, batch: &TakeBatch) {
    let mut group: Vec<WalRowDraft> = Vec::new();
    let mut current = None;
    for WalEntry { row, value } in &batch.rows {
        if current.is_some() && current != Some(row.tx_id) {
            node.node().commit(vpn, &group).unwrap();
            group.clear();
        }
        current = Some(row.tx_id);
        group.push(WalRowDraft {
            prefix: row.prefix.clone(),
            key: row.key.clone(),
            value: value.clone(),
            timestamp: row.timestamp,
            tombstoned: row.tombstoned,
            version: row.version,
        });
    }
    if !group.is_empty() {
        node.node().commit(vpn, &group).unwrap();
    }
}

#[test]
fn catch_up_then_ack_raises_highwater() {
    let Pair { a, b, vpn } = pair();
    a.commit_keys(&vpn, &["k1", "k2", "k3", "k4", "k5"]);
    let member_b = b.node().local_member().clone();

    let batch = a.node().take().take(&member_b, &vpn, None).unwrap();
    assert_eq!(batch.rows.len(), 5);
    assert_eq!(batch.last_tx_id, Some(5));
    assert!(!batch.more_available);
    assert_eq!(batch.highwater.get(a.node().local_member()), Some(5));
    assert_eq!(batch.rows[0].value, Some(b"v".to_vec()));

    apply(&b, &vpn, &batch);
    assert_eq!(b.node().highwaters().get_local(&vpn), Some(5));

    assert!(a.node().take().ack(&member_b, &vpn, 5).unwrap());
    assert!(!a.node().take().ack(&member_b, &vpn, 3).unwrap());
    assert_eq!(a.node().highwaters().get(&member_b, &vpn), Some(5));

    let empty = a.node().take().take(&member_b, &vpn, Some(5)).unwrap();
    assert!(empty.rows.is_empty());
    assert_eq!(empty.last_tx_id, None);
    assert!(!empty.more_available);

    let snapshot = a.node().take().partition_highwater(&vpn).unwrap();
    assert_eq!(snapshot.get(&member_b), Some(5));
}

#[test]
fn batches_do_not_split_transactions() {
    let Pair { a, b, vpn } = pair();
    for tx in 0..40 {
        let rows: Vec<WalRowDraft> = (0..3)
            .map(|i| put(&format!("k{}-{}", tx, i), "v"))
            .collect();
        a.node().commit(&vpn, &rows).unwrap();
    }
    let member_b = b.node().local_member().clone();

    let first = a.node().take().take(&member_b, &vpn, None).unwrap();
    assert_eq!(first.rows.len(), 102);
    assert_eq!(first.last_tx_id, Some(34));
    assert!(first.more_available);

    let second = a
        .node()
        .take()
        .take(&member_b, &vpn, first.last_tx_id)
        .unwrap();
    assert_eq!(second.rows.len(), 18);
    assert_eq!(second.rows[0].row.tx_id, 35);
    assert_eq!(second.last_tx_id, Some(40));
    assert!(!second.more_available);
}

#[test]
fn requester_outside_ring_is_rejected() {
    let Pair { a, vpn, .. } = pair();
    let err = a
        .node()
        .take()
        .take(&RingMember::new("stranger"), &vpn, None)
        .unwrap_err();
    assert!(matches!(err, TakeError::NotAMember { .. }));
    assert!(!err.is_retryable());
}

#[test]
fn stale_version_is_rejected() {
    let Pair { a, b, vpn } = pair();
    a.commit_keys(&vpn, &["k1"]);
    let v2 = a.node().advance_version(vpn.partition_name()).unwrap();
    let member_b = b.node().local_member().clone();

    let err = a.node().take().take(&member_b, &vpn, None).unwrap_err();
    assert!(err.is_stale());
    let err = a.node().take().ack(&member_b, &vpn, 1).unwrap_err();
    assert!(err.is_stale());
    let core: tideline::Error = err.into();
    assert!(core.is_stale());

    let batch = a.node().take().take(&member_b, &v2, None).unwrap();
    assert!(batch.rows.is_empty());
}

#[test]
fn unknown_ring_is_retryable() {
    let Pair { a, b, .. } = pair();
    let vpn = a
        .node()
        .register_partition(partition("elsewhere", "p"), strict_properties())
        .unwrap();
    let err = a
        .node()
        .take()
        .take(b.node().local_member(), &vpn, None)
        .unwrap_err();
    assert!(matches!(err, TakeError::UnknownRing(_)));
    assert!(err.is_retryable());
}

#[test]
fn sources_start_at_root_and_skip_self() {
    let rings = StaticRings::new();
    rings.set(&ring("main"), 1, &["a", "b", "c", "d"]);
    let c = TestNode::new("c", rings);
    c.sync_ring(&ring("main"));

    let wide = c
        .node()
        .register_partition(
            partition("main", "wide"),
            strict_properties().with_take_from_factor(2),
        )
        .unwrap();
    let sources: Vec<String> = c
        .node()
        .take()
        .take_sources(&wide)
        .unwrap()
        .into_iter()
        .map(|entry| entry.member.as_str().to_string())
        .collect();
    assert_eq!(sources, vec!["a", "b"]);

    let all = c
        .node()
        .register_partition(
            partition("main", "all"),
            strict_properties().with_take_from_factor(10),
        )
        .unwrap();
    let sources: Vec<String> = c
        .node()
        .take()
        .take_sources(&all)
        .unwrap()
        .into_iter()
        .map(|entry| entry.member.as_str().to_string())
        .collect();
    assert_eq!(sources, vec!["a", "b", "d"]);
}
