//! Concurrency tests for the highwater store
//!
//! These tests verify the store under concurrent load:
//! - Racing set_if_larger calls across shards keep the max
//! - Snapshots stay internally consistent while writers run
//! - Flushes interleaved with writes lose nothing
//! - A clear requested after all writes finish always wins

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use rand::Rng;
use tempfile::tempdir;
use tideline_core::{PartitionName, RingMember, RingName, VersionedPartitionName};
use tideline_storage::{HighwaterConfig, HighwaterStore};

// ============================================================================
// Helper Functions
// ============================================================================

fn vpn(name: &str) -> VersionedPartitionName {
    let ring = RingName::new("main").unwrap();
    VersionedPartitionName::new(PartitionName::new(ring, name.as_bytes().to_vec()), 1)
}

fn open(dir: &std::path::Path) -> Arc<HighwaterStore> {
    Arc::new(
        HighwaterStore::open(
            dir,
            RingMember::new("self"),
            HighwaterConfig::new().with_shard_count(8),
        )
        .unwrap(),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_concurrent_set_if_larger_keeps_max() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let partition = vpn("p");
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let partition = partition.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();
                for _ in 0..500 {
                    let member = RingMember::new(format!("m{}", rng.gen_range(0..4)));
                    let tx_id = rng.gen_range(0..1_000u64);
                    store
                        .set_if_larger(&member, &partition, tx_id, t, 1)
                        .unwrap();
                }
                // Every thread ends with the same known top value
                for m in 0..4 {
                    let member = RingMember::new(format!("m{}", m));
                    store.set_if_larger(&member, &partition, 5_000, t, 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for m in 0..4 {
        assert_eq!(
            store.get(&RingMember::new(format!("m{}", m)), &partition),
            Some(5_000)
        );
    }
}

#[test]
fn test_snapshots_consistent_under_writes() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let partition = vpn("p");
    let a = RingMember::new("a");
    let b = RingMember::new("b");
    let done = Arc::new(AtomicBool::new(false));

    // The writer always raises `a` before `b` to the same value, so any
    // consistent snapshot has a >= b.
    let writer = {
        let store = Arc::clone(&store);
        let partition = partition.clone();
        let (a, b) = (a.clone(), b.clone());
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for tx_id in 1..=2_000u64 {
                store.set_if_larger(&a, &partition, tx_id, 0, 1).unwrap();
                store.set_if_larger(&b, &partition, tx_id, 1, 1).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };

    while !done.load(Ordering::Acquire) {
        let snapshot = store.get_partition_highwater(&partition, false);
        if let (Some(ta), Some(tb)) = (snapshot.get(&a), snapshot.get(&b)) {
            assert!(ta >= tb, "snapshot saw b={} ahead of a={}", tb, ta);
        }
    }
    writer.join().unwrap();
}

#[test]
fn test_flush_interleaved_with_writes_loses_nothing() {
    let dir = tempdir().unwrap();
    let partitions: Vec<_> = (0..4).map(|i| vpn(&format!("p{}", i))).collect();
    {
        let store = open(dir.path());
        let barrier = Arc::new(Barrier::new(5));
        let mut handles = Vec::new();
        for (t, partition) in partitions.iter().cloned().enumerate() {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let member = RingMember::new("peer");
                for tx_id in 1..=300u64 {
                    store
                        .set_if_larger(&member, &partition, tx_id, t, 1)
                        .unwrap();
                }
            }));
        }
        let flusher = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..200 {
                    store.flush(round % 8, false, || Ok(())).unwrap();
                }
            })
        };
        for handle in handles {
            handle.join().unwrap();
        }
        flusher.join().unwrap();
        store.flush_all(false).unwrap();
    }

    let store = open(dir.path());
    for partition in &partitions {
        assert_eq!(store.get(&RingMember::new("peer"), partition), Some(300));
    }
}

#[test]
fn test_clear_after_writes_wins() {
    let dir = tempdir().unwrap();
    let partition = vpn("p");
    let member = RingMember::new("peer");
    {
        let store = open(dir.path());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                let partition = partition.clone();
                let member = member.clone();
                thread::spawn(move || {
                    for tx_id in 0..100u64 {
                        store
                            .set_if_larger(&member, &partition, tx_id * 4 + t as u64, t, 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        store.clear(&member, &partition).unwrap();
        store.flush_all(true).unwrap();
        assert_eq!(store.get(&member, &partition), None);
    }
    let store = open(dir.path());
    assert_eq!(store.get(&member, &partition), None);
}
