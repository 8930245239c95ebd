//! Weighted fair queue service properties.

use std::collections::BTreeMap;

use meridian_core::{MessageId, ObjectId, ObjectMessage};
use meridian_flow::{BoundedQueue, FairQueue};

/// A message of `32 + payload` bytes.
fn message(id: u64, payload: usize) -> ObjectMessage {
    ObjectMessage::new(
        MessageId::new(id),
        ObjectId::new(1),
        0,
        ObjectId::new(2),
        0,
        vec![0u8; payload],
    )
}

fn backlogged(weights: &[(u32, f64)], per_queue: u64, payload: usize) -> FairQueue<u32, BoundedQueue<ObjectMessage>> {
    let mut fq = FairQueue::new();
    for (key, weight) in weights {
        fq.add_queue(*key, BoundedQueue::new(u32::MAX), *weight).unwrap();
    }
    let mut id = 0;
    for _ in 0..per_queue {
        for (key, _) in weights {
            id += 1;
            fq.push(key, message(id, payload)).unwrap();
        }
    }
    fq
}

#[test]
fn test_backlogged_queues_share_by_weight() {
    let mut fq = backlogged(&[(1, 1.0), (2, 2.0), (3, 3.0)], 1000, 68);
    let mut served: BTreeMap<u32, u64> = BTreeMap::new();
    for _ in 0..600 {
        let (key, _) = fq.pop().unwrap();
        *served.entry(key).or_insert(0) += 1;
    }
    for (key, expected) in [(1, 100), (2, 200), (3, 300)] {
        let got = served[&key];
        assert!(got.abs_diff(expected) <= 2, "queue {key}: {got} served, expected {expected}");
    }
}

#[test]
fn test_share_is_by_bytes_not_messages() {
    // Equal weights; queue 2 sends messages twice the size.
    let mut fq = FairQueue::new();
    fq.add_queue(1u32, BoundedQueue::new(u32::MAX), 1.0).unwrap();
    fq.add_queue(2u32, BoundedQueue::new(u32::MAX), 1.0).unwrap();
    for i in 0..500 {
        fq.push(&1, message(i, 68)).unwrap(); // 100 bytes
        fq.push(&2, message(1000 + i, 168)).unwrap(); // 200 bytes
    }
    let mut bytes: BTreeMap<u32, u64> = BTreeMap::new();
    for _ in 0..300 {
        let (key, msg) = fq.pop().unwrap();
        *bytes.entry(key).or_insert(0) += 32 + msg.payload.len() as u64;
    }
    let a = bytes[&1];
    let b = bytes[&2];
    assert!(a.abs_diff(b) <= 400, "bytes served: {a} vs {b}");
}

#[test]
fn test_work_conserving() {
    let mut fq = backlogged(&[(1, 1.0), (2, 100.0)], 3, 10);
    // Queue 2 empties first; queue 1 is then served back to back.
    let order: Vec<u32> = std::iter::from_fn(|| fq.pop().map(|(k, _)| k)).collect();
    assert_eq!(order.len(), 6);
    assert_eq!(&order[3..], &[1, 1, 1]);
    assert!(fq.is_empty());
}

#[test]
fn test_idle_queue_does_not_bank_credit() {
    let mut fq = FairQueue::new();
    fq.add_queue(1u32, BoundedQueue::new(u32::MAX), 1.0).unwrap();
    fq.add_queue(2u32, BoundedQueue::new(u32::MAX), 1.0).unwrap();
    for i in 0..100 {
        fq.push(&1, message(i, 68)).unwrap();
    }
    for _ in 0..50 {
        assert_eq!(fq.pop().unwrap().0, 1);
    }

    // Queue 2 was idle; it now competes from the current virtual time.
    for i in 0..50 {
        fq.push(&2, message(1000 + i, 68)).unwrap();
    }
    let next: Vec<u32> = (0..20).map(|_| fq.pop().unwrap().0).collect();
    let from_two = next.iter().filter(|k| **k == 2).count();
    assert!((9..=11).contains(&from_two), "queue 2 served {from_two} of 20");
}

#[test]
fn test_disabled_queue_skipped_until_enabled() {
    let mut fq = backlogged(&[(1, 1.0), (2, 1.0)], 5, 10);
    fq.disable_queue(&2);
    for _ in 0..5 {
        assert_eq!(fq.pop().unwrap().0, 1);
    }
    assert!(fq.is_empty());
    assert!(fq.has_pending());

    fq.enable_queue(&2);
    assert!(!fq.is_empty());
    for _ in 0..5 {
        assert_eq!(fq.pop().unwrap().0, 2);
    }
    assert!(fq.pop().is_none());
}

#[test]
fn test_weight_change_shifts_share() {
    let mut fq = backlogged(&[(1, 1.0), (2, 1.0)], 2000, 68);
    for _ in 0..200 {
        fq.pop().unwrap();
    }
    fq.set_queue_weight(&2, 4.0);
    let mut from_two = 0;
    for _ in 0..500 {
        if fq.pop().unwrap().0 == 2 {
            from_two += 1;
        }
    }
    // 4:1 after the change, give or take the messages already stamped.
    assert!((390..=410).contains(&from_two), "queue 2 served {from_two} of 500");
}

#[test]
fn test_average_weight_for_new_destinations() {
    let mut fq: FairQueue<u32, BoundedQueue<ObjectMessage>> = FairQueue::new();
    assert!((fq.avg_weight() - 1.0).abs() < f64::EPSILON);
    fq.add_queue(1, BoundedQueue::new(1000), 2.0).unwrap();
    fq.add_queue(2, BoundedQueue::new(1000), 4.0).unwrap();
    assert!((fq.avg_weight() - 3.0).abs() < 1e-9);
}
