// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Rotation fairness and failover behavior of the shared leader queue.

use namechain::core::queue::LeaderQueue;
use namechain::core::types::{PeerConfig, PeerRole, QueueEntry};
use std::collections::BTreeMap;

fn peer(n: u8) -> PeerConfig {
    PeerConfig {
        ip: format!("10.0.0.{n}"),
        role: PeerRole::NormalNode,
        public_key: format!("pk-{n}"),
    }
}

fn ring(n: u8) -> LeaderQueue {
    let mut queue = LeaderQueue::new();
    for i in 1..=n {
        queue.add_node(peer(i), i as u64);
    }
    queue
}

#[test]
fn fairness_over_failure_free_slots() {
    // Over N slots with k peers, each leads floor(N/k) or ceil(N/k) times.
    for (peers, slots) in [(3u8, 100usize), (4, 25), (5, 17)] {
        let mut queue = ring(peers);
        let mut produced: BTreeMap<String, usize> = BTreeMap::new();
        for _ in 0..slots {
            *produced.entry(queue.peek().unwrap().public_key.clone()).or_default() += 1;
            queue.advance();
        }
        let floor = slots / peers as usize;
        let ceil = slots.div_ceil(peers as usize);
        for (leader, count) in produced {
            assert!(
                count == floor || count == ceil,
                "{leader} produced {count}, expected {floor} or {ceil}"
            );
        }
    }
}

#[test]
fn failover_rotation_lands_on_the_next_peer() {
    // Queue order A, B, C with A at the head. A dies; every survivor
    // advances once and observes B as leader, then C after B's block.
    let mut on_b = ring(3);
    let mut on_c = ring(3);

    for queue in [&mut on_b, &mut on_c] {
        assert_eq!(queue.peek().unwrap().public_key, "pk-1");
        queue.advance(); // local failover after T silent seconds
        assert_eq!(queue.peek().unwrap().public_key, "pk-2");
    }

    // B seals the next block; both survivors advance in lockstep.
    on_b.advance();
    on_c.advance();
    assert_eq!(on_b.peek().unwrap().public_key, "pk-3");
    assert_eq!(on_c.peek().unwrap().public_key, "pk-3");
}

#[test]
fn survivors_accept_the_failover_leader_within_one_step() {
    // An observer that has not yet rotated must still accept a block from
    // the peer one step past its view, and vice versa.
    let mut rotated = ring(3);
    rotated.advance();
    let lagging = ring(3);

    assert!(lagging.is_within_one_step("pk-2"), "lagging view accepts the failover leader");
    assert!(rotated.is_within_one_step("pk-1"), "rotated view accepts the silent leader's late block");
}

#[test]
fn directory_reset_realigns_every_replica() {
    let mut drifted = ring(3);
    drifted.advance();
    drifted.advance();
    let mut fresh = LeaderQueue::new();

    let entries: Vec<QueueEntry> =
        (1..=4u8).map(|i| QueueEntry { sequence: i as u64, peer: peer(i) }).collect();
    drifted.reset_with(entries.clone());
    fresh.reset_with(entries);

    assert_eq!(drifted.len(), 4);
    assert_eq!(fresh.len(), 4);
    assert_eq!(drifted.next_sequence(), 5);
    // Replicas converge as soon as their cursors next align on an accepted
    // block; the membership view itself is already identical.
    assert_eq!(
        drifted.to_entries(),
        fresh.to_entries(),
        "replicas share the directory's ordering"
    );
}

#[test]
fn empty_queue_stays_idle() {
    let mut queue = LeaderQueue::new();
    assert!(queue.peek().is_none());
    queue.advance();
    assert!(queue.peek().is_none());
    assert!(!queue.is_within_one_step("pk-1"));
}
