// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Boot-time catch-up: snapshot export, import, and pruned-chain rebuild.

use namechain::core::crypto::NodeKeypair;
use namechain::core::state_machine::StateMachine;
use namechain::core::types::{Block, DnsRecord, RecordType, Transaction, TxPayload, TxType};
use namechain::dns::cache::DnsCache;
use namechain::monitoring::metrics::Metrics;
use namechain::storage::{BlockStore, Stores};
use std::sync::Arc;

fn state_machine(stores: &Stores) -> StateMachine {
    StateMachine::new(
        stores.zone.clone(),
        Arc::new(DnsCache::new()),
        Arc::new(Metrics::new().unwrap()),
    )
}

fn seeded_stores(kp: &NodeKeypair, blocks: usize) -> (tempfile::TempDir, Stores) {
    let dir = tempfile::tempdir().unwrap();
    let stores = Stores::open(dir.path().to_str().unwrap()).unwrap();
    let sm = state_machine(&stores);

    let mut prev = Block::genesis(1000);
    stores.blocks.put(&prev).unwrap();
    sm.apply(&prev).unwrap();
    for i in 1..blocks {
        let tx = Transaction::create(
            kp,
            TxType::Register,
            TxPayload::Records(vec![DnsRecord {
                name: format!("host{i}.example.com."),
                rtype: RecordType::A,
                ttl: 300,
                rdata: format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256),
                owner: kp.public_key_b64(),
                tx_hash: String::new(),
                timestamp: 0,
            }]),
            1000 + i as u64,
        )
        .unwrap();
        let block = Block::seal(prev.hash.clone(), vec![tx], 1000 + 5 * i as u64);
        stores.blocks.put(&block).unwrap();
        sm.apply(&block).unwrap();
        prev = block;
    }
    (dir, stores)
}

#[test]
fn fifty_block_snapshot_round_trip() {
    let (kp, _) = NodeKeypair::generate().unwrap();
    let (source_dir, source) = seeded_stores(&kp, 50);

    let snap = source_dir.path().join("snapshot.bin");
    assert_eq!(source.blocks.snapshot_export(&snap).unwrap(), 50);

    // A fresh node replays the snapshot and rebuilds its zone.
    let dir = tempfile::tempdir().unwrap();
    let target = Stores::open(dir.path().to_str().unwrap()).unwrap();
    for block in BlockStore::extract_inserts(&snap).unwrap() {
        target.blocks.insert_raw(&block).unwrap();
    }
    state_machine(&target).rebuild(&target.blocks).unwrap();

    assert_eq!(target.blocks.count(), 50);
    assert!(target.blocks.is_chain_valid().unwrap());
    assert_eq!(target.blocks.latest_hash().unwrap(), source.blocks.latest_hash().unwrap());
    assert_eq!(target.zone.list_all().unwrap(), source.zone.list_all().unwrap());
}

#[test]
fn snapshot_import_is_idempotent() {
    let (kp, _) = NodeKeypair::generate().unwrap();
    let (dir, stores) = seeded_stores(&kp, 10);
    let snap = dir.path().join("snapshot.bin");
    stores.blocks.snapshot_export(&snap).unwrap();

    // Re-importing into the same store adds nothing.
    let mut fresh = 0;
    for block in BlockStore::extract_inserts(&snap).unwrap() {
        if stores.blocks.insert_raw(&block).unwrap() {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 0);
    assert_eq!(stores.blocks.count(), 10);
}

#[test]
fn pruned_chain_stays_valid_but_rebuild_degrades_gracefully() {
    let (kp, _) = NodeKeypair::generate().unwrap();
    let (_dir, stores) = seeded_stores(&kp, 12);
    let full_zone = stores.zone.list_all().unwrap();

    // Prune bodies on all but the last 5 blocks, keeping headers intact.
    let all = stores.blocks.scan_by_timestamp().unwrap();
    let cutoff = all.len() - 5;
    for block in all.iter().take(cutoff) {
        let mut pruned = block.clone();
        pruned.transactions.clear();
        stores.blocks.remove(&block.hash).unwrap();
        stores.blocks.put(&pruned).unwrap();
    }

    assert!(stores.blocks.is_chain_valid().unwrap(), "headers alone keep the chain valid");

    // Rebuild completes without error but can only replay surviving bodies.
    state_machine(&stores).rebuild(&stores.blocks).unwrap();
    let rebuilt = stores.zone.list_all().unwrap();
    assert_eq!(rebuilt.len(), 5);
    assert!(rebuilt.len() < full_zone.len(), "pruned history is unrecoverable without a zone snapshot");
}
