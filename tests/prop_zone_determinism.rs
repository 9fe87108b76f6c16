// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Two fresh state machines fed the same ordered block log must produce
//! byte-identical zone listings.

use namechain::core::crypto::NodeKeypair;
use namechain::core::state_machine::StateMachine;
use namechain::core::types::{Block, DnsRecord, RecordType, Transaction, TxPayload, TxType};
use namechain::dns::cache::DnsCache;
use namechain::monitoring::metrics::Metrics;
use namechain::storage::Stores;
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Register(u8, u8),
    Update(u8, u8),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 0u8..4).prop_map(|(n, v)| Op::Register(n, v)),
        (0u8..6, 0u8..4).prop_map(|(n, v)| Op::Update(n, v)),
        (0u8..6).prop_map(Op::Delete),
    ]
}

fn build_log(kp: &NodeKeypair, ops: &[Op]) -> Vec<Block> {
    let owner = kp.public_key_b64();
    let record = |n: u8, v: u8| DnsRecord {
        name: format!("host{n}.example.com."),
        rtype: RecordType::A,
        ttl: 300,
        rdata: format!("10.0.0.{v}"),
        owner: owner.clone(),
        tx_hash: String::new(),
        timestamp: 0,
    };

    let mut blocks = vec![Block::genesis(1000)];
    for (i, op) in ops.iter().enumerate() {
        let ts = 1000 + i as u64;
        let tx = match op {
            Op::Register(n, v) => {
                Transaction::create(kp, TxType::Register, TxPayload::Records(vec![record(*n, *v)]), ts)
            }
            Op::Update(n, v) => Transaction::create(
                kp,
                TxType::UpdateRecords,
                TxPayload::Records(vec![record(*n, *v)]),
                ts,
            ),
            Op::Delete(n) => {
                // Delete requires the committed rdata; any guess that misses
                // is a historical no-op, which is itself deterministic.
                Transaction::create(
                    kp,
                    TxType::DeleteRecords,
                    TxPayload::Records(vec![record(*n, 0)]),
                    ts,
                )
            }
        }
        .unwrap();
        let prev = blocks.last().unwrap().hash.clone();
        blocks.push(Block::seal(prev, vec![tx], 1000 + 5 * (i as u64 + 1)));
    }
    blocks
}

fn replay(blocks: &[Block]) -> Vec<(String, RecordType, String, u32)> {
    let dir = tempfile::tempdir().unwrap();
    let stores = Stores::open(dir.path().to_str().unwrap()).unwrap();
    let sm = StateMachine::new(
        stores.zone.clone(),
        Arc::new(DnsCache::new()),
        Arc::new(Metrics::new().unwrap()),
    );
    for block in blocks {
        stores.blocks.put(block).unwrap();
        sm.apply(block).unwrap();
    }
    stores
        .zone
        .list_all()
        .unwrap()
        .into_iter()
        .map(|r| (r.name_norm(), r.rtype, r.rdata, r.ttl))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn identical_logs_yield_identical_zones(ops in proptest::collection::vec(op_strategy(), 1..24)) {
        let (kp, _) = NodeKeypair::generate().unwrap();
        let blocks = build_log(&kp, &ops);
        prop_assert_eq!(replay(&blocks), replay(&blocks));
    }

    #[test]
    fn rebuild_equals_incremental(ops in proptest::collection::vec(op_strategy(), 1..16)) {
        let (kp, _) = NodeKeypair::generate().unwrap();
        let blocks = build_log(&kp, &ops);

        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path().to_str().unwrap()).unwrap();
        let sm = StateMachine::new(
            stores.zone.clone(),
            Arc::new(DnsCache::new()),
            Arc::new(Metrics::new().unwrap()),
        );
        for block in &blocks {
            stores.blocks.put(block).unwrap();
            sm.apply(block).unwrap();
        }
        let incremental = stores.zone.list_all().unwrap();
        sm.rebuild(&stores.blocks).unwrap();
        prop_assert_eq!(stores.zone.list_all().unwrap(), incremental);
    }
}

#[test]
fn at_most_one_row_per_name_and_type() {
    let (kp, _) = NodeKeypair::generate().unwrap();
    let ops = vec![Op::Register(1, 1), Op::Register(1, 2), Op::Update(1, 3), Op::Register(1, 2)];
    let zone = replay(&build_log(&kp, &ops));
    assert_eq!(zone.len(), 1);
    assert_eq!(zone[0].2, "10.0.0.3");
}
