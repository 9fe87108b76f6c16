// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

//! Oversized UDP answers truncate with TC=1; TCP carries the full reply.

use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType as WireType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use namechain::core::types::{DnsRecord, RecordType};
use namechain::dns::answer;

const MAX_UDP_REPLY: usize = 4096;

fn txt_record(n: usize) -> DnsRecord {
    DnsRecord {
        name: "bulk.example.com.".to_string(),
        rtype: RecordType::Txt,
        ttl: 300,
        rdata: format!("record {n}: {}", "x".repeat(90)),
        owner: "pk".to_string(),
        tx_hash: String::new(),
        timestamp: 0,
    }
}

fn request() -> Message {
    let mut message = Message::new();
    message.set_id(4242).set_recursion_desired(true);
    message.add_query(Query::query(
        Name::from_ascii("bulk.example.com.").unwrap(),
        WireType::TXT,
    ));
    message
}

#[test]
fn sixty_records_overflow_the_udp_budget() {
    let records: Vec<DnsRecord> = (0..60).map(txt_record).collect();
    let full = answer::authoritative_answer(&request(), &records);
    let wire = full.to_bytes().unwrap();
    assert_eq!(full.answers().len(), 60);
    assert!(wire.len() > MAX_UDP_REPLY, "answer must exceed the UDP budget ({})", wire.len());
}

#[test]
fn truncated_reply_signals_tcp_retry() {
    let req = request();
    let truncated = answer::truncated(&req);
    let wire = truncated.to_bytes().unwrap();
    assert!(wire.len() <= MAX_UDP_REPLY);

    let parsed = Message::from_bytes(&wire).unwrap();
    assert!(parsed.truncated(), "TC=1 tells the client to retry over TCP");
    assert_eq!(parsed.answers().len(), 0);
    assert_eq!(parsed.id(), 4242);
    assert_eq!(parsed.queries().len(), 1);
}

#[test]
fn full_answer_survives_a_tcp_sized_frame() {
    // TCP frames carry up to 64 KiB; the 60-record answer fits there.
    let records: Vec<DnsRecord> = (0..60).map(txt_record).collect();
    let wire = answer::authoritative_answer(&request(), &records).to_bytes().unwrap();
    assert!(wire.len() <= u16::MAX as usize);

    let parsed = Message::from_bytes(&wire).unwrap();
    assert!(!parsed.truncated());
    assert_eq!(parsed.answers().len(), 60);
}
