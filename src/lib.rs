// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Namechain - a decentralized DNS ledger node.
//!
//! Peers maintain an ordered, content-addressed ledger of signed DNS
//! operations and serve the derived zone over standard UDP/TCP DNS.
//! This crate provides:
//! - Deterministic transaction/block types with canonical JSON hashing
//! - Round-robin leader consensus with bounded-time failover
//! - A deterministic state machine deriving the live zone from the ledger
//! - Peer membership, leader-queue replication, and snapshot sync
//! - An authoritative DNS front end with upstream forwarding
//! - Monitoring via Prometheus metrics and structured logging

/// Core protocol primitives (crypto, types, consensus, state machine).
pub mod core;
/// Authoritative DNS front end (UDP/TCP listeners, answers, cache).
pub mod dns;
/// Observability (metrics registry and exposition endpoint).
pub mod monitoring;
/// Peer networking (envelope, transport, membership, sync).
pub mod net;
/// Node orchestration (wiring, routing, lifecycle).
pub mod node;
/// Durable stores (blocks, transactions, zone, peers).
pub mod storage;
