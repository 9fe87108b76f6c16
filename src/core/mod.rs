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

//! Core protocol primitives.

/// Slot loop, block sealing, and block acceptance.
pub mod consensus;
/// SHA-256 and ECDSA P-256 primitives.
pub mod crypto;
/// Nomination/vote governance gate for membership changes.
pub mod election;
/// File-backed node keypair with at-rest encryption.
pub mod keystore;
/// Pending transaction pool.
pub mod mempool;
/// Merkle commitment over transaction hashes.
pub mod merkle;
/// Circular leader queue.
pub mod queue;
/// Deterministic application of blocks onto the zone.
pub mod state_machine;
/// Deterministic core types and canonical encoding helpers.
pub mod types;
