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
#![deny(missing_docs)]

//! Circular leader queue.
//!
//! The directory is authoritative: membership changes arrive as a full
//! sorted list via `QUEUE_UPDATE` and every replica calls [`LeaderQueue::reset_with`].
//! The cursor advances in lockstep on every accepted block, so leader
//! identity for a slot is a pure function of the shared queue state.

use crate::core::types::{PeerConfig, QueueEntry};
use std::collections::BTreeMap;

/// Ordered circular ring of peers with a cursor naming the current leader.
#[derive(Debug, Default)]
pub struct LeaderQueue {
    entries: BTreeMap<u64, PeerConfig>,
    cursor: usize,
}

impl LeaderQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current leader, if the queue is non-empty.
    pub fn peek(&self) -> Option<&PeerConfig> {
        self.entries.values().nth(self.cursor)
    }

    /// Rotate the cursor by one position.
    pub fn advance(&mut self) {
        if !self.entries.is_empty() {
            self.cursor = (self.cursor + 1) % self.entries.len();
        }
    }

    /// Insert a peer at `sequence`.
    pub fn add_node(&mut self, peer: PeerConfig, sequence: u64) {
        self.entries.insert(sequence, peer);
        self.clamp_cursor();
    }

    /// Remove the entry at `sequence`. Returns whether it existed.
    pub fn remove(&mut self, sequence: u64) -> bool {
        let removed = self.entries.remove(&sequence).is_some();
        self.clamp_cursor();
        removed
    }

    /// Replace the whole ring from a directory broadcast.
    ///
    /// The cursor index is kept modulo the new length; since every replica
    /// applies the same list to the same lockstep cursor, views stay aligned.
    pub fn reset_with(&mut self, entries: Vec<QueueEntry>) {
        self.entries = entries.into_iter().map(|e| (e.sequence, e.peer)).collect();
        self.clamp_cursor();
    }

    /// Next free sequence number (`max(existing) + 1`).
    pub fn next_sequence(&self) -> u64 {
        self.entries.keys().next_back().map(|s| s + 1).unwrap_or(1)
    }

    /// Ring size.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no peers are queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ring as a sorted entry list (broadcast payloads, persistence).
    pub fn to_entries(&self) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .map(|(sequence, peer)| QueueEntry { sequence: *sequence, peer: peer.clone() })
            .collect()
    }

    /// True when `public_key` sits at the cursor or one step to either side.
    ///
    /// Block acceptance tolerates a one-step-advanced local view after a
    /// failover rotation.
    pub fn is_within_one_step(&self, public_key: &str) -> bool {
        let n = self.entries.len();
        if n == 0 {
            return false;
        }
        let peers: Vec<&PeerConfig> = self.entries.values().collect();
        let candidates = [
            self.cursor,
            (self.cursor + 1) % n,
            (self.cursor + n - 1) % n,
        ];
        candidates.iter().any(|&i| peers[i].public_key == public_key)
    }

    fn clamp_cursor(&mut self) {
        let n = self.entries.len();
        if n == 0 {
            self.cursor = 0;
        } else {
            self.cursor %= n;
        }
    }
}
