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

//! Nomination/vote gate for membership changes.
//!
//! Quorum rule: unanimous approval among the peers known to the initiating
//! directory when the nomination was created. A nomination accepts votes
//! only inside its `[start, end]` window, at most one per voter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// What a nomination proposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NominationKind {
    /// Admit a new peer.
    #[serde(rename = "JOIN")]
    Join,
    /// Promote an existing peer's role.
    #[serde(rename = "PROMOTION")]
    Promotion,
}

/// A pending membership question.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Nomination {
    /// Stable identifier (candidate key + start time works).
    pub id: String,
    /// Candidate public key, base64 SPKI.
    pub candidate: String,
    /// What is being decided.
    pub kind: NominationKind,
    /// Window start, unix seconds.
    pub start: u64,
    /// Window end, unix seconds.
    pub end: u64,
    /// Address of the initiating directory.
    pub initiator_ip: String,
    /// Voter count required for a decision (peer count at creation).
    pub electorate: usize,
    /// Collected votes by voter public key.
    #[serde(default)]
    pub votes: BTreeMap<String, bool>,
}

/// Election errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElectionError {
    /// No nomination with that id.
    #[error("unknown nomination")]
    Unknown,
    /// A nomination with that id already exists.
    #[error("duplicate nomination")]
    Duplicate,
    /// Vote arrived outside the nomination window.
    #[error("outside voting window")]
    OutsideWindow,
    /// Voter already cast a counted vote.
    #[error("already voted")]
    AlreadyVoted,
}

/// Outcome of a closed or decided nomination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Every elector approved.
    Accepted,
    /// At least one rejection, or the window closed short of quorum.
    Rejected,
    /// Still collecting votes.
    Pending,
}

/// In-memory election state, held by the directory.
#[derive(Default)]
pub struct Election {
    nominations: Mutex<BTreeMap<String, Nomination>>,
}

impl Election {
    /// Create an empty election registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a nomination.
    pub fn create(&self, nomination: Nomination) -> Result<(), ElectionError> {
        let mut guard = self.nominations.lock().unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(&nomination.id) {
            return Err(ElectionError::Duplicate);
        }
        guard.insert(nomination.id.clone(), nomination);
        Ok(())
    }

    /// Count a vote. At most one per `(nomination, voter)`.
    pub fn cast_vote(
        &self,
        nomination_id: &str,
        voter: &str,
        approve: bool,
        now: u64,
    ) -> Result<(), ElectionError> {
        let mut guard = self.nominations.lock().unwrap_or_else(|e| e.into_inner());
        let nomination = guard.get_mut(nomination_id).ok_or(ElectionError::Unknown)?;
        if now < nomination.start || now > nomination.end {
            return Err(ElectionError::OutsideWindow);
        }
        if nomination.votes.contains_key(voter) {
            return Err(ElectionError::AlreadyVoted);
        }
        nomination.votes.insert(voter.to_string(), approve);
        Ok(())
    }

    /// Current verdict for a nomination.
    pub fn verdict(&self, nomination_id: &str, now: u64) -> Result<Verdict, ElectionError> {
        let guard = self.nominations.lock().unwrap_or_else(|e| e.into_inner());
        let nomination = guard.get(nomination_id).ok_or(ElectionError::Unknown)?;
        if nomination.votes.values().any(|approve| !approve) {
            return Ok(Verdict::Rejected);
        }
        if nomination.votes.len() >= nomination.electorate {
            return Ok(Verdict::Accepted);
        }
        if now > nomination.end {
            return Ok(Verdict::Rejected);
        }
        Ok(Verdict::Pending)
    }

    /// Drop a settled nomination.
    pub fn close(&self, nomination_id: &str) {
        let mut guard = self.nominations.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(nomination_id);
    }

    /// Verdict of the most recent nomination naming `candidate`, if any.
    pub fn verdict_for_candidate(&self, candidate: &str, now: u64) -> Option<Verdict> {
        let guard = self.nominations.lock().unwrap_or_else(|e| e.into_inner());
        let nomination = guard.values().filter(|n| n.candidate == candidate).max_by_key(|n| n.start)?;
        if nomination.votes.values().any(|approve| !approve) {
            return Some(Verdict::Rejected);
        }
        if nomination.votes.len() >= nomination.electorate {
            return Some(Verdict::Accepted);
        }
        if now > nomination.end {
            return Some(Verdict::Rejected);
        }
        Some(Verdict::Pending)
    }
}
