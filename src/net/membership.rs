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

//! Peer membership: join/leave/promote flows mediated by the directory.
//!
//! The directory mutates its peer store, assigns the next queue sequence,
//! and broadcasts `ADD`/`DELETE`/`PROMOTE` followed by a `QUEUE_UPDATE`
//! carrying the full sorted list. Replicas apply the broadcasts verbatim.
//! Joins are gated by an open nomination when one names the candidate.

use crate::core::election::{Election, Nomination, Verdict};
use crate::core::queue::LeaderQueue;
use crate::core::types::{canonical_json, unix_now, Ballot, PeerConfig, PeerRole, QueueEntry};
use crate::monitoring::metrics::Metrics;
use crate::net::envelope::{Envelope, MessageType};
use crate::net::transport::{RoleFilter, Transport};
use crate::storage::peer_store::config_keys;
use crate::storage::{PeerStore, StorageError};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

/// Membership errors.
#[derive(Debug, Error)]
pub enum MembershipError {
    /// A directory-only message reached a non-directory peer.
    #[error("not the directory")]
    NotDirectory,
    /// Payload failed to decode.
    #[error("malformed payload")]
    Malformed,
    /// The candidate's nomination is open or was rejected.
    #[error("membership change gated by election")]
    Gated,
    /// Peer row could not be applied (ip/key collision).
    #[error("peer conflict")]
    Conflict,
    /// Storage failure.
    #[error("storage")]
    Storage(#[from] StorageError),
}

/// Join/leave/promote protocol driver.
pub struct Membership {
    self_ip: String,
    self_key: String,
    is_directory: bool,
    peers: PeerStore,
    queue: Arc<RwLock<LeaderQueue>>,
    transport: Arc<Transport>,
    election: Arc<Election>,
    metrics: Arc<Metrics>,
}

impl Membership {
    /// Wire up membership handling.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_ip: String,
        self_key: String,
        is_directory: bool,
        peers: PeerStore,
        queue: Arc<RwLock<LeaderQueue>>,
        transport: Arc<Transport>,
        election: Arc<Election>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { self_ip, self_key, is_directory, peers, queue, transport, election, metrics }
    }

    /// Ask the directory to admit this node.
    pub async fn announce_join(&self, bootstrap_ip: &str, role: PeerRole) -> bool {
        let me = PeerConfig {
            ip: self.self_ip.clone(),
            role,
            public_key: self.self_key.clone(),
        };
        let Ok(env) =
            Envelope::new(MessageType::AddNode, &self.self_ip, Some(self.self_key.clone()), &me)
        else {
            return false;
        };
        self.transport.send_direct(bootstrap_ip, &env).await
    }

    /// Ask the directory to remove this node.
    pub async fn announce_leave(&self, bootstrap_ip: &str) -> bool {
        let me = self.peers.get_peer(&self.self_key).ok().flatten().unwrap_or(PeerConfig {
            ip: self.self_ip.clone(),
            role: PeerRole::None,
            public_key: self.self_key.clone(),
        });
        let Ok(env) =
            Envelope::new(MessageType::DeleteNode, &self.self_ip, Some(self.self_key.clone()), &me)
        else {
            return false;
        };
        self.transport.send_direct(bootstrap_ip, &env).await
    }

    /// Ask the directory for its peer list.
    pub async fn fetch_nodes(&self, bootstrap_ip: &str) -> bool {
        let Ok(env) =
            Envelope::new(MessageType::FetchNodes, &self.self_ip, Some(self.self_key.clone()), &())
        else {
            return false;
        };
        self.transport.send_direct(bootstrap_ip, &env).await
    }

    /// Route one membership or governance envelope.
    pub async fn handle(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        match envelope.msg_type {
            MessageType::AddNode => self.on_add_node(envelope).await,
            MessageType::DeleteNode => self.on_delete_node(envelope).await,
            MessageType::PromoteNode => self.on_promote_node(envelope).await,
            MessageType::FetchNodes => self.on_fetch_nodes(envelope).await,
            MessageType::Add | MessageType::Promote => self.on_peer_announced(envelope),
            MessageType::Delete => self.on_peer_departed(envelope),
            MessageType::QueueUpdate => self.on_queue_update(envelope),
            MessageType::FetchNodesResponse => self.on_fetch_nodes_response(envelope),
            MessageType::CreateElection => self.on_create_election(envelope),
            MessageType::CastVote => self.on_cast_vote(envelope),
            _ => Ok(()),
        }
    }

    // --- directory side -------------------------------------------------------

    async fn on_add_node(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        if !self.is_directory {
            return Err(MembershipError::NotDirectory);
        }
        let candidate: PeerConfig = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;

        match self.election.verdict_for_candidate(&candidate.public_key, unix_now()) {
            Some(Verdict::Accepted) | None => {}
            Some(_) => {
                warn!(candidate = %candidate.public_key, "join gated by open or failed nomination");
                return Err(MembershipError::Gated);
            }
        }

        if !self.peers.upsert_peer(&candidate)? {
            return Err(MembershipError::Conflict);
        }
        let entries = {
            let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
            let sequence = queue.next_sequence();
            queue.add_node(candidate.clone(), sequence);
            queue.to_entries()
        };
        info!(peer = %candidate.public_key, ip = %candidate.ip, "peer admitted");
        self.after_membership_change(MessageType::Add, &candidate, entries).await
    }

    async fn on_delete_node(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        if !self.is_directory {
            return Err(MembershipError::NotDirectory);
        }
        let leaving: PeerConfig = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;

        self.peers.remove_peer(&leaving.public_key)?;
        let entries = {
            let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
            let sequences: Vec<u64> = queue
                .to_entries()
                .iter()
                .filter(|e| e.peer.public_key == leaving.public_key)
                .map(|e| e.sequence)
                .collect();
            for sequence in sequences {
                queue.remove(sequence);
            }
            queue.to_entries()
        };
        info!(peer = %leaving.public_key, "peer departed");
        self.after_membership_change(MessageType::Delete, &leaving, entries).await
    }

    async fn on_promote_node(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        if !self.is_directory {
            return Err(MembershipError::NotDirectory);
        }
        let promoted: PeerConfig = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;

        match self.election.verdict_for_candidate(&promoted.public_key, unix_now()) {
            Some(Verdict::Accepted) | None => {}
            Some(_) => return Err(MembershipError::Gated),
        }

        if !self.peers.upsert_peer(&promoted)? {
            return Err(MembershipError::Conflict);
        }
        let entries = {
            let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
            let updated: Vec<QueueEntry> = queue
                .to_entries()
                .into_iter()
                .map(|mut e| {
                    if e.peer.public_key == promoted.public_key {
                        e.peer.role = promoted.role;
                    }
                    e
                })
                .collect();
            queue.reset_with(updated);
            queue.to_entries()
        };
        info!(peer = %promoted.public_key, role = ?promoted.role, "peer promoted");
        self.after_membership_change(MessageType::Promote, &promoted, entries).await
    }

    async fn on_fetch_nodes(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        if !self.is_directory {
            return Err(MembershipError::NotDirectory);
        }
        let peers = self.peers.all_peers()?;
        let Ok(reply) = Envelope::new(
            MessageType::FetchNodesResponse,
            &self.self_ip,
            Some(self.self_key.clone()),
            &peers,
        ) else {
            return Err(MembershipError::Malformed);
        };
        self.transport.send_direct(&envelope.sender_ip, &reply).await;
        Ok(())
    }

    async fn after_membership_change(
        &self,
        announce: MessageType,
        subject: &PeerConfig,
        entries: Vec<QueueEntry>,
    ) -> Result<(), MembershipError> {
        self.persist_queue(&entries)?;
        self.metrics.peers.set(self.peers.count() as i64);

        let peers = self.peers.all_peers()?;
        if let Ok(env) =
            Envelope::new(announce, &self.self_ip, Some(self.self_key.clone()), subject)
        {
            self.transport.broadcast(&env, &peers, &RoleFilter::Any).await;
        }
        if let Ok(env) = Envelope::new(
            MessageType::QueueUpdate,
            &self.self_ip,
            Some(self.self_key.clone()),
            &entries,
        ) {
            self.transport.broadcast(&env, &peers, &RoleFilter::Any).await;
        }
        Ok(())
    }

    // --- replica side ---------------------------------------------------------

    fn on_peer_announced(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        let peer: PeerConfig = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;
        self.peers.upsert_peer(&peer)?;
        self.metrics.peers.set(self.peers.count() as i64);
        Ok(())
    }

    fn on_peer_departed(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        let peer: PeerConfig = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;
        self.peers.remove_peer(&peer.public_key)?;
        self.metrics.peers.set(self.peers.count() as i64);
        Ok(())
    }

    fn on_queue_update(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        let entries: Vec<QueueEntry> = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;
        {
            let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
            queue.reset_with(entries.clone());
        }
        self.persist_queue(&entries)?;
        info!(size = entries.len(), "leader queue reset from directory");
        Ok(())
    }

    fn on_fetch_nodes_response(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        let peers: Vec<PeerConfig> = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;
        for peer in &peers {
            self.peers.upsert_peer(peer)?;
        }
        self.metrics.peers.set(self.peers.count() as i64);
        info!(count = peers.len(), "peer list imported from directory");
        Ok(())
    }

    // --- governance -----------------------------------------------------------

    fn on_create_election(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        let nomination: Nomination = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;
        if self.election.create(nomination.clone()).is_err() {
            warn!(id = %nomination.id, "duplicate nomination ignored");
        }
        Ok(())
    }

    fn on_cast_vote(&self, envelope: &Envelope) -> Result<(), MembershipError> {
        let ballot: Ballot = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            MembershipError::Malformed
        })?;
        if let Err(e) =
            self.election.cast_vote(&ballot.nomination_id, &ballot.voter, ballot.approve, unix_now())
        {
            warn!(id = %ballot.nomination_id, voter = %ballot.voter, err = %e, "vote not counted");
        }
        Ok(())
    }

    fn persist_queue(&self, entries: &[QueueEntry]) -> Result<(), MembershipError> {
        let snapshot = canonical_json(&entries).map_err(|_| MembershipError::Malformed)?;
        self.peers.set_cfg(config_keys::LEADER_QUEUE, &snapshot)?;
        Ok(())
    }

    /// Restore the last-known queue snapshot from the config KV.
    pub fn restore_queue(&self) -> Result<usize, MembershipError> {
        let Some(snapshot) = self.peers.get_cfg(config_keys::LEADER_QUEUE)? else {
            return Ok(0);
        };
        let entries: Vec<QueueEntry> =
            serde_json::from_str(&snapshot).map_err(|_| MembershipError::Malformed)?;
        let len = entries.len();
        let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
        queue.reset_with(entries);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Stores;
    use tokio::sync::Semaphore;

    struct Fixture {
        _dir: tempfile::TempDir,
        stores: Stores,
        queue: Arc<RwLock<LeaderQueue>>,
        election: Arc<Election>,
        membership: Membership,
    }

    fn fixture(is_directory: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path().to_str().unwrap()).unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let queue = Arc::new(RwLock::new(LeaderQueue::new()));
        let election = Arc::new(Election::new());
        let transport = Arc::new(Transport::new(
            0,
            dir.path().to_str().unwrap(),
            Arc::new(Semaphore::new(4)),
            Arc::clone(&metrics),
        ));
        let membership = Membership::new(
            "10.0.0.1".to_string(),
            "pk-dir".to_string(),
            is_directory,
            stores.peers.clone(),
            Arc::clone(&queue),
            transport,
            Arc::clone(&election),
            metrics,
        );
        Fixture { _dir: dir, stores, queue, election, membership }
    }

    fn join_envelope(n: u8) -> Envelope {
        let peer = PeerConfig {
            ip: format!("10.0.0.{n}"),
            role: PeerRole::NormalNode,
            public_key: format!("pk-{n}"),
        };
        Envelope::new(MessageType::AddNode, &peer.ip.clone(), Some(peer.public_key.clone()), &peer)
            .unwrap()
    }

    #[tokio::test]
    async fn directory_admits_and_sequences_joins() {
        let f = fixture(true);
        f.membership.handle(&join_envelope(2)).await.unwrap();
        f.membership.handle(&join_envelope(3)).await.unwrap();

        assert_eq!(f.stores.peers.count(), 2);
        let queue = f.queue.read().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek().unwrap().public_key, "pk-2");
        assert_eq!(queue.next_sequence(), 3);
    }

    #[tokio::test]
    async fn non_directory_refuses_join_requests() {
        let f = fixture(false);
        assert!(matches!(
            f.membership.handle(&join_envelope(2)).await,
            Err(MembershipError::NotDirectory)
        ));
    }

    #[tokio::test]
    async fn leave_removes_peer_and_queue_slot() {
        let f = fixture(true);
        f.membership.handle(&join_envelope(2)).await.unwrap();
        f.membership.handle(&join_envelope(3)).await.unwrap();

        let leaving = PeerConfig {
            ip: "10.0.0.2".to_string(),
            role: PeerRole::NormalNode,
            public_key: "pk-2".to_string(),
        };
        let env =
            Envelope::new(MessageType::DeleteNode, "10.0.0.2", Some("pk-2".into()), &leaving).unwrap();
        f.membership.handle(&env).await.unwrap();

        assert_eq!(f.stores.peers.count(), 1);
        assert_eq!(f.queue.read().unwrap().len(), 1);
        assert_eq!(f.queue.read().unwrap().peek().unwrap().public_key, "pk-3");
    }

    #[tokio::test]
    async fn queue_update_resets_replica_and_persists() {
        let f = fixture(false);
        let entries = vec![
            QueueEntry {
                sequence: 1,
                peer: PeerConfig {
                    ip: "10.0.0.2".into(),
                    role: PeerRole::NormalNode,
                    public_key: "pk-2".into(),
                },
            },
            QueueEntry {
                sequence: 2,
                peer: PeerConfig {
                    ip: "10.0.0.3".into(),
                    role: PeerRole::NormalNode,
                    public_key: "pk-3".into(),
                },
            },
        ];
        let env = Envelope::new(MessageType::QueueUpdate, "10.0.0.1", None, &entries).unwrap();
        f.membership.handle(&env).await.unwrap();
        assert_eq!(f.queue.read().unwrap().len(), 2);

        // A fresh queue restores from the persisted snapshot.
        f.queue.write().unwrap().reset_with(Vec::new());
        assert_eq!(f.membership.restore_queue().unwrap(), 2);
        assert_eq!(f.queue.read().unwrap().peek().unwrap().public_key, "pk-2");
    }

    #[tokio::test]
    async fn join_gated_by_pending_nomination() {
        let f = fixture(true);
        f.election
            .create(Nomination {
                id: "pk-2@now".into(),
                candidate: "pk-2".into(),
                kind: crate::core::election::NominationKind::Join,
                start: unix_now() - 10,
                end: unix_now() + 100,
                initiator_ip: "10.0.0.1".into(),
                electorate: 1,
                votes: Default::default(),
            })
            .unwrap();

        assert!(matches!(
            f.membership.handle(&join_envelope(2)).await,
            Err(MembershipError::Gated)
        ));

        // A unanimous vote unblocks the join.
        f.election.cast_vote("pk-2@now", "pk-dir", true, unix_now()).unwrap();
        f.membership.handle(&join_envelope(2)).await.unwrap();
        assert_eq!(f.stores.peers.count(), 1);
    }
}
