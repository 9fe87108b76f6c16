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

//! Node orchestration: wiring, message routing, and lifecycle.
//!
//! A node is the directory when its own address equals the configured
//! bootstrap address; otherwise it joins through the directory and syncs
//! its ledger before taking part in the rotation.

use crate::core::consensus::{Consensus, ConsensusError, ConsensusTiming};
use crate::core::election::Election;
use crate::core::keystore::{Keystore, KeystoreError};
use crate::core::mempool::{Mempool, MempoolError};
use crate::core::queue::LeaderQueue;
use crate::core::state_machine::StateMachine;
use crate::core::types::{canonical_json, NodeConfig, PeerConfig, Transaction};
use crate::dns::cache::DnsCache;
use crate::dns::server::{DnsServer, DnsServerError};
use crate::monitoring::metrics::{self, Metrics, MetricsError};
use crate::net::envelope::{Envelope, MessageType};
use crate::net::membership::Membership;
use crate::net::sync::SyncManager;
use crate::net::transport::{Inbound, RoleFilter, Transport};
use crate::storage::peer_store::config_keys;
use crate::storage::{StorageError, Stores};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const INBOUND_QUEUE_DEPTH: usize = 1024;

/// Node lifecycle errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Storage failure.
    #[error("storage")]
    Storage(#[from] StorageError),
    /// Keystore failure.
    #[error("keystore")]
    Keystore(#[from] KeystoreError),
    /// Consensus configuration failure.
    #[error("consensus")]
    Consensus(#[from] ConsensusError),
    /// DNS front end configuration failure.
    #[error("dns")]
    Dns(#[from] DnsServerError),
    /// Metrics registry failure.
    #[error("metrics")]
    Metrics(#[from] MetricsError),
    /// Listener socket failure.
    #[error("bind: {0}")]
    Bind(std::io::Error),
}

/// Bounded worker pool sized by hardware parallelism (floor 4).
fn worker_pool() -> Arc<Semaphore> {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    Arc::new(Semaphore::new(std::cmp::max(4, 4 * cores)))
}

/// A running node and its background tasks.
pub struct Node {
    cfg: NodeConfig,
    mempool: Arc<Mempool>,
    transport: Arc<Transport>,
    stores: Arc<Stores>,
    keystore: Arc<Keystore>,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Wire every component, start background tasks, and join the network.
    pub async fn start(cfg: NodeConfig) -> Result<Self, NodeError> {
        let stores = Arc::new(Stores::open(&cfg.node.data_dir)?);
        let keystore = Arc::new(Keystore::open(&cfg.node.data_dir)?);
        let metrics = Arc::new(Metrics::new()?);

        let self_key = keystore.public_key_b64();
        let self_ip = cfg.net.self_ip.clone();
        let is_directory = cfg.net.self_ip == cfg.net.bootstrap_ip;
        let self_peer = PeerConfig {
            ip: self_ip.clone(),
            role: cfg.net.role,
            public_key: self_key.clone(),
        };
        persist_identity(&stores, &cfg, &self_peer)?;

        let workers = worker_pool();
        let transport = Arc::new(Transport::new(
            cfg.net.peer_port,
            &cfg.node.data_dir,
            Arc::clone(&workers),
            Arc::clone(&metrics),
        ));
        let cache = Arc::new(DnsCache::new());
        let state = Arc::new(StateMachine::new(
            stores.zone.clone(),
            Arc::clone(&cache),
            Arc::clone(&metrics),
        ));
        let mempool = Arc::new(Mempool::new());
        let queue = Arc::new(RwLock::new(LeaderQueue::new()));
        let election = Arc::new(Election::new());

        let membership = Arc::new(Membership::new(
            self_ip.clone(),
            self_key.clone(),
            is_directory,
            stores.peers.clone(),
            Arc::clone(&queue),
            Arc::clone(&transport),
            election,
            Arc::clone(&metrics),
        ));
        let timing = ConsensusTiming::from_settings(&cfg.consensus)?;
        let consensus = Arc::new(Consensus::new(
            timing,
            self_key.clone(),
            self_ip.clone(),
            stores.blocks.clone(),
            stores.transactions.clone(),
            stores.peers.clone(),
            Arc::clone(&mempool),
            Arc::clone(&queue),
            Arc::clone(&state),
            Arc::clone(&transport),
            Arc::clone(&metrics),
        ));
        let sync = Arc::new(SyncManager::new(
            self_ip.clone(),
            self_key.clone(),
            &cfg.node.data_dir,
            stores.blocks.clone(),
            stores.peers.clone(),
            Arc::clone(&state),
            Arc::clone(&transport),
            Arc::clone(&metrics),
        ));
        let dns = Arc::new(DnsServer::new(
            &cfg.dns.origin,
            cfg.dns.port,
            cfg.dns.upstream.clone(),
            stores.zone.clone(),
            Arc::clone(&cache),
            Arc::clone(&workers),
            Arc::clone(&metrics),
        )?);

        // Rejoin with the last-known rotation view until the next update.
        match membership.restore_queue() {
            Ok(n) if n > 0 => info!(entries = n, "leader queue restored from disk"),
            _ => {}
        }
        if is_directory {
            stores.peers.upsert_peer(&self_peer)?;
            let mut q = queue.write().unwrap_or_else(|e| e.into_inner());
            if q.is_empty() {
                let seq = q.next_sequence();
                q.add_node(self_peer.clone(), seq);
            }
        }
        metrics.peers.set(stores.peers.count() as i64);
        metrics.block_height.set(stores.blocks.count() as i64);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Inbound routing.
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        transport.register(inbound_tx);
        tasks.push(tokio::spawn(dispatch_loop(
            inbound_rx,
            shutdown_rx.clone(),
            Arc::clone(&consensus),
            Arc::clone(&membership),
            Arc::clone(&sync),
            Arc::clone(&mempool),
            Arc::clone(&metrics),
        )));

        // Listeners.
        let peer_listener = transport.bind().await.map_err(NodeError::Bind)?;
        tasks.push(tokio::spawn(
            Arc::clone(&transport).run_listener(peer_listener, shutdown_rx.clone()),
        ));
        let udp = dns.bind_udp().await.map_err(NodeError::Bind)?;
        tasks.push(tokio::spawn(Arc::clone(&dns).run_udp(udp, shutdown_rx.clone())));
        let tcp = dns.bind_tcp().await.map_err(NodeError::Bind)?;
        tasks.push(tokio::spawn(Arc::clone(&dns).run_tcp(tcp, shutdown_rx.clone())));

        // Slot loop.
        tasks.push(tokio::spawn(Arc::clone(&consensus).run(shutdown_rx.clone())));

        if !cfg.metrics.listen_addr.is_empty() {
            let addr = cfg.metrics.listen_addr.clone();
            let m = Arc::clone(&metrics);
            tasks.push(tokio::spawn(metrics::serve(addr, m)));
        }

        if is_directory {
            consensus.ensure_genesis()?;
        } else {
            // Announce ourselves and learn the peer set; the directory's
            // broadcasts fill the queue, and FETCH_NODES_RESPONSE triggers
            // a ledger sync when we boot empty.
            membership.announce_join(&cfg.net.bootstrap_ip, cfg.net.role).await;
            membership.fetch_nodes(&cfg.net.bootstrap_ip).await;
        }

        info!(
            name = %cfg.node.name,
            directory = is_directory,
            origin = %cfg.dns.origin,
            "node started"
        );
        Ok(Self { cfg, mempool, transport, stores, keystore, metrics, shutdown_tx, tasks })
    }

    /// Validate and enqueue a locally submitted transaction, then gossip it.
    ///
    /// Returns whether the transaction was newly admitted.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<bool, MempoolError> {
        let admitted = self.mempool.add(tx.clone())?;
        self.metrics.mempool_size.set(self.mempool.len() as i64);
        if admitted {
            if let Ok(envelope) = Envelope::new(
                MessageType::TransactionPublish,
                &self.cfg.net.self_ip,
                Some(self.keystore.public_key_b64()),
                &tx,
            ) {
                if let Ok(peers) = self.stores.peers.all_peers() {
                    self.transport.broadcast(&envelope, &peers, &RoleFilter::Any).await;
                }
            }
        }
        Ok(admitted)
    }

    /// The node's signing identity.
    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    /// Stop background tasks, giving in-flight work a bounded grace period.
    pub async fn shutdown(mut self) {
        info!("node shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("task did not stop within grace period; abandoning");
            }
        }
        if let Err(e) = self.stores.flush() {
            warn!(err = %e, "final store flush failed");
        }
    }
}

fn persist_identity(
    stores: &Stores,
    cfg: &NodeConfig,
    self_peer: &PeerConfig,
) -> Result<(), NodeError> {
    let peers = &stores.peers;
    if let Ok(json) = canonical_json(self_peer) {
        peers.set_cfg(config_keys::SELF_NODE, &json)?;
    }
    peers.set_cfg(config_keys::PUBLIC_KEY, &self_peer.public_key)?;
    peers.set_cfg(
        config_keys::PRIVATE_KEY,
        &format!("{}/node.key", cfg.node.data_dir),
    )?;
    peers.set_cfg(config_keys::ROLE, cfg.net.role.as_str())?;
    peers.set_cfg(config_keys::BOOTSTRAP_NODE_IP, &cfg.net.bootstrap_ip)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_loop(
    mut inbound: mpsc::Receiver<Inbound>,
    mut shutdown: watch::Receiver<bool>,
    consensus: Arc<Consensus>,
    membership: Arc<Membership>,
    sync: Arc<SyncManager>,
    mempool: Arc<Mempool>,
    metrics: Arc<Metrics>,
) {
    loop {
        let item = tokio::select! {
            item = inbound.recv() => item,
            _ = shutdown.changed() => break,
        };
        let Some(item) = item else {
            break;
        };
        match item {
            Inbound::File { path } => match sync.on_snapshot_file(&path) {
                Ok(imported) => {
                    debug!(imported, "snapshot rows imported");
                    consensus.mark_observed();
                }
                Err(e) => warn!(err = %e, "snapshot import failed"),
            },
            Inbound::Message { envelope, .. } => {
                route_message(&envelope, &consensus, &membership, &sync, &mempool, &metrics).await;
            }
        }
    }
}

async fn route_message(
    envelope: &Envelope,
    consensus: &Consensus,
    membership: &Membership,
    sync: &SyncManager,
    mempool: &Mempool,
    metrics: &Metrics,
) {
    match envelope.msg_type {
        MessageType::BlockPublish => {
            if sync.in_progress() {
                // Discarded on purpose; the leader republishes next slot.
                debug!("block publish discarded during sync");
                return;
            }
            match consensus.on_block_publish(envelope) {
                Ok(()) => {}
                Err(ConsensusError::ForkDetected) => {
                    warn!(peer = %envelope.sender_ip, "local tip diverged; requesting sync");
                    if let Err(e) = sync.request_from(&envelope.sender_ip).await {
                        warn!(err = %e, "sync request failed");
                    }
                }
                Err(e) => debug!(err = %e, "block rejected"),
            }
        }
        MessageType::TransactionPublish => {
            match envelope.payload_as::<Transaction>() {
                Ok(tx) => match mempool.add(tx) {
                    Ok(_) => metrics.mempool_size.set(mempool.len() as i64),
                    Err(e) => {
                        debug!(err = %e, "gossiped transaction rejected");
                        metrics.signature_invalid_total.inc();
                    }
                },
                Err(_) => {
                    metrics.malformed_total.inc();
                }
            }
        }
        MessageType::SyncRequest => {
            if let Err(e) = sync.on_sync_request(envelope).await {
                warn!(err = %e, peer = %envelope.sender_ip, "sync request not served");
            }
        }
        _ => {
            if let Err(e) = membership.handle(envelope).await {
                debug!(err = %e, msg = ?envelope.msg_type, "membership message dropped");
            }
            // A fresh node that just learned the peer set fetches the ledger.
            if envelope.msg_type == MessageType::FetchNodesResponse {
                if let Ok(true) = sync.needs_bootstrap() {
                    if let Err(e) = sync.request_from_any().await {
                        warn!(err = %e, "bootstrap sync failed to start");
                    }
                }
            }
        }
    }
}
