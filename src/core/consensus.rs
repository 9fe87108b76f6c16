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

//! Round-robin leader consensus.
//!
//! One slot loop per peer, ticking every `B` seconds: the queue head seals
//! a block when the mempool is non-empty; everyone else rotates locally
//! after `T` silent seconds. Block acceptance verifies the header hash,
//! the parent link, every transaction signature, the merkle root, and the
//! producer's queue position (within one step, tolerating failover skew).

use crate::core::mempool::Mempool;
use crate::core::queue::LeaderQueue;
use crate::core::state_machine::StateMachine;
use crate::core::types::{unix_now, Block, ConsensusSettings};
use crate::monitoring::metrics::Metrics;
use crate::net::envelope::{Envelope, MessageType};
use crate::net::transport::{RoleFilter, Transport};
use crate::storage::{BlockStore, PeerStore, StorageError, TxStore};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Consensus errors.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Failover timeout must be at least three block intervals.
    #[error("invalid timing (failover must be >= 3x block interval)")]
    InvalidTiming,
    /// Payload did not decode as a block.
    #[error("malformed block payload")]
    Malformed,
    /// Stored hash does not match the header fields.
    #[error("header hash mismatch")]
    HeaderMismatch,
    /// Merkle root does not commit to the carried transactions.
    #[error("merkle root mismatch")]
    MerkleMismatch,
    /// A carried transaction failed signature verification.
    #[error("invalid transaction signature")]
    SignatureInvalid,
    /// Producer is not at (or within one step of) the queue head.
    #[error("unexpected producer")]
    WrongProducer,
    /// Parent is unknown locally; the node must sync.
    #[error("fork detected")]
    ForkDetected,
    /// Duplicate or superseded block; safely ignored.
    #[error("stale block")]
    Stale,
    /// Storage failure.
    #[error("storage")]
    Storage(#[from] StorageError),
}

/// Validated consensus timing.
#[derive(Clone, Copy, Debug)]
pub struct ConsensusTiming {
    /// Block-buffer time B.
    pub block_interval: Duration,
    /// Failover timeout T.
    pub failover_timeout: Duration,
}

impl ConsensusTiming {
    /// Validate settings; `T` must be at least `3 * B`.
    pub fn from_settings(settings: &ConsensusSettings) -> Result<Self, ConsensusError> {
        if settings.failover_timeout_secs < settings.block_interval_secs.saturating_mul(3) {
            return Err(ConsensusError::InvalidTiming);
        }
        Ok(Self {
            block_interval: Duration::from_secs(settings.block_interval_secs),
            failover_timeout: Duration::from_secs(settings.failover_timeout_secs),
        })
    }
}

/// Slot-loop driver and block acceptance path.
pub struct Consensus {
    timing: ConsensusTiming,
    self_key: String,
    self_ip: String,
    blocks: BlockStore,
    txs: TxStore,
    peers: PeerStore,
    mempool: Arc<Mempool>,
    queue: Arc<RwLock<LeaderQueue>>,
    state: Arc<StateMachine>,
    transport: Arc<Transport>,
    metrics: Arc<Metrics>,
    last_observed: Mutex<Instant>,
}

impl Consensus {
    /// Wire up the consensus driver.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timing: ConsensusTiming,
        self_key: String,
        self_ip: String,
        blocks: BlockStore,
        txs: TxStore,
        peers: PeerStore,
        mempool: Arc<Mempool>,
        queue: Arc<RwLock<LeaderQueue>>,
        state: Arc<StateMachine>,
        transport: Arc<Transport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            timing,
            self_key,
            self_ip,
            blocks,
            txs,
            peers,
            mempool,
            queue,
            state,
            transport,
            metrics,
            last_observed: Mutex::new(Instant::now()),
        }
    }

    /// Write the genesis block into an empty store. Returns whether written.
    pub fn ensure_genesis(&self) -> Result<bool, ConsensusError> {
        if self.blocks.count() > 0 {
            return Ok(false);
        }
        let genesis = Block::genesis(unix_now());
        self.blocks.put(&genesis)?;
        self.metrics.block_height.set(self.blocks.count() as i64);
        info!(hash = %genesis.hash, "genesis block written");
        Ok(true)
    }

    /// The slot loop. Ticks every `B` seconds; finishes the current
    /// iteration on shutdown so no partial block is written.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.timing.block_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            block_interval = ?self.timing.block_interval,
            failover = ?self.timing.failover_timeout,
            "slot loop started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.slot_tick().await {
                        warn!(err = %e, "slot tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("slot loop stopped");
                    break;
                }
            }
        }
    }

    async fn slot_tick(&self) -> Result<(), ConsensusError> {
        let leader = {
            let queue = self.queue.read().unwrap_or_else(|e| e.into_inner());
            queue.peek().cloned()
        };
        let Some(leader) = leader else {
            // Nothing to lead; consensus stays idle until the queue fills.
            return Ok(());
        };

        if leader.public_key == self.self_key {
            if !self.mempool.is_empty() {
                self.produce_and_publish().await?;
            }
            return Ok(());
        }

        let silent = self.last_observed.lock().unwrap_or_else(|e| e.into_inner()).elapsed();
        if silent > self.timing.failover_timeout {
            {
                let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
                queue.advance();
            }
            // Grace: restart the clock so concurrent timeouts rotate once per T.
            *self.last_observed.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
            self.metrics.leader_failovers_total.inc();
            warn!(leader = %leader.public_key, silent = ?silent, "leader silent; rotating locally");
        }
        Ok(())
    }

    async fn produce_and_publish(&self) -> Result<(), ConsensusError> {
        let txs = self.mempool.drain();
        if txs.is_empty() {
            return Ok(());
        }
        let previous_hash = self.blocks.latest_hash()?;
        let block = Block::seal(previous_hash, txs, unix_now());

        for tx in &block.transactions {
            self.txs.put(tx)?;
        }
        self.blocks.put(&block)?;
        self.state.apply(&block)?;

        self.metrics.blocks_committed_total.inc();
        self.metrics.transactions_total.inc_by(block.transactions.len() as u64);
        self.metrics.block_height.set(self.blocks.count() as i64);
        self.metrics.mempool_size.set(self.mempool.len() as i64);

        let envelope = Envelope::new(
            MessageType::BlockPublish,
            &self.self_ip,
            Some(self.self_key.clone()),
            &block,
        )
        .map_err(|_| ConsensusError::Malformed)?;
        let peers = self.peers.all_peers()?;
        self.transport.broadcast(&envelope, &peers, &RoleFilter::Any).await;

        {
            let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
            queue.advance();
        }
        *self.last_observed.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        info!(hash = %block.hash, txs = block.transactions.len(), "block sealed and published");
        Ok(())
    }

    /// Accept a `BLOCK_PUBLISH` envelope.
    ///
    /// [`ConsensusError::ForkDetected`] asks the caller to trigger sync
    /// against the sender; every other error just drops the block.
    pub fn on_block_publish(&self, envelope: &Envelope) -> Result<(), ConsensusError> {
        let block: Block = envelope.payload_as().map_err(|_| {
            self.metrics.malformed_total.inc();
            ConsensusError::Malformed
        })?;

        if !block.header_valid() {
            self.metrics.signature_invalid_total.inc();
            return Err(ConsensusError::HeaderMismatch);
        }

        let tip_hash = self.blocks.latest_hash()?;
        if block.hash == tip_hash {
            return Err(ConsensusError::Stale);
        }
        if block.previous_hash != tip_hash {
            return self.handle_divergent(block);
        }

        self.verify_body(&block)?;
        self.verify_producer(envelope)?;
        self.commit(&block)?;
        Ok(())
    }

    fn verify_body(&self, block: &Block) -> Result<(), ConsensusError> {
        for tx in &block.transactions {
            if !tx.verify() {
                self.metrics.signature_invalid_total.inc();
                return Err(ConsensusError::SignatureInvalid);
            }
        }
        if !block.body_valid() {
            self.metrics.signature_invalid_total.inc();
            return Err(ConsensusError::MerkleMismatch);
        }
        Ok(())
    }

    fn verify_producer(&self, envelope: &Envelope) -> Result<(), ConsensusError> {
        let Some(sender_key) = envelope.sender_public_key.as_deref() else {
            return Err(ConsensusError::WrongProducer);
        };
        let queue = self.queue.read().unwrap_or_else(|e| e.into_inner());
        if queue.is_empty() {
            // A fresh replica with no queue view yet cannot police producers.
            return Ok(());
        }
        if !queue.is_within_one_step(sender_key) {
            warn!(producer = %sender_key, "block from a peer outside the leader window");
            return Err(ConsensusError::WrongProducer);
        }
        Ok(())
    }

    fn commit(&self, block: &Block) -> Result<(), ConsensusError> {
        for tx in &block.transactions {
            self.txs.put(tx)?;
        }
        self.blocks.put(block)?;
        self.state.apply(block)?;

        let committed: Vec<String> = block.transactions.iter().map(|t| t.hash.clone()).collect();
        self.mempool.remove_committed(&committed);
        {
            let mut queue = self.queue.write().unwrap_or_else(|e| e.into_inner());
            queue.advance();
        }
        *self.last_observed.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();

        self.metrics.blocks_committed_total.inc();
        self.metrics.transactions_total.inc_by(block.transactions.len() as u64);
        self.metrics.block_height.set(self.blocks.count() as i64);
        self.metrics.mempool_size.set(self.mempool.len() as i64);
        info!(hash = %block.hash, txs = block.transactions.len(), "block accepted");
        Ok(())
    }

    /// An incoming block whose parent is not the local tip: either a
    /// competitor for the current slot (tie-break) or evidence we diverged.
    fn handle_divergent(&self, block: Block) -> Result<(), ConsensusError> {
        let Some(tip) = self.blocks.latest()? else {
            self.metrics.forks_detected_total.inc();
            return Err(ConsensusError::ForkDetected);
        };

        if block.previous_hash != tip.previous_hash {
            if self.blocks.get(&block.previous_hash)?.is_some() {
                // Builds on an ancestor we already extended past.
                debug!(hash = %block.hash, "superseded block discarded");
                return Err(ConsensusError::Stale);
            }
            self.metrics.forks_detected_total.inc();
            return Err(ConsensusError::ForkDetected);
        }

        // Same parent as our tip: earlier timestamp wins, then smaller hash.
        let incoming_wins = (block.timestamp, &block.hash) < (tip.timestamp, &tip.hash);
        if !incoming_wins {
            debug!(hash = %block.hash, "competing block lost the tie-break");
            for tx in block.transactions {
                let _ = self.mempool.add(tx);
            }
            self.metrics.mempool_size.set(self.mempool.len() as i64);
            return Err(ConsensusError::Stale);
        }

        self.verify_body(&block)?;
        info!(winner = %block.hash, loser = %tip.hash, "competing block won the tie-break");
        self.blocks.remove(&tip.hash)?;
        for tx in tip.transactions {
            let _ = self.mempool.add(tx);
        }
        for tx in &block.transactions {
            self.txs.put(tx)?;
        }
        self.blocks.put(&block)?;
        self.state.rebuild(&self.blocks)?;

        let committed: Vec<String> = block.transactions.iter().map(|t| t.hash.clone()).collect();
        self.mempool.remove_committed(&committed);
        *self.last_observed.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.metrics.block_height.set(self.blocks.count() as i64);
        self.metrics.mempool_size.set(self.mempool.len() as i64);
        Ok(())
    }

    /// Note a block observed outside the acceptance path (sync import).
    pub fn mark_observed(&self) {
        *self.last_observed.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}
