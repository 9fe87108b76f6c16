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

//! Snapshot export/import and ledger catch-up for new or lagging peers.
//!
//! `BLOCK_PUBLISH` messages arriving mid-sync are discarded by the
//! orchestrator; the leader republishes on the next slot.

use crate::core::state_machine::StateMachine;
use crate::monitoring::metrics::Metrics;
use crate::net::envelope::{Envelope, MessageType};
use crate::net::transport::Transport;
use crate::storage::{BlockStore, PeerStore, StorageError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No peer besides ourselves is known.
    #[error("no peer available")]
    NoPeer,
    /// Snapshot could not be produced or delivered.
    #[error("snapshot transfer failed")]
    Transfer,
    /// Storage failure.
    #[error("storage")]
    Storage(#[from] StorageError),
}

/// Snapshot sync driver.
pub struct SyncManager {
    self_ip: String,
    self_key: String,
    blocks: BlockStore,
    peers: PeerStore,
    state: Arc<StateMachine>,
    transport: Arc<Transport>,
    metrics: Arc<Metrics>,
    outbox: PathBuf,
    in_progress: AtomicBool,
}

impl SyncManager {
    /// Wire up the sync driver.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_ip: String,
        self_key: String,
        data_dir: &str,
        blocks: BlockStore,
        peers: PeerStore,
        state: Arc<StateMachine>,
        transport: Arc<Transport>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            self_ip,
            self_key,
            blocks,
            peers,
            state,
            transport,
            metrics,
            outbox: PathBuf::from(data_dir).join("outbox"),
            in_progress: AtomicBool::new(false),
        }
    }

    /// True when a requested sync has not yet imported its snapshot.
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// True at boot when the ledger is empty but peers exist to copy from.
    pub fn needs_bootstrap(&self) -> Result<bool, SyncError> {
        if self.blocks.count() > 0 {
            return Ok(false);
        }
        let others = self.peers.all_peers()?.into_iter().any(|p| p.public_key != self.self_key);
        Ok(others)
    }

    /// Request a snapshot from any known peer that is not ourselves.
    pub async fn request_from_any(&self) -> Result<(), SyncError> {
        let peer = self
            .peers
            .all_peers()?
            .into_iter()
            .find(|p| p.public_key != self.self_key)
            .ok_or(SyncError::NoPeer)?;
        self.request_from(&peer.ip).await
    }

    /// Ask `peer_ip` for a block-store snapshot.
    pub async fn request_from(&self, peer_ip: &str) -> Result<(), SyncError> {
        let env = Envelope::new(
            MessageType::SyncRequest,
            &self.self_ip,
            Some(self.self_key.clone()),
            &(),
        )
        .map_err(|_| SyncError::Transfer)?;
        if !self.transport.send_direct(peer_ip, &env).await {
            return Err(SyncError::Transfer);
        }
        self.in_progress.store(true, Ordering::Release);
        info!(peer = %peer_ip, "sync requested");
        Ok(())
    }

    /// Serve a `SYNC_REQUEST`: export a snapshot and stream it back.
    pub async fn on_sync_request(&self, envelope: &Envelope) -> Result<(), SyncError> {
        let path = self.outbox.join("snapshot.bin");
        let rows = self.blocks.snapshot_export(&path)?;
        info!(peer = %envelope.sender_ip, rows, "serving snapshot");
        if !self.transport.send_file(&envelope.sender_ip, &path).await {
            warn!(peer = %envelope.sender_ip, "snapshot delivery failed");
            return Err(SyncError::Transfer);
        }
        Ok(())
    }

    /// Import a received snapshot: replay rows (idempotent by hash), then
    /// rebuild the zone from the full log.
    pub fn on_snapshot_file(&self, path: &Path) -> Result<usize, SyncError> {
        let rows = BlockStore::extract_inserts(path)?;
        let mut imported = 0usize;
        for block in &rows {
            if self.blocks.insert_raw(block)? {
                imported += 1;
            }
        }
        self.state.rebuild(&self.blocks)?;
        self.in_progress.store(false, Ordering::Release);
        self.metrics.block_height.set(self.blocks.count() as i64);
        info!(rows = rows.len(), imported, "snapshot imported and zone rebuilt");
        Ok(imported)
    }
}
