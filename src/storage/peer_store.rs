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

//! Peer set (keyed by public key, IP also unique) and node KV config.

use crate::core::types::{decode_row_limited, encode_row, PeerConfig};
use crate::storage::{with_retry, StorageError, MAX_ROW_BYTES};
use tracing::warn;

/// Well-known config keys.
pub mod config_keys {
    /// This node's own `PeerConfig`, canonical JSON.
    pub const SELF_NODE: &str = "SELF_NODE";
    /// Directory (bootstrap) node address.
    pub const BOOTSTRAP_NODE_IP: &str = "BOOTSTRAP_NODE_IP";
    /// This node's public key, base64 SPKI.
    pub const PUBLIC_KEY: &str = "PUBLIC_KEY";
    /// Path of the private key file (material stays in the keystore).
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    /// Advisory role claimed at join time.
    pub const ROLE: &str = "ROLE";
    /// Last-known leader queue, canonical JSON list of entries.
    pub const LEADER_QUEUE: &str = "LEADER_QUEUE";
}

/// Peer and config store.
#[derive(Clone)]
pub struct PeerStore {
    peers: sled::Tree,
    config: sled::Tree,
}

impl PeerStore {
    pub(crate) fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let peers = db.open_tree("peers").map_err(|_| StorageError::Open)?;
        let config = db.open_tree("config").map_err(|_| StorageError::Open)?;
        Ok(Self { peers, config })
    }

    /// Insert or replace a peer. Fails when another peer already holds the IP.
    pub fn upsert_peer(&self, peer: &PeerConfig) -> Result<bool, StorageError> {
        for existing in self.all_peers()? {
            if existing.ip == peer.ip && existing.public_key != peer.public_key {
                warn!(ip = %peer.ip, "peer ip already claimed by another key");
                return Ok(false);
            }
        }
        let row = encode_row(peer).map_err(|_| StorageError::Corrupt)?;
        with_retry(|| self.peers.insert(peer.public_key.as_bytes(), row.as_slice()))?;
        Ok(true)
    }

    /// Lookup by public key.
    pub fn get_peer(&self, public_key: &str) -> Result<Option<PeerConfig>, StorageError> {
        let Some(row) = self.peers.get(public_key.as_bytes()).map_err(|_| StorageError::Io)? else {
            return Ok(None);
        };
        decode_row_limited(&row, MAX_ROW_BYTES).map(Some).map_err(|_| StorageError::Corrupt)
    }

    /// Lookup by IP.
    pub fn get_peer_by_ip(&self, ip: &str) -> Result<Option<PeerConfig>, StorageError> {
        Ok(self.all_peers()?.into_iter().find(|p| p.ip == ip))
    }

    /// Remove by public key. Returns whether a row was removed.
    pub fn remove_peer(&self, public_key: &str) -> Result<bool, StorageError> {
        Ok(with_retry(|| self.peers.remove(public_key.as_bytes()))?.is_some())
    }

    /// Every known peer, sorted by public key.
    pub fn all_peers(&self) -> Result<Vec<PeerConfig>, StorageError> {
        let mut out = Vec::new();
        for item in self.peers.iter() {
            let (_, row) = item.map_err(|_| StorageError::Io)?;
            out.push(decode_row_limited(&row, MAX_ROW_BYTES).map_err(|_| StorageError::Corrupt)?);
        }
        Ok(out)
    }

    /// Known peer count.
    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// Replace the whole peer set (directory broadcasts carry full lists).
    pub fn reset_peers(&self, peers: &[PeerConfig]) -> Result<(), StorageError> {
        with_retry(|| self.peers.clear())?;
        for peer in peers {
            let row = encode_row(peer).map_err(|_| StorageError::Corrupt)?;
            with_retry(|| self.peers.insert(peer.public_key.as_bytes(), row.as_slice()))?;
        }
        Ok(())
    }

    /// Read a config value.
    pub fn get_cfg(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(row) = self.config.get(key.as_bytes()).map_err(|_| StorageError::Io)? else {
            return Ok(None);
        };
        String::from_utf8(row.to_vec()).map(Some).map_err(|_| StorageError::Corrupt)
    }

    /// Write a config value.
    pub fn set_cfg(&self, key: &str, value: &str) -> Result<(), StorageError> {
        with_retry(|| self.config.insert(key.as_bytes(), value.as_bytes()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PeerRole;

    fn peer(ip: &str, pk: &str) -> PeerConfig {
        PeerConfig { ip: ip.to_string(), role: PeerRole::NormalNode, public_key: pk.to_string() }
    }

    #[test]
    fn ip_uniqueness_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("ledger")).unwrap();
        let store = PeerStore::new(&db).unwrap();

        assert!(store.upsert_peer(&peer("10.0.0.1", "pk-a")).unwrap());
        assert!(!store.upsert_peer(&peer("10.0.0.1", "pk-b")).unwrap());
        // Same key re-announcing its own ip is fine.
        assert!(store.upsert_peer(&peer("10.0.0.1", "pk-a")).unwrap());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("ledger")).unwrap();
        let store = PeerStore::new(&db).unwrap();

        assert!(store.get_cfg(config_keys::ROLE).unwrap().is_none());
        store.set_cfg(config_keys::ROLE, "NORMAL_NODE").unwrap();
        assert_eq!(store.get_cfg(config_keys::ROLE).unwrap().unwrap(), "NORMAL_NODE");
    }
}
