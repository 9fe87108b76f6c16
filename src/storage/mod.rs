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

//! Durable stores over one sled database, one tree per concern.
//!
//! Writes go through [`with_retry`]; readers run concurrently against the
//! same trees. Not-found is `Ok(None)`, never an error.

pub mod block_store;
pub mod peer_store;
pub mod tx_store;
pub mod zone_store;

use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use block_store::BlockStore;
pub use peer_store::PeerStore;
pub use tx_store::TxStore;
pub use zone_store::ZoneStore;

/// Maximum bincode row size accepted when decoding stored values.
pub(crate) const MAX_ROW_BYTES: usize = 8 * 1024 * 1024;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("db open")]
    Open,
    #[error("db io")]
    Io,
    #[error("transient contention")]
    Busy,
    #[error("corrupt row")]
    Corrupt,
}

const RETRY_BASE: Duration = Duration::from_millis(25);
const RETRY_ATTEMPTS: u32 = 5;

/// Run a store write, retrying transient failures with exponential backoff
/// (base 25 ms, at most 5 attempts) before surfacing a write failure.
pub(crate) fn with_retry<T>(mut op: impl FnMut() -> sled::Result<T>) -> Result<T, StorageError> {
    let mut delay = RETRY_BASE;
    for attempt in 0..RETRY_ATTEMPTS {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt + 1 == RETRY_ATTEMPTS {
                    warn!(err = %e, "store write failed after retries");
                    return Err(StorageError::Io);
                }
                std::thread::sleep(delay);
                delay *= 2;
            }
        }
    }
    Err(StorageError::Busy)
}

/// All durable stores of one node.
pub struct Stores {
    db: sled::Db,
    /// Append-only block log.
    pub blocks: BlockStore,
    /// Committed transaction archive.
    pub transactions: TxStore,
    /// Live DNS zone.
    pub zone: ZoneStore,
    /// Peer set and node KV config.
    pub peers: PeerStore,
}

impl Stores {
    /// Open (or create) the database under `data_dir/ledger`.
    pub fn open(data_dir: &str) -> Result<Self, StorageError> {
        let path = Path::new(data_dir).join("ledger");
        let db = sled::open(&path).map_err(|_| StorageError::Open)?;
        let blocks = BlockStore::new(&db)?;
        let transactions = TxStore::new(&db)?;
        let zone = ZoneStore::new(&db)?;
        let peers = PeerStore::new(&db)?;
        Ok(Self { db, blocks, transactions, zone, peers })
    }

    /// Flush all trees to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map(|_| ()).map_err(|_| StorageError::Io)
    }
}
