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

//! Append-only block log with a timestamp index and snapshot export/import.
//!
//! Primary tree: `hash -> json(Block)` (rows are self-describing because
//! transaction payloads are untagged). Index tree:
//! `timestamp_be || hash -> hash`, giving ordered scans and latest-by-time.
//! Snapshot files are length-prefixed rows in timestamp order.

use crate::core::types::{
    decode_json_row_limited, encode_json_row, is_chain_valid, Block, GENESIS_PREVIOUS_HASH,
};
use crate::storage::{with_retry, StorageError, MAX_ROW_BYTES};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

/// Content-addressed block store.
#[derive(Clone)]
pub struct BlockStore {
    blocks: sled::Tree,
    by_time: sled::Tree,
}

fn time_key(timestamp: u64, hash: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + hash.len());
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

impl BlockStore {
    pub(crate) fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks").map_err(|_| StorageError::Open)?;
        let by_time = db.open_tree("blocks_by_time").map_err(|_| StorageError::Open)?;
        Ok(Self { blocks, by_time })
    }

    /// Insert-or-ignore by hash. Returns whether the block was newly stored.
    pub fn put(&self, block: &Block) -> Result<bool, StorageError> {
        if self.blocks.contains_key(block.hash.as_bytes()).map_err(|_| StorageError::Io)? {
            return Ok(false);
        }
        let row = encode_json_row(block).map_err(|_| StorageError::Corrupt)?;
        with_retry(|| self.blocks.insert(block.hash.as_bytes(), row.as_slice()))?;
        with_retry(|| self.by_time.insert(time_key(block.timestamp, &block.hash), block.hash.as_bytes()))?;
        Ok(true)
    }

    /// Lookup by hash.
    pub fn get(&self, hash: &str) -> Result<Option<Block>, StorageError> {
        let Some(row) = self.blocks.get(hash.as_bytes()).map_err(|_| StorageError::Io)? else {
            return Ok(None);
        };
        decode_json_row_limited(&row, MAX_ROW_BYTES).map(Some).map_err(|_| StorageError::Corrupt)
    }

    /// The block with the greatest timestamp, if any.
    pub fn latest(&self) -> Result<Option<Block>, StorageError> {
        let Some((_, hash)) = self.by_time.last().map_err(|_| StorageError::Io)? else {
            return Ok(None);
        };
        let hash = String::from_utf8(hash.to_vec()).map_err(|_| StorageError::Corrupt)?;
        self.get(&hash)
    }

    /// The current tip hash, or the genesis sentinel when empty.
    pub fn latest_hash(&self) -> Result<String, StorageError> {
        Ok(self.latest()?.map(|b| b.hash).unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string()))
    }

    /// All blocks in timestamp-ascending order.
    pub fn scan_by_timestamp(&self) -> Result<Vec<Block>, StorageError> {
        let mut out = Vec::with_capacity(self.count());
        for item in self.by_time.iter() {
            let (_, hash) = item.map_err(|_| StorageError::Io)?;
            let hash = String::from_utf8(hash.to_vec()).map_err(|_| StorageError::Corrupt)?;
            if let Some(block) = self.get(&hash)? {
                out.push(block);
            }
        }
        Ok(out)
    }

    /// Stored block count.
    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    /// Remove a block (competing-block tie-break only).
    pub fn remove(&self, hash: &str) -> Result<Option<Block>, StorageError> {
        let Some(block) = self.get(hash)? else {
            return Ok(None);
        };
        with_retry(|| self.blocks.remove(hash.as_bytes()))?;
        with_retry(|| self.by_time.remove(time_key(block.timestamp, hash)))?;
        Ok(Some(block))
    }

    /// Drop every block.
    pub fn truncate(&self) -> Result<(), StorageError> {
        with_retry(|| self.blocks.clear())?;
        with_retry(|| self.by_time.clear())?;
        Ok(())
    }

    /// Header-hash and parent-link validation over the full log.
    ///
    /// Bodies are not consulted, so pruned chains stay valid.
    pub fn is_chain_valid(&self) -> Result<bool, StorageError> {
        Ok(is_chain_valid(&self.scan_by_timestamp()?))
    }

    /// Export a consistent snapshot of the log to `path`.
    ///
    /// Rows are written to a sibling temp file and renamed into place.
    pub fn snapshot_export(&self, path: &Path) -> Result<u64, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| StorageError::Io)?;
        }
        let tmp = path.with_extension("partial");
        let mut rows = 0u64;
        {
            let mut file = fs::File::create(&tmp).map_err(|_| StorageError::Io)?;
            for block in self.scan_by_timestamp()? {
                let row = encode_json_row(&block).map_err(|_| StorageError::Corrupt)?;
                let len = u32::try_from(row.len()).map_err(|_| StorageError::Corrupt)?;
                file.write_all(&len.to_be_bytes()).map_err(|_| StorageError::Io)?;
                file.write_all(&row).map_err(|_| StorageError::Io)?;
                rows += 1;
            }
            let _ = file.sync_all();
        }
        fs::rename(&tmp, path).map_err(|_| StorageError::Io)?;
        Ok(rows)
    }

    /// Read every replayable row from a snapshot file produced by
    /// [`BlockStore::snapshot_export`], in file order.
    pub fn extract_inserts(path: &Path) -> Result<Vec<Block>, StorageError> {
        let mut file = fs::File::open(path).map_err(|_| StorageError::Io)?;
        let mut out = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(_) => return Err(StorageError::Io),
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_ROW_BYTES {
                return Err(StorageError::Corrupt);
            }
            let mut row = vec![0u8; len];
            file.read_exact(&mut row).map_err(|_| StorageError::Io)?;
            let block: Block = decode_json_row_limited(&row, MAX_ROW_BYTES).map_err(|_| StorageError::Corrupt)?;
            out.push(block);
        }
        Ok(out)
    }

    /// Replay one snapshot row. Idempotent by hash.
    pub fn insert_raw(&self, block: &Block) -> Result<bool, StorageError> {
        self.put(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Block;

    fn open_store(dir: &Path) -> (sled::Db, BlockStore) {
        let db = sled::open(dir.join("ledger")).unwrap();
        let store = BlockStore::new(&db).unwrap();
        (db, store)
    }

    fn chain(n: usize) -> Vec<Block> {
        let mut out = vec![Block::genesis(1000)];
        for i in 1..n {
            let prev = out[i - 1].hash.clone();
            out.push(Block::seal(prev, Vec::new(), 1000 + 5 * i as u64));
        }
        out
    }

    #[test]
    fn put_is_insert_or_ignore() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());
        let genesis = Block::genesis(1000);
        assert!(store.put(&genesis).unwrap());
        assert!(!store.put(&genesis).unwrap());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn scan_is_timestamp_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());
        let blocks = chain(5);
        // Insert out of order; the index restores time order.
        for block in blocks.iter().rev() {
            store.put(block).unwrap();
        }
        let scanned = store.scan_by_timestamp().unwrap();
        assert_eq!(scanned, blocks);
        assert_eq!(store.latest_hash().unwrap(), blocks[4].hash);
        assert!(store.is_chain_valid().unwrap());
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());
        for block in chain(10) {
            store.put(&block).unwrap();
        }
        let snap = dir.path().join("snapshot.bin");
        assert_eq!(store.snapshot_export(&snap).unwrap(), 10);

        let dir2 = tempfile::tempdir().unwrap();
        let (_db2, store2) = open_store(dir2.path());
        for block in BlockStore::extract_inserts(&snap).unwrap() {
            store2.insert_raw(&block).unwrap();
        }
        assert_eq!(store2.count(), 10);
        assert_eq!(store2.latest_hash().unwrap(), store.latest_hash().unwrap());
    }

    #[test]
    fn empty_store_reports_genesis_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, store) = open_store(dir.path());
        assert_eq!(store.latest_hash().unwrap(), "0");
        assert!(store.latest().unwrap().is_none());
    }
}
