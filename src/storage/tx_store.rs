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

//! Committed-transaction archive, keyed by transaction hash.
//!
//! Rows are JSON: payloads are untagged, which fixint bincode cannot re-read.

use crate::core::types::{decode_json_row_limited, encode_json_row, Transaction};
use crate::storage::{with_retry, StorageError, MAX_ROW_BYTES};

/// Content-addressed transaction store.
#[derive(Clone)]
pub struct TxStore {
    tree: sled::Tree,
}

impl TxStore {
    pub(crate) fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("transactions").map_err(|_| StorageError::Open)?;
        Ok(Self { tree })
    }

    /// Insert-or-ignore by hash. Returns whether the row was newly stored.
    pub fn put(&self, tx: &Transaction) -> Result<bool, StorageError> {
        if self.tree.contains_key(tx.hash.as_bytes()).map_err(|_| StorageError::Io)? {
            return Ok(false);
        }
        let row = encode_json_row(tx).map_err(|_| StorageError::Corrupt)?;
        with_retry(|| self.tree.insert(tx.hash.as_bytes(), row.as_slice()))?;
        Ok(true)
    }

    /// Lookup by hash.
    pub fn get(&self, hash: &str) -> Result<Option<Transaction>, StorageError> {
        let Some(row) = self.tree.get(hash.as_bytes()).map_err(|_| StorageError::Io)? else {
            return Ok(None);
        };
        decode_json_row_limited(&row, MAX_ROW_BYTES).map(Some).map_err(|_| StorageError::Corrupt)
    }

    /// Stored transaction count.
    pub fn count(&self) -> usize {
        self.tree.len()
    }

    /// Drop every transaction.
    pub fn truncate(&self) -> Result<(), StorageError> {
        with_retry(|| self.tree.clear())
    }
}
