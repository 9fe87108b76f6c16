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

//! Pending transaction pool: insertion-ordered, deduped by hash.
//!
//! Producers are the transport handlers and the local submit API; the
//! consensus slot loop is the only consumer.

use crate::core::types::{unix_now, Transaction};
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;

/// Mempool admission errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MempoolError {
    /// Hash not reproducible or signature invalid.
    #[error("invalid signature")]
    SignatureInvalid,
    /// Timestamp outside the acceptance window.
    #[error("timestamp out of window")]
    TimestampOutOfWindow,
    /// Payload shape does not match the transaction type.
    #[error("malformed payload")]
    MalformedPayload,
}

#[derive(Default)]
struct Inner {
    order: Vec<Transaction>,
    hashes: HashSet<String>,
}

/// Concurrent set of not-yet-committed transactions.
#[derive(Default)]
pub struct Mempool {
    inner: Mutex<Inner>,
}

impl Mempool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and admit a transaction.
    ///
    /// Returns `Ok(false)` for silent duplicate rejection.
    pub fn add(&self, tx: Transaction) -> Result<bool, MempoolError> {
        if !tx.payload_shape_ok() {
            return Err(MempoolError::MalformedPayload);
        }
        if !tx.timestamp_in_window(unix_now()) {
            return Err(MempoolError::TimestampOutOfWindow);
        }
        if !tx.verify() {
            return Err(MempoolError::SignatureInvalid);
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.hashes.insert(tx.hash.clone()) {
            return Ok(false);
        }
        inner.order.push(tx);
        Ok(true)
    }

    /// Empty the pool, returning contents in insertion order.
    pub fn drain(&self) -> Vec<Transaction> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.hashes.clear();
        std::mem::take(&mut inner.order)
    }

    /// Drop the given hashes (transactions committed by a received block).
    pub fn remove_committed(&self, committed: &[String]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Inner { order, hashes } = &mut *inner;
        for hash in committed {
            hashes.remove(hash);
        }
        order.retain(|tx| hashes.contains(&tx.hash));
    }

    /// Pending transaction count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
