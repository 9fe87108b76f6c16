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

//! Deterministic application of committed blocks onto the zone.
//!
//! Ownership and uniqueness conflicts are historical no-ops: the
//! transaction stays in the log but leaves the zone untouched. Identical
//! block logs therefore always yield identical zone listings.

use crate::core::merkle::EMPTY_ROOT;
use crate::core::types::{Block, DnsRecord, Transaction, TxType};
use crate::dns::cache::DnsCache;
use crate::monitoring::metrics::Metrics;
use crate::storage::{BlockStore, StorageError, ZoneStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// State machine errors (storage only; conflicts are no-ops).
pub type StateError = StorageError;

/// The zone writer. Mutations are serialized through this single owner.
pub struct StateMachine {
    zone: ZoneStore,
    cache: Arc<DnsCache>,
    metrics: Arc<Metrics>,
}

impl StateMachine {
    /// Create a state machine over the zone store.
    pub fn new(zone: ZoneStore, cache: Arc<DnsCache>, metrics: Arc<Metrics>) -> Self {
        Self { zone, cache, metrics }
    }

    /// Apply one committed block incrementally.
    pub fn apply(&self, block: &Block) -> Result<(), StateError> {
        for tx in &block.transactions {
            self.apply_tx(tx)?;
        }
        Ok(())
    }

    /// Truncate the zone and re-apply the full block log in timestamp order.
    ///
    /// Pruned blocks (empty bodies under a non-empty merkle root) cannot be
    /// replayed; they are skipped with a warning and the rebuild continues.
    pub fn rebuild(&self, blocks: &BlockStore) -> Result<(), StateError> {
        self.zone.truncate()?;
        self.cache.clear();
        for block in blocks.scan_by_timestamp()? {
            if block.transactions.is_empty() && block.merkle_root != EMPTY_ROOT {
                warn!(hash = %block.hash, "pruned block has no replayable bodies");
                continue;
            }
            self.apply(&block)?;
        }
        Ok(())
    }

    fn apply_tx(&self, tx: &Transaction) -> Result<(), StateError> {
        let Some(records) = tx.payload.records() else {
            // Membership and governance types carry no zone effect.
            return Ok(());
        };
        match tx.tx_type {
            TxType::Register => {
                for record in records {
                    self.register(tx, record)?;
                }
            }
            TxType::UpdateRecords => {
                for record in records {
                    self.update(tx, record)?;
                }
            }
            TxType::DeleteRecords => {
                for record in records {
                    self.delete(tx, record)?;
                }
            }
            TxType::TransferOwnership => {
                for record in records {
                    self.transfer(tx, record)?;
                }
            }
            TxType::Renew => {
                for record in records {
                    self.renew(tx, record)?;
                }
            }
            TxType::Revoke => {
                for record in records {
                    self.revoke(tx, record)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn register(&self, tx: &Transaction, record: &DnsRecord) -> Result<(), StateError> {
        if record.owner != tx.sender {
            return Ok(self.conflict(tx, record, "register owner mismatch"));
        }
        if self.zone.exists(&record.name, record.rtype)? {
            return Ok(self.conflict(tx, record, "name/type already registered"));
        }
        let mut stored = record.clone();
        stored.tx_hash = tx.hash.clone();
        stored.timestamp = tx.timestamp;
        self.zone.add_record(&stored)?;
        self.cache.invalidate_name(&record.name);
        Ok(())
    }

    fn update(&self, tx: &Transaction, record: &DnsRecord) -> Result<(), StateError> {
        let Some(existing) = self.owned_row(tx, record)? else {
            return Ok(());
        };
        let mut stored = record.clone();
        stored.owner = existing.owner;
        stored.tx_hash = tx.hash.clone();
        stored.timestamp = tx.timestamp;
        self.zone.update_record(&stored)?;
        self.cache.invalidate_name(&record.name);
        Ok(())
    }

    fn delete(&self, tx: &Transaction, record: &DnsRecord) -> Result<(), StateError> {
        let Some(existing) = self.owned_row(tx, record)? else {
            return Ok(());
        };
        if self.zone.delete_record(&record.name, record.rtype, &record.rdata)? {
            self.cache.invalidate_name(&record.name);
        } else {
            debug!(name = %existing.name_norm(), "delete rdata mismatch");
            self.metrics.state_conflict_total.inc();
        }
        Ok(())
    }

    fn transfer(&self, tx: &Transaction, record: &DnsRecord) -> Result<(), StateError> {
        let Some(existing) = self.owned_row(tx, record)? else {
            return Ok(());
        };
        let mut stored = existing;
        stored.owner = record.owner.clone();
        stored.tx_hash = tx.hash.clone();
        stored.timestamp = tx.timestamp;
        self.zone.update_record(&stored)?;
        self.cache.invalidate_name(&record.name);
        Ok(())
    }

    fn renew(&self, tx: &Transaction, record: &DnsRecord) -> Result<(), StateError> {
        let Some(existing) = self.owned_row(tx, record)? else {
            return Ok(());
        };
        let mut stored = existing;
        stored.ttl = record.ttl;
        stored.tx_hash = tx.hash.clone();
        stored.timestamp = tx.timestamp;
        self.zone.update_record(&stored)?;
        self.cache.invalidate_name(&record.name);
        Ok(())
    }

    fn revoke(&self, tx: &Transaction, record: &DnsRecord) -> Result<(), StateError> {
        // Remove every row under the name that the sender owns.
        for existing in self.zone.lookup(&record.name, None)? {
            if existing.owner == tx.sender {
                self.zone.delete_record(&existing.name, existing.rtype, &existing.rdata)?;
            } else {
                self.metrics.state_conflict_total.inc();
            }
        }
        self.cache.invalidate_name(&record.name);
        Ok(())
    }

    /// The existing row for `(name, type)` when the sender owns it.
    fn owned_row(&self, tx: &Transaction, record: &DnsRecord) -> Result<Option<DnsRecord>, StateError> {
        let rows = self.zone.lookup(&record.name, Some(record.rtype))?;
        let Some(existing) = rows.into_iter().next() else {
            self.conflict(tx, record, "no such record");
            return Ok(None);
        };
        if existing.owner != tx.sender {
            self.conflict(tx, record, "sender is not the owner");
            return Ok(None);
        }
        Ok(Some(existing))
    }

    fn conflict(&self, tx: &Transaction, record: &DnsRecord, reason: &str) {
        debug!(
            tx = %tx.hash,
            name = %record.name_norm(),
            rtype = %record.rtype,
            reason,
            "state conflict; transaction is a historical no-op"
        );
        self.metrics.state_conflict_total.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::NodeKeypair;
    use crate::core::types::{RecordType, TxPayload};

    struct Fixture {
        _dir: tempfile::TempDir,
        blocks: BlockStore,
        zone: ZoneStore,
        cache: Arc<DnsCache>,
        sm: StateMachine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("ledger")).unwrap();
        let blocks = BlockStore::new(&db).unwrap();
        let zone = ZoneStore::new(&db).unwrap();
        let cache = Arc::new(DnsCache::new());
        let sm = StateMachine::new(
            zone.clone(),
            Arc::clone(&cache),
            Arc::new(Metrics::new().unwrap()),
        );
        Fixture { _dir: dir, blocks, zone, cache, sm }
    }

    fn record(kp: &NodeKeypair, name: &str, rdata: &str) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            rtype: RecordType::A,
            ttl: 300,
            rdata: rdata.to_string(),
            owner: kp.public_key_b64(),
            tx_hash: String::new(),
            timestamp: 0,
        }
    }

    fn tx(kp: &NodeKeypair, tx_type: TxType, records: Vec<DnsRecord>, ts: u64) -> Transaction {
        Transaction::create(kp, tx_type, TxPayload::Records(records), ts).unwrap()
    }

    fn block_of(txs: Vec<Transaction>, prev: &str, ts: u64) -> Block {
        Block::seal(prev.to_string(), txs, ts)
    }

    #[test]
    fn register_then_resolve() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        let b = block_of(
            vec![tx(&alice, TxType::Register, vec![record(&alice, "web.example.com.", "10.0.0.1")], 1000)],
            "0",
            1005,
        );
        f.sm.apply(&b).unwrap();
        let rows = f.zone.lookup("web.example.com.", Some(RecordType::A)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rdata, "10.0.0.1");
        assert_eq!(rows[0].tx_hash, b.transactions[0].hash);
    }

    #[test]
    fn update_by_non_owner_is_a_no_op() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        let (bob, _) = NodeKeypair::generate().unwrap();
        f.sm.apply(&block_of(
            vec![tx(&alice, TxType::Register, vec![record(&alice, "web.example.com.", "10.0.0.1")], 1000)],
            "0",
            1005,
        ))
        .unwrap();
        // Bob claims the name with his own rdata.
        f.sm.apply(&block_of(
            vec![tx(&bob, TxType::UpdateRecords, vec![record(&bob, "web.example.com.", "10.0.0.2")], 1010)],
            "x",
            1015,
        ))
        .unwrap();
        let rows = f.zone.lookup("web.example.com.", Some(RecordType::A)).unwrap();
        assert_eq!(rows[0].rdata, "10.0.0.1");
    }

    #[test]
    fn duplicate_register_is_a_no_op() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        let (bob, _) = NodeKeypair::generate().unwrap();
        f.sm.apply(&block_of(
            vec![
                tx(&alice, TxType::Register, vec![record(&alice, "web.example.com.", "10.0.0.1")], 1000),
                tx(&bob, TxType::Register, vec![record(&bob, "web.example.com.", "10.0.0.9")], 1001),
            ],
            "0",
            1005,
        ))
        .unwrap();
        let rows = f.zone.lookup("web.example.com.", Some(RecordType::A)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rdata, "10.0.0.1");
    }

    #[test]
    fn transfer_moves_ownership() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        let (bob, _) = NodeKeypair::generate().unwrap();
        f.sm.apply(&block_of(
            vec![tx(&alice, TxType::Register, vec![record(&alice, "web.example.com.", "10.0.0.1")], 1000)],
            "0",
            1005,
        ))
        .unwrap();
        f.sm.apply(&block_of(
            vec![tx(&alice, TxType::TransferOwnership, vec![record(&bob, "web.example.com.", "10.0.0.1")], 1010)],
            "x",
            1015,
        ))
        .unwrap();
        // Bob can now update; Alice no longer can.
        f.sm.apply(&block_of(
            vec![
                tx(&alice, TxType::UpdateRecords, vec![record(&alice, "web.example.com.", "10.0.0.3")], 1020),
                tx(&bob, TxType::UpdateRecords, vec![record(&bob, "web.example.com.", "10.0.0.2")], 1021),
            ],
            "y",
            1025,
        ))
        .unwrap();
        let rows = f.zone.lookup("web.example.com.", Some(RecordType::A)).unwrap();
        assert_eq!(rows[0].rdata, "10.0.0.2");
        assert_eq!(rows[0].owner, bob.public_key_b64());
    }

    #[test]
    fn renew_extends_ttl_only() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        f.sm.apply(&block_of(
            vec![tx(&alice, TxType::Register, vec![record(&alice, "web.example.com.", "10.0.0.1")], 1000)],
            "0",
            1005,
        ))
        .unwrap();
        let mut renewal = record(&alice, "web.example.com.", "ignored");
        renewal.ttl = 86_400;
        f.sm.apply(&block_of(vec![tx(&alice, TxType::Renew, vec![renewal], 1010)], "x", 1015))
            .unwrap();
        let rows = f.zone.lookup("web.example.com.", Some(RecordType::A)).unwrap();
        assert_eq!(rows[0].ttl, 86_400);
        assert_eq!(rows[0].rdata, "10.0.0.1");
    }

    #[test]
    fn rebuild_matches_incremental_apply() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        let g = Block::genesis(1000);
        let b1 = Block::seal(
            g.hash.clone(),
            vec![tx(&alice, TxType::Register, vec![record(&alice, "a.example.com.", "10.0.0.1")], 1001)],
            1005,
        );
        let b2 = Block::seal(
            b1.hash.clone(),
            vec![tx(&alice, TxType::UpdateRecords, vec![record(&alice, "a.example.com.", "10.0.0.2")], 1006)],
            1010,
        );
        for b in [&g, &b1, &b2] {
            f.blocks.put(b).unwrap();
            f.sm.apply(b).unwrap();
        }
        let incremental = f.zone.list_all().unwrap();
        f.sm.rebuild(&f.blocks).unwrap();
        assert_eq!(f.zone.list_all().unwrap(), incremental);
        assert!(f.cache.is_empty());
    }

    #[test]
    fn apply_invalidates_cached_names() {
        let f = fixture();
        let (alice, _) = NodeKeypair::generate().unwrap();
        f.cache.put("web.example.com.", Some(RecordType::A), vec![]);
        f.sm.apply(&block_of(
            vec![tx(&alice, TxType::Register, vec![record(&alice, "web.example.com.", "10.0.0.1")], 1000)],
            "0",
            1005,
        ))
        .unwrap();
        assert!(f.cache.get("web.example.com.", Some(RecordType::A)).is_none());
    }
}
