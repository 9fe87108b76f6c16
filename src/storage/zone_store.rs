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

//! Live DNS zone store.
//!
//! Keyed by `name_norm || 0x00 || qtype_be`, which keeps at most one row per
//! `(name, type)` and makes any-type lookups a prefix scan.

use crate::core::types::{decode_row_limited, encode_row, normalize_name, DnsRecord, RecordType};
use crate::storage::{with_retry, StorageError, MAX_ROW_BYTES};

/// CRUD store for the derived zone.
#[derive(Clone)]
pub struct ZoneStore {
    tree: sled::Tree,
}

fn zone_key(name: &str, rtype: RecordType) -> Vec<u8> {
    let norm = normalize_name(name);
    let mut key = Vec::with_capacity(norm.len() + 3);
    key.extend_from_slice(norm.as_bytes());
    key.push(0);
    key.extend_from_slice(&rtype.qtype().to_be_bytes());
    key
}

fn name_prefix(name: &str) -> Vec<u8> {
    let norm = normalize_name(name);
    let mut key = Vec::with_capacity(norm.len() + 1);
    key.extend_from_slice(norm.as_bytes());
    key.push(0);
    key
}

impl ZoneStore {
    pub(crate) fn new(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("zone").map_err(|_| StorageError::Open)?;
        Ok(Self { tree })
    }

    fn decode(row: &[u8]) -> Result<DnsRecord, StorageError> {
        decode_row_limited(row, MAX_ROW_BYTES).map_err(|_| StorageError::Corrupt)
    }

    /// Insert-or-ignore by `(name_norm, type)`. Returns whether inserted.
    pub fn add_record(&self, record: &DnsRecord) -> Result<bool, StorageError> {
        let key = zone_key(&record.name, record.rtype);
        if self.tree.contains_key(&key).map_err(|_| StorageError::Io)? {
            return Ok(false);
        }
        let row = encode_row(record).map_err(|_| StorageError::Corrupt)?;
        with_retry(|| self.tree.insert(key.as_slice(), row.as_slice()))?;
        Ok(true)
    }

    /// Replace the fields of an existing `(name_norm, type)` row.
    ///
    /// Returns `false` when no such row exists.
    pub fn update_record(&self, record: &DnsRecord) -> Result<bool, StorageError> {
        let key = zone_key(&record.name, record.rtype);
        if !self.tree.contains_key(&key).map_err(|_| StorageError::Io)? {
            return Ok(false);
        }
        let row = encode_row(record).map_err(|_| StorageError::Corrupt)?;
        with_retry(|| self.tree.insert(key.as_slice(), row.as_slice()))?;
        Ok(true)
    }

    /// Remove the row matching `(name_norm, type, rdata)`.
    pub fn delete_record(&self, name: &str, rtype: RecordType, rdata: &str) -> Result<bool, StorageError> {
        let key = zone_key(name, rtype);
        let Some(row) = self.tree.get(&key).map_err(|_| StorageError::Io)? else {
            return Ok(false);
        };
        if Self::decode(&row)?.rdata != rdata {
            return Ok(false);
        }
        with_retry(|| self.tree.remove(key.as_slice()))?;
        Ok(true)
    }

    /// Records for `name`; `rtype = None` means any type.
    pub fn lookup(&self, name: &str, rtype: Option<RecordType>) -> Result<Vec<DnsRecord>, StorageError> {
        match rtype {
            Some(rt) => {
                let Some(row) = self.tree.get(zone_key(name, rt)).map_err(|_| StorageError::Io)? else {
                    return Ok(Vec::new());
                };
                Ok(vec![Self::decode(&row)?])
            }
            None => {
                let mut out = Vec::new();
                for item in self.tree.scan_prefix(name_prefix(name)) {
                    let (_, row) = item.map_err(|_| StorageError::Io)?;
                    out.push(Self::decode(&row)?);
                }
                Ok(out)
            }
        }
    }

    /// Records whose RDATA equals `target`, plus PTR rows named by it.
    pub fn reverse_lookup(&self, target: &str) -> Result<Vec<DnsRecord>, StorageError> {
        let ptr_name = normalize_name(target);
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, row) = item.map_err(|_| StorageError::Io)?;
            let record = Self::decode(&row)?;
            if record.rdata == target || (record.rtype == RecordType::Ptr && record.name_norm() == ptr_name)
            {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Every record, sorted by `(name_norm, type, rdata)`.
    pub fn list_all(&self) -> Result<Vec<DnsRecord>, StorageError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_, row) = item.map_err(|_| StorageError::Io)?;
            out.push(Self::decode(&row)?);
        }
        out.sort_by(|a, b| {
            (a.name_norm(), a.rtype, a.rdata.clone()).cmp(&(b.name_norm(), b.rtype, b.rdata.clone()))
        });
        Ok(out)
    }

    /// True when a `(name_norm, type)` row exists.
    pub fn exists(&self, name: &str, rtype: RecordType) -> Result<bool, StorageError> {
        self.tree.contains_key(zone_key(name, rtype)).map_err(|_| StorageError::Io)
    }

    /// Drop the whole zone (rebuild only).
    pub fn truncate(&self) -> Result<(), StorageError> {
        with_retry(|| self.tree.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ZoneStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("ledger")).unwrap();
        let zone = ZoneStore::new(&db).unwrap();
        (dir, zone)
    }

    fn record(name: &str, rtype: RecordType, rdata: &str) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            rtype,
            ttl: 300,
            rdata: rdata.to_string(),
            owner: "pk-a".to_string(),
            tx_hash: String::new(),
            timestamp: 0,
        }
    }

    #[test]
    fn add_is_unique_per_name_and_type() {
        let (_dir, zone) = store();
        assert!(zone.add_record(&record("web.example.com.", RecordType::A, "10.0.0.1")).unwrap());
        // Same key, different case: still one row.
        assert!(!zone.add_record(&record("WEB.example.com.", RecordType::A, "10.0.0.2")).unwrap());
        assert_eq!(zone.lookup("web.example.com.", Some(RecordType::A)).unwrap().len(), 1);
        // A different type under the same name is a separate row.
        assert!(zone.add_record(&record("web.example.com.", RecordType::Txt, "v=1")).unwrap());
        assert_eq!(zone.lookup("web.example.com.", None).unwrap().len(), 2);
    }

    #[test]
    fn update_requires_existing_row() {
        let (_dir, zone) = store();
        let rec = record("web.example.com.", RecordType::A, "10.0.0.1");
        assert!(!zone.update_record(&rec).unwrap());
        zone.add_record(&rec).unwrap();
        let mut updated = rec.clone();
        updated.rdata = "10.0.0.2".to_string();
        assert!(zone.update_record(&updated).unwrap());
        assert_eq!(
            zone.lookup("web.example.com.", Some(RecordType::A)).unwrap()[0].rdata,
            "10.0.0.2"
        );
    }

    #[test]
    fn delete_matches_rdata() {
        let (_dir, zone) = store();
        zone.add_record(&record("web.example.com.", RecordType::A, "10.0.0.1")).unwrap();
        assert!(!zone.delete_record("web.example.com.", RecordType::A, "10.9.9.9").unwrap());
        assert!(zone.delete_record("web.example.com.", RecordType::A, "10.0.0.1").unwrap());
        assert!(!zone.exists("web.example.com.", RecordType::A).unwrap());
    }

    #[test]
    fn reverse_lookup_finds_rdata_and_ptr() {
        let (_dir, zone) = store();
        zone.add_record(&record("web.example.com.", RecordType::A, "10.0.0.1")).unwrap();
        zone.add_record(&record("1.0.0.10.in-addr.arpa.", RecordType::Ptr, "web.example.com.")).unwrap();
        assert_eq!(zone.reverse_lookup("10.0.0.1").unwrap().len(), 1);
        assert_eq!(zone.reverse_lookup("1.0.0.10.in-addr.arpa.").unwrap().len(), 1);
    }

    #[test]
    fn list_all_is_sorted() {
        let (_dir, zone) = store();
        zone.add_record(&record("b.example.com.", RecordType::A, "10.0.0.2")).unwrap();
        zone.add_record(&record("a.example.com.", RecordType::A, "10.0.0.1")).unwrap();
        let names: Vec<String> = zone.list_all().unwrap().iter().map(|r| r.name_norm()).collect();
        assert_eq!(names, vec!["a.example.com.", "b.example.com."]);
    }
}
