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

//! In-process zone read cache keyed by `(name_norm, type)`.
//!
//! Invalidated per-name on every state-machine apply and wholesale on
//! rebuild; correctness never depends on a hit.

use crate::core::types::{normalize_name, DnsRecord, RecordType};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Key = (String, Option<RecordType>);

/// Shared read cache for the DNS front end.
#[derive(Default)]
pub struct DnsCache {
    map: RwLock<HashMap<Key, Arc<Vec<DnsRecord>>>>,
}

impl DnsCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached answer set, if present.
    pub fn get(&self, name: &str, rtype: Option<RecordType>) -> Option<Arc<Vec<DnsRecord>>> {
        let key = (normalize_name(name), rtype);
        self.map.read().unwrap_or_else(|e| e.into_inner()).get(&key).cloned()
    }

    /// Store an answer set (including empty sets, caching NXDOMAIN-shaped lookups).
    pub fn put(&self, name: &str, rtype: Option<RecordType>, records: Vec<DnsRecord>) {
        let key = (normalize_name(name), rtype);
        self.map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::new(records));
    }

    /// Drop every entry for `name`, regardless of type.
    pub fn invalidate_name(&self, name: &str) {
        let norm = normalize_name(name);
        self.map
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(cached, _), _| *cached != norm);
    }

    /// Drop everything (rebuild).
    pub fn clear(&self) {
        self.map.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Entry count.
    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
