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

//! Merkle commitment over transaction hashes.
//!
//! Leaves are the transactions' lowercase-hex hashes in insertion order.
//! Each level pairs adjacent nodes as `sha256(left || right)` over the
//! concatenated UTF-8 hex strings; an odd node is paired with itself.

use crate::core::crypto::sha256_hex;

/// Root of an empty transaction set (the genesis block has no bodies).
pub const EMPTY_ROOT: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Merkle root over transaction hashes in insertion order.
pub fn merkle_root(hashes: &[String]) -> String {
    if hashes.is_empty() {
        return EMPTY_ROOT.to_string();
    }
    let mut level: Vec<String> = hashes.to_vec();
    while level.len() > 1 {
        let mut next: Vec<String> = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0usize;
        while i < level.len() {
            let left = &level[i];
            let right = if i + 1 < level.len() { &level[i + 1] } else { &level[i] };
            next.push(sha256_hex(format!("{left}{right}").as_bytes()));
            i += 2;
        }
        level = next;
    }
    level.into_iter().next().unwrap_or_else(|| EMPTY_ROOT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> String {
        sha256_hex(&[n])
    }

    #[test]
    fn empty_set_has_sentinel_root() {
        assert_eq!(merkle_root(&[]), EMPTY_ROOT);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let h = leaf(1);
        assert_eq!(merkle_root(std::slice::from_ref(&h)), h);
    }

    #[test]
    fn odd_layer_duplicates_last() {
        let a = leaf(1);
        let b = leaf(2);
        let c = leaf(3);
        let ab = sha256_hex(format!("{a}{b}").as_bytes());
        let cc = sha256_hex(format!("{c}{c}").as_bytes());
        let root = sha256_hex(format!("{ab}{cc}").as_bytes());
        assert_eq!(merkle_root(&[a, b, c]), root);
    }

    #[test]
    fn any_leaf_change_moves_the_root() {
        let hashes: Vec<String> = (0..8).map(leaf).collect();
        let root = merkle_root(&hashes);
        for i in 0..hashes.len() {
            let mut tampered = hashes.clone();
            tampered[i] = leaf(99);
            assert_ne!(merkle_root(&tampered), root, "leaf {i} tamper went unnoticed");
        }
    }

    #[test]
    fn order_matters() {
        let a = leaf(1);
        let b = leaf(2);
        assert_ne!(merkle_root(&[a.clone(), b.clone()]), merkle_root(&[b, a]));
    }
}
