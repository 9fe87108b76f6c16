// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use namechain::core::crypto::sha256_hex;
use namechain::core::merkle::merkle_root;
use proptest::prelude::*;

proptest! {
    #[test]
    fn root_is_deterministic(leaves in proptest::collection::vec(any::<[u8; 16]>(), 1..64)) {
        let hashes: Vec<String> = leaves.iter().map(|l| sha256_hex(l)).collect();
        prop_assert_eq!(merkle_root(&hashes), merkle_root(&hashes));
    }

    #[test]
    fn replacing_any_leaf_changes_the_root(
        leaves in proptest::collection::vec(any::<[u8; 16]>(), 1..32),
        index in any::<prop::sample::Index>(),
    ) {
        let hashes: Vec<String> = leaves.iter().map(|l| sha256_hex(l)).collect();
        let root = merkle_root(&hashes);

        let i = index.index(hashes.len());
        let mut tampered = hashes.clone();
        tampered[i] = sha256_hex(b"tampered transaction bytes");
        prop_assume!(tampered[i] != hashes[i]);
        prop_assert_ne!(merkle_root(&tampered), root);
    }

    #[test]
    fn appending_a_leaf_changes_the_root(leaves in proptest::collection::vec(any::<[u8; 16]>(), 1..32)) {
        let hashes: Vec<String> = leaves.iter().map(|l| sha256_hex(l)).collect();
        let root = merkle_root(&hashes);
        let mut extended = hashes.clone();
        extended.push(sha256_hex(b"one more"));
        prop_assert_ne!(merkle_root(&extended), root);
    }
}
