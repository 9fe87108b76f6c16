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

//! SHA-256 hashing and ECDSA P-256 signing with base64 X.509 SPKI key codec.
//!
//! Public keys travel on the wire as `base64(SPKI)`. The SPKI form is the
//! fixed 26-byte DER prefix for an `id-ecPublicKey` / `prime256v1` subject
//! followed by the 65-byte uncompressed curve point.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
    ECDSA_P256_SHA256_FIXED_SIGNING,
};
use thiserror::Error;

/// DER prefix of an X.509 SubjectPublicKeyInfo for an uncompressed P-256 point.
const SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08,
    0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

/// Uncompressed P-256 point length (0x04 tag + X + Y).
const POINT_LEN: usize = 65;

/// Fixed (r || s) ECDSA P-256 signature length.
const SIG_LEN: usize = 64;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("key generation")]
    KeyGen,
    /// Key bytes did not decode.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Signing failed.
    #[error("signing")]
    Sign,
}

/// Lowercase-hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let d = digest::digest(&digest::SHA256, bytes);
    hex::encode(d.as_ref())
}

/// A P-256 keypair usable for transaction signing.
pub struct NodeKeypair {
    keypair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl NodeKeypair {
    /// Generate a fresh keypair, returning it with its PKCS#8 document.
    pub fn generate() -> Result<(Self, Vec<u8>), CryptoError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| CryptoError::KeyGen)?;
        let kp = Self::from_pkcs8(pkcs8.as_ref())?;
        Ok((kp, pkcs8.as_ref().to_vec()))
    }

    /// Parse a keypair from PKCS#8 bytes.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { keypair, rng: SystemRandom::new() })
    }

    /// Public key as `base64(SPKI)`.
    pub fn public_key_b64(&self) -> String {
        encode_public(self.keypair.public_key().as_ref())
    }

    /// Sign `msg`, returning the base64 fixed-form signature.
    pub fn sign_b64(&self, msg: &[u8]) -> Result<String, CryptoError> {
        let sig = self.keypair.sign(&self.rng, msg).map_err(|_| CryptoError::Sign)?;
        Ok(B64.encode(sig.as_ref()))
    }
}

/// Encode an uncompressed P-256 point as `base64(SPKI)`.
pub fn encode_public(point: &[u8]) -> String {
    let mut spki = Vec::with_capacity(SPKI_PREFIX.len() + point.len());
    spki.extend_from_slice(&SPKI_PREFIX);
    spki.extend_from_slice(point);
    B64.encode(&spki)
}

/// Decode a `base64(SPKI)` string back to the uncompressed curve point.
pub fn decode_public(encoded: &str) -> Result<Vec<u8>, CryptoError> {
    let spki = B64.decode(encoded).map_err(|_| CryptoError::InvalidKey)?;
    if spki.len() != SPKI_PREFIX.len() + POINT_LEN || spki[..SPKI_PREFIX.len()] != SPKI_PREFIX {
        return Err(CryptoError::InvalidKey);
    }
    Ok(spki[SPKI_PREFIX.len()..].to_vec())
}

/// Verify a base64 signature over `msg` by the holder of `public_key_b64`.
///
/// Returns `false` on any malformed input; never panics.
pub fn verify(public_key_b64: &str, signature_b64: &str, msg: &[u8]) -> bool {
    let Ok(point) = decode_public(public_key_b64) else {
        return false;
    };
    let Ok(sig) = B64.decode(signature_b64) else {
        return false;
    };
    if sig.len() != SIG_LEN {
        return false;
    }
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &point)
        .verify(msg, &sig)
        .is_ok()
}
