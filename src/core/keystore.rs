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

//! Keystore: the node's ECDSA P-256 identity key on disk.
//!
//! - Atomic writes for private key material.
//! - Key-at-rest encryption (optional) via `NAMECHAIN_KEY_PASSPHRASE`.
//! - Best-effort zeroization of sensitive buffers.
//!
//! ### Key encryption format
//! If `NAMECHAIN_KEY_PASSPHRASE` is set, `node.key` is stored as
//! `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG(..)`
//! where the ciphertext is AES-256-GCM over the P-256 PKCS#8 bytes.

use crate::core::crypto::NodeKeypair;
use ring::{
    aead, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::{
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
};
use thiserror::Error;
use zeroize::Zeroize;

const KEY_FILE_MAGIC: &[u8] = b"NAMEKEY1"; // 8 bytes
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;

const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn pbkdf2_iters() -> NonZeroU32 {
    // Optional override via env; clamp to a practical range.
    let iters = std::env::var("NAMECHAIN_PBKDF2_ITERS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT)
        .clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

fn passphrase() -> Option<String> {
    std::env::var("NAMECHAIN_KEY_PASSPHRASE").ok().filter(|v| !v.trim().is_empty())
}

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// File read/write failed.
    #[error("io")]
    Io,
    /// Key bytes did not decode.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Key file is encrypted and no passphrase is set.
    #[error("missing passphrase (set NAMECHAIN_KEY_PASSPHRASE)")]
    MissingPassphrase,
    /// Encryption or decryption failed.
    #[error("crypto")]
    Crypto,
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Atomic write to disk (best-effort fsync, then rename).
fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeystoreError::Io)?;
        f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn derive_aes256gcm_key(pass: &[u8], salt: &[u8; KEY_SALT_LEN]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, pbkdf2_iters(), salt, pass, &mut out);
    out
}

fn encrypt_pkcs8(pass: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let rng = SystemRandom::new();

    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;

    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| KeystoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(pass, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let sealing = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;

    key.zeroize();

    let mut out = Vec::with_capacity(KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len());
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_pkcs8(pass: &[u8], bytes: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    if bytes.len() < KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + 16 {
        return Err(KeystoreError::InvalidKey);
    }

    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[KEY_FILE_MAGIC.len()..KEY_FILE_MAGIC.len() + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(
        &bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN..KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN],
    );
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(pass, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let opening = aead::LessSafeKey::new(unbound);

    let mut in_out = bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec();
    let plain = opening
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;

    let out = plain.to_vec();
    key.zeroize();
    Ok(out)
}

/// The node's signing identity, loaded from `data_dir/node.key`.
pub struct Keystore {
    keypair: NodeKeypair,
}

impl Keystore {
    /// Load an existing key or create and persist a new one.
    pub fn open(data_dir: &str) -> Result<Self, KeystoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("node.key");
        Self::load_or_create(&key_path)
    }

    fn load_or_create(path: &Path) -> Result<Self, KeystoreError> {
        let pass = passphrase();

        if path.exists() {
            let bytes = fs::read(path).map_err(|_| KeystoreError::Io)?;
            let mut pkcs8 = if bytes.starts_with(KEY_FILE_MAGIC) {
                let Some(p) = pass.as_deref() else {
                    return Err(KeystoreError::MissingPassphrase);
                };
                decrypt_pkcs8(p.as_bytes(), &bytes)?
            } else {
                bytes
            };
            let keypair = NodeKeypair::from_pkcs8(&pkcs8).map_err(|_| KeystoreError::InvalidKey)?;
            pkcs8.zeroize();
            return Ok(Self { keypair });
        }

        // Production builds refuse to mint plaintext key material.
        if cfg!(feature = "production") && pass.is_none() {
            return Err(KeystoreError::MissingPassphrase);
        }

        let (keypair, mut pkcs8) = NodeKeypair::generate().map_err(|_| KeystoreError::Crypto)?;
        let on_disk = if let Some(p) = pass.as_deref() {
            encrypt_pkcs8(p.as_bytes(), &pkcs8)?
        } else {
            pkcs8.clone()
        };
        atomic_write_private(path, &on_disk)?;
        pkcs8.zeroize();
        Ok(Self { keypair })
    }

    /// The node public key, base64 SPKI.
    pub fn public_key_b64(&self) -> String {
        self.keypair.public_key_b64()
    }

    /// The underlying keypair, for transaction signing.
    pub fn keypair(&self) -> &NodeKeypair {
        &self.keypair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let ks1 = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        let ks2 = Keystore::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(ks1.public_key_b64(), ks2.public_key_b64());
    }

    #[test]
    fn encrypted_round_trip() {
        let plaintext = b"fake pkcs8 material".to_vec();
        let enc = encrypt_pkcs8(b"hunter2", &plaintext).unwrap();
        assert!(enc.starts_with(KEY_FILE_MAGIC));
        let dec = decrypt_pkcs8(b"hunter2", &enc).unwrap();
        assert_eq!(dec, plaintext);
        assert!(decrypt_pkcs8(b"wrong", &enc).is_err());
    }
}
