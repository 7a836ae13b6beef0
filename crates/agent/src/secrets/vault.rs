// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config-at-rest encryption.
//!
//! On-disk layout: `[4-byte magic "SNTL"][1-byte version][12-byte nonce]
//! [ciphertext || 16-byte GCM tag]`. The magic distinguishes encrypted
//! files from legacy plaintext; the version byte reserves room for a
//! future algorithm change.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;

use super::machine::MachineKey;

/// File magic identifying an encrypted blob.
pub const MAGIC: &[u8; 4] = b"SNTL";
/// Current on-disk format version.
pub const FORMAT_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = MAGIC.len() + 1 + NONCE_LEN;

/// True if `data` starts with the encrypted-file magic.
pub fn is_encrypted(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC
}

/// Encrypt `plaintext` under the machine key with a fresh random nonce.
pub fn encrypt(key: &MachineKey, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| anyhow::anyhow!("AES-GCM seal failed"))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// A failure here on a previously working install almost always means the
/// machine identity changed (hardware swap, VM clone, hostname reset);
/// the error text states the only recovery path.
pub fn decrypt(key: &MachineKey, data: &[u8]) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(is_encrypted(data), "not an encrypted blob (missing magic)");
    anyhow::ensure!(
        data.len() >= HEADER_LEN + TAG_LEN,
        "encrypted blob truncated ({} bytes)",
        data.len()
    );

    let version = data[MAGIC.len()];
    anyhow::ensure!(
        version == FORMAT_VERSION,
        "unsupported encrypted format version {version}"
    );

    let nonce = Nonce::from_slice(&data[MAGIC.len() + 1..HEADER_LEN]);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher.decrypt(nonce, &data[HEADER_LEN..]).map_err(|_| {
        anyhow::anyhow!(
            "config decryption failed: the machine identity has changed \
             (hardware swap or clone); delete the config file and re-enroll"
        )
    })
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
