// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use super::{decrypt, encrypt, is_encrypted, FORMAT_VERSION, MAGIC};

fn test_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = i as u8;
    }
    key
}

#[test]
fn round_trip() -> anyhow::Result<()> {
    let key = test_key();
    let blob = encrypt(&key, b"{\"serverUrl\":\"http://h/\"}")?;
    assert!(is_encrypted(&blob));
    let plain = decrypt(&key, &blob)?;
    assert_eq!(plain, b"{\"serverUrl\":\"http://h/\"}");
    Ok(())
}

#[test]
fn header_layout() -> anyhow::Result<()> {
    let blob = encrypt(&test_key(), b"x")?;
    assert_eq!(&blob[..4], MAGIC);
    assert_eq!(blob[4], FORMAT_VERSION);
    // 4 magic + 1 version + 12 nonce + 1 byte ciphertext + 16 tag
    assert_eq!(blob.len(), 34);
    Ok(())
}

#[test]
fn nonce_is_fresh_per_save() -> anyhow::Result<()> {
    let key = test_key();
    let a = encrypt(&key, b"same")?;
    let b = encrypt(&key, b"same")?;
    assert_ne!(a[5..17], b[5..17], "nonce must differ between saves");
    assert_ne!(a[17..], b[17..], "ciphertext must differ between saves");
    Ok(())
}

#[test]
fn wrong_key_fails_with_reenroll_guidance() -> anyhow::Result<()> {
    let blob = encrypt(&test_key(), b"secret")?;
    let mut other = test_key();
    other[0] ^= 0xff;
    let err = match decrypt(&other, &blob) {
        Err(e) => e,
        Ok(_) => anyhow::bail!("decrypt succeeded under the wrong key"),
    };
    assert!(err.to_string().contains("re-enroll"), "unexpected error: {err}");
    Ok(())
}

#[test]
fn tampered_ciphertext_rejected() -> anyhow::Result<()> {
    let key = test_key();
    let mut blob = encrypt(&key, b"payload")?;
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    assert!(decrypt(&key, &blob).is_err());
    Ok(())
}

#[test]
fn plaintext_is_not_encrypted() {
    assert!(!is_encrypted(b"{\"serverUrl\":\"http://h/\"}"));
    assert!(!is_encrypted(b""));
    assert!(!is_encrypted(b"SNT"));
}

#[test]
fn truncated_blob_rejected() {
    let key = test_key();
    assert!(decrypt(&key, b"SNTL\x01short").is_err());
}

#[test]
fn unknown_version_rejected() -> anyhow::Result<()> {
    let key = test_key();
    let mut blob = encrypt(&key, b"v")?;
    blob[4] = 9;
    let err = match decrypt(&key, &blob) {
        Err(e) => e,
        Ok(_) => anyhow::bail!("decrypt accepted unknown version"),
    };
    assert!(err.to_string().contains("version"), "unexpected error: {err}");
    Ok(())
}

proptest! {
    // decrypt(encrypt(x)) == x for arbitrary non-empty byte strings, and
    // every encrypted blob carries the magic.
    #[test]
    fn round_trip_arbitrary(data in proptest::collection::vec(any::<u8>(), 1..4096)) {
        let key = test_key();
        let blob = encrypt(&key, &data).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!(is_encrypted(&blob));
        let plain = decrypt(&key, &blob).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(plain, data);
    }
}
