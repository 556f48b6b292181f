//! # AES-256-GCM Shard Sealing
//!
//! Authenticated encryption for server shards at rest. Every agent's
//! server shard is sealed with a server-held 256-bit key before it touches
//! storage, and unsealed only for the microseconds a signature takes.
//!
//! AES-256-GCM because it's an AEAD cipher: confidentiality and integrity
//! in one operation, hardware-accelerated everywhere we deploy. A flipped
//! bit in a stored shard fails authentication instead of producing a
//! silently wrong signing key.
//!
//! ## Nonce discipline
//!
//! GCM is unforgiving about nonce reuse: two messages under the same
//! (key, nonce) pair leak plaintext XOR and forgery capability. We draw a
//! fresh random 96-bit nonce from the OS CSPRNG for every seal. The
//! birthday bound at 96 bits is ~2^48 seals per key; shard sealing happens
//! once per agent plus once per re-encryption, so we are nowhere close.
//!
//! ## Wire format
//!
//! [`seal`] returns `nonce || ciphertext` as one `Vec<u8>`: 12 nonce bytes,
//! then ciphertext with the 16-byte GCM tag appended. [`open`] expects the
//! same layout. Callers store the blob as-is and never manage nonces.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur while sealing or opening a shard blob.
///
/// Deliberately vague. "Wrong key" vs "corrupted blob" is information an
/// attacker does not get to have; callers only need to know the shard is
/// unusable.
#[derive(Debug, Error)]
pub enum SealError {
    #[error("sealing failed")]
    SealFailed,

    #[error("unsealing failed: wrong key or corrupted blob")]
    OpenFailed,

    #[error("invalid sealing key length: expected {AES_KEY_LENGTH} bytes")]
    InvalidKeyLength,

    #[error("sealed blob too short: must be at least {AES_NONCE_LENGTH} bytes")]
    BlobTooShort,
}

/// Seal plaintext under a 256-bit key with a fresh random nonce.
///
/// Returns `nonce || ciphertext`. The ciphertext includes the GCM
/// authentication tag, so the output is `12 + len + 16` bytes.
pub fn seal(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SealError::SealFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| SealError::SealFailed)?;

    let mut blob = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a blob previously produced by [`seal`].
///
/// Fails with [`SealError::OpenFailed`] on a wrong key or any modification
/// of the blob, with no further detail. On purpose.
pub fn open(key: &[u8; AES_KEY_LENGTH], blob: &[u8]) -> Result<Vec<u8>, SealError> {
    if blob.len() < AES_NONCE_LENGTH {
        return Err(SealError::BlobTooShort);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SealError::OpenFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SealError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_key();
        let shard = [0x5Au8; 32];
        let blob = seal(&key, &shard).unwrap();
        let recovered = open(&key, &blob).unwrap();
        assert_eq!(recovered, shard);
    }

    #[test]
    fn wrong_key_fails_open() {
        let key = test_key();
        let blob = seal(&key, b"server shard bytes").unwrap();

        let mut wrong_key = test_key();
        wrong_key[0] ^= 0xFF;
        assert!(open(&wrong_key, &blob).is_err());
    }

    #[test]
    fn tampered_blob_fails_open() {
        let key = test_key();
        let mut blob = seal(&key, b"server shard bytes").unwrap();
        blob[AES_NONCE_LENGTH] ^= 0x01;
        assert!(open(&key, &blob).is_err());
    }

    #[test]
    fn nonces_are_unique_per_seal() {
        // Same key, same plaintext, different nonce. If this fails, the
        // OS RNG is broken and sealing is the least of our problems.
        let key = test_key();
        let a = seal(&key, b"shard").unwrap();
        let b = seal(&key, b"shard").unwrap();
        assert_ne!(&a[..AES_NONCE_LENGTH], &b[..AES_NONCE_LENGTH]);
    }

    #[test]
    fn blob_length_is_nonce_plus_ciphertext_plus_tag() {
        let key = test_key();
        let blob = seal(&key, &[0u8; 32]).unwrap();
        assert_eq!(blob.len(), AES_NONCE_LENGTH + 32 + 16);
    }

    #[test]
    fn short_blob_rejected() {
        let key = test_key();
        assert!(matches!(
            open(&key, &[0u8; 4]),
            Err(SealError::BlobTooShort)
        ));
    }
}
