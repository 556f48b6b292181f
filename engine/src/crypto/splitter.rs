//! # Additive 2-of-2 Key Splitting on secp256k1
//!
//! Every agent's settlement key is split at birth into two additive
//! shards over the secp256k1 curve order `n`:
//!
//! ```text
//!     k = (server_shard + agent_shard) mod n
//! ```
//!
//! The server shard is sealed (AES-256-GCM) and persisted; the agent
//! shard goes back to the agent at issuance and is never stored on our
//! side. The full scalar `k` exists exactly twice: once during
//! generation, once during each signature, and it is zeroized both times.
//! There is no third copy, and there is no code path that writes it
//! anywhere.
//!
//! This is deliberately NOT a general threshold-signature protocol. No
//! rounds, no commitments, no dealer. Both shards meet in one process at
//! signing time. What the split buys is at-rest compartmentalization: a
//! database dump alone cannot sign, and a stolen agent shard alone
//! cannot sign either.
//!
//! Signatures are recoverable ECDSA with low-S normalization, because the
//! settlement networks we broadcast to are EVM-shaped and reject
//! malleable encodings.
//!
//! Note on side channels: shard reconstruction uses the curve library's
//! scalar arithmetic, which is constant-time in k256; the hex
//! encode/decode around it is not. Treat shard hex strings as secrets in
//! transit.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{NonZeroScalar, PublicKey, Scalar, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{AES_KEY_LENGTH, KEYGEN_MAX_ATTEMPTS, SCALAR_LENGTH};
use crate::crypto::encryption::{self, SealError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from key generation, reconstruction, and signing.
///
/// Variants are coarse on purpose: the distinction between "wrong sealing
/// key" and "bit-flipped blob" stays inside the process.
#[derive(Debug, Error)]
pub enum SplitterError {
    /// Key generation could not produce a split that passes its own
    /// reconstruction check. This indicates an arithmetic bug, not bad
    /// luck; we retry a bounded number of times and then refuse to hand
    /// out a key we cannot vouch for.
    #[error("key generation failed self-verification after {attempts} attempts")]
    KeyGen { attempts: u32 },

    /// A shard is not a valid non-zero scalar in `[1, n-1]`, or the two
    /// shards do not combine into one.
    #[error("invalid key shard")]
    InvalidShard,

    /// The sealed server shard could not be opened.
    #[error("server shard decryption failed")]
    Decryption,

    /// The underlying signature operation failed.
    #[error("signing failed")]
    Signing,
}

impl From<SealError> for SplitterError {
    fn from(_: SealError) -> Self {
        SplitterError::Decryption
    }
}

// ---------------------------------------------------------------------------
// KeyShard
// ---------------------------------------------------------------------------

/// One additive component of a settlement signing key.
///
/// 32 bytes, zeroized on drop. Intentionally does NOT implement
/// `Serialize`: moving a shard across a boundary is a deliberate act, done
/// through [`to_hex`](Self::to_hex) at the API edge, not something that
/// happens because a struct containing one got logged as JSON.
#[derive(Clone)]
pub struct KeyShard {
    bytes: Zeroizing<[u8; SCALAR_LENGTH]>,
}

impl KeyShard {
    /// Wrap raw scalar bytes. No range validation here; that happens at
    /// reconstruction time where there is an error channel.
    pub fn from_bytes(bytes: [u8; SCALAR_LENGTH]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Parse a hex-encoded shard (64 hex characters).
    pub fn from_hex(s: &str) -> Result<Self, SplitterError> {
        let decoded = hex::decode(s).map_err(|_| SplitterError::InvalidShard)?;
        let arr: [u8; SCALAR_LENGTH] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| SplitterError::InvalidShard)?;
        Ok(Self::from_bytes(arr))
    }

    /// Hex-encode the shard for transport to the agent. The returned
    /// string is secret material; the caller owns its lifecycle.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes.as_ref())
    }

    /// Interpret the shard as a non-zero scalar in `[1, n-1]`.
    fn to_scalar(&self) -> Result<NonZeroScalar, SplitterError> {
        let maybe: Option<Scalar> = Scalar::from_repr((*self.bytes).into()).into();
        let scalar = maybe.ok_or(SplitterError::InvalidShard)?;
        let nonzero: Option<NonZeroScalar> = NonZeroScalar::new(scalar).into();
        nonzero.ok_or(SplitterError::InvalidShard)
    }
}

impl fmt::Debug for KeyShard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shards never appear in logs, not even partially.
        write!(f, "KeyShard(redacted)")
    }
}

// ---------------------------------------------------------------------------
// GeneratedKey
// ---------------------------------------------------------------------------

/// Output of [`generate`]: everything the caller needs to provision an
/// agent wallet.
///
/// `agent_shard` is handed to the agent once and forgotten server-side;
/// `encrypted_server_shard` is what gets persisted.
pub struct GeneratedKey {
    /// SEC1 compressed public key, hex-encoded (66 characters).
    pub public_key: String,

    /// Settlement-network address: `0x` + last 20 bytes of the Keccak-256
    /// hash of the uncompressed public key (sans the 0x04 prefix byte).
    pub address: String,

    /// Server shard sealed under the engine's encryption key
    /// (`nonce || ciphertext` blob).
    pub encrypted_server_shard: Vec<u8>,

    /// The agent's shard. Returned exactly once, never persisted here.
    pub agent_shard: KeyShard,
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GeneratedKey(pub={}, address={})",
            self.public_key, self.address
        )
    }
}

// ---------------------------------------------------------------------------
// CoSignature
// ---------------------------------------------------------------------------

/// A recoverable ECDSA signature over a 32-byte digest.
///
/// `s` is always in low-S (canonical) form and `recovery_id` matches the
/// normalized signature, so the tuple is directly usable on networks that
/// reject malleable encodings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoSignature {
    /// The `r` component, 32 big-endian bytes.
    pub r: [u8; 32],
    /// The `s` component, 32 big-endian bytes, low-S normalized.
    pub s: [u8; 32],
    /// Recovery parameter (0-3, in practice 0 or 1).
    pub recovery_id: u8,
}

impl CoSignature {
    /// The 65-byte `r || s || v` wire form used by EVM-style networks.
    pub fn to_rsv_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id;
        out
    }

    /// Hex-encoded `r || s || v`.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_rsv_bytes())
    }
}

impl fmt::Debug for CoSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        write!(f, "CoSignature({}..., v={})", &hex_str[..8], self.recovery_id)
    }
}

// ---------------------------------------------------------------------------
// ReconstructedKey
// ---------------------------------------------------------------------------

/// A fully reconstructed signing key, alive for the duration of one
/// settlement only.
///
/// The orchestrator builds one of these right before broadcast, signs the
/// canonical digest, hands it to the chain provider, and drops it. The
/// inner `SigningKey` zeroizes its scalar on drop, so every exit path
/// (including early `?` returns) clears the key material.
pub struct ReconstructedKey {
    signing: SigningKey,
}

impl ReconstructedKey {
    /// Sign a 32-byte message digest. The digest's semantics are entirely
    /// the caller's business; no hashing happens here.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<CoSignature, SplitterError> {
        let (sig, recid) = self
            .signing
            .sign_prehash_recoverable(digest)
            .map_err(|_| SplitterError::Signing)?;
        let (sig, recid) = normalize(sig, recid);

        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(CoSignature {
            r,
            s,
            recovery_id: recid.to_byte(),
        })
    }

    /// SEC1 compressed public key, hex-encoded.
    pub fn public_key_hex(&self) -> String {
        let point = self.signing.verifying_key().to_encoded_point(true);
        hex::encode(point.as_bytes())
    }

    /// Settlement-network address for this key.
    pub fn address(&self) -> String {
        derive_address(self.signing.verifying_key())
    }
}

impl fmt::Debug for ReconstructedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReconstructedKey(pub={})", self.public_key_hex())
    }
}

/// Force low-S form. `sign_prehash_recoverable` already normalizes in
/// current k256, but the recovery id must stay in lockstep with `s`, so
/// we keep the flip logic here rather than trusting a library default
/// that has changed across versions.
fn normalize(sig: Signature, recid: RecoveryId) -> (Signature, RecoveryId) {
    match sig.normalize_s() {
        Some(low_s) => {
            let flipped = RecoveryId::from_byte(recid.to_byte() ^ 1).unwrap_or(recid);
            (low_s, flipped)
        }
        None => (sig, recid),
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Generate a fresh settlement key and split it into two additive shards.
///
/// Draws the full scalar `k` and the server shard independently and
/// uniformly from `[1, n-1]` via the OS CSPRNG, computes
/// `agent_shard = k - server_shard (mod n)`, and verifies the split
/// recombines to `k` before anything leaves this function. `k`'s backing
/// bytes are zeroized on every path out.
///
/// # Errors
///
/// [`SplitterError::KeyGen`] if the self-check fails on every attempt
/// (which means an arithmetic bug, not randomness). Sealing failures
/// surface as [`SplitterError::Decryption`] only in the pathological case
/// of a broken cipher construction.
pub fn generate(encryption_key: &[u8; AES_KEY_LENGTH]) -> Result<GeneratedKey, SplitterError> {
    for _ in 0..KEYGEN_MAX_ATTEMPTS {
        let full = NonZeroScalar::random(&mut OsRng);
        let server = NonZeroScalar::random(&mut OsRng);

        // agent = k - server (mod n). A zero difference would mean the two
        // independent draws collided; re-draw in that case.
        let agent_scalar = full.as_ref() - server.as_ref();
        let agent: Option<NonZeroScalar> = NonZeroScalar::new(agent_scalar).into();
        let Some(agent) = agent else { continue };

        // Self-check: the shards must recombine to exactly k.
        let recombined = server.as_ref() + agent.as_ref();
        if recombined != *full.as_ref() {
            continue;
        }

        let public = PublicKey::from_secret_scalar(&full);
        let verifying = VerifyingKey::from(&public);
        let address = derive_address(&verifying);
        let public_key = hex::encode(public.to_encoded_point(true).as_bytes());

        let mut server_bytes: [u8; SCALAR_LENGTH] = server.to_bytes().into();
        let mut agent_bytes: [u8; SCALAR_LENGTH] = agent.to_bytes().into();
        let mut full_bytes: [u8; SCALAR_LENGTH] = full.to_bytes().into();

        let sealed = encryption::seal(encryption_key, &server_bytes);

        // The full scalar's serialized form dies here, success or not.
        full_bytes.zeroize();
        server_bytes.zeroize();

        let encrypted_server_shard = match sealed {
            Ok(blob) => blob,
            Err(_) => {
                agent_bytes.zeroize();
                return Err(SplitterError::Decryption);
            }
        };

        let agent_shard = KeyShard::from_bytes(agent_bytes);
        agent_bytes.zeroize();

        return Ok(GeneratedKey {
            public_key,
            address,
            encrypted_server_shard,
            agent_shard,
        });
    }

    Err(SplitterError::KeyGen {
        attempts: KEYGEN_MAX_ATTEMPTS,
    })
}

/// Reconstruct the full signing key from the sealed server shard and the
/// agent's shard.
///
/// Both shards are validated to lie in `[1, n-1]`; the sum is likewise
/// required to be non-zero. The returned [`ReconstructedKey`] owns the
/// only copy of the scalar and zeroizes it on drop.
pub fn reconstruct(
    encrypted_server_shard: &[u8],
    encryption_key: &[u8; AES_KEY_LENGTH],
    agent_shard: &KeyShard,
) -> Result<ReconstructedKey, SplitterError> {
    let server_plain = Zeroizing::new(encryption::open(encryption_key, encrypted_server_shard)?);
    let server_arr: [u8; SCALAR_LENGTH] = server_plain
        .as_slice()
        .try_into()
        .map_err(|_| SplitterError::InvalidShard)?;
    let server = KeyShard::from_bytes(server_arr).to_scalar()?;
    let agent = agent_shard.to_scalar()?;

    let full = server.as_ref() + agent.as_ref();
    let full_nz: Option<NonZeroScalar> = NonZeroScalar::new(full).into();
    let full_nz = full_nz.ok_or(SplitterError::InvalidShard)?;

    // SecretKey and SigningKey both zeroize on drop, so the scalar never
    // survives in a dead allocation.
    let signing = SigningKey::from(SecretKey::from(full_nz));

    Ok(ReconstructedKey { signing })
}

/// Reconstruct, sign one digest, and discard the key. Convenience wrapper
/// around [`reconstruct`] + [`ReconstructedKey::sign_digest`] for callers
/// that do not need to hold signing authority across a broadcast.
pub fn sign(
    message_hash: &[u8; 32],
    encrypted_server_shard: &[u8],
    encryption_key: &[u8; AES_KEY_LENGTH],
    agent_shard: &KeyShard,
) -> Result<CoSignature, SplitterError> {
    let key = reconstruct(encrypted_server_shard, encryption_key, agent_shard)?;
    key.sign_digest(message_hash)
}

/// Check whether an agent shard still pairs with a stored server shard.
///
/// Reconstructs the key and compares the derived public key to
/// `expected_public_key` (hex, SEC1 compressed). Returns `false` on any
/// internal failure; this is a probe, not an operation, and it never
/// errors.
pub fn verify_shard(
    agent_shard: &KeyShard,
    encrypted_server_shard: &[u8],
    encryption_key: &[u8; AES_KEY_LENGTH],
    expected_public_key: &str,
) -> bool {
    match reconstruct(encrypted_server_shard, encryption_key, agent_shard) {
        Ok(key) => key.public_key_hex().eq_ignore_ascii_case(expected_public_key),
        Err(_) => false,
    }
}

/// Derive the settlement-network address from a public key: Keccak-256
/// over the uncompressed SEC1 encoding minus its 0x04 prefix, keeping the
/// last 20 bytes.
pub fn derive_address(verifying_key: &VerifyingKey) -> String {
    let point = verifying_key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
