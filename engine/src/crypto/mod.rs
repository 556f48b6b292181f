//! # Crypto Module — Shard Sealing & Key Splitting
//!
//! Two concerns live here, and only two:
//!
//! - [`encryption`] — AES-256-GCM sealing for the server shard at rest.
//!   The server half of every settlement key is stored as an opaque
//!   sealed blob; the sealing key never leaves process configuration.
//! - [`splitter`] — the additive 2-of-2 key splitter on secp256k1.
//!   A settlement key is born whole, split into a server shard and an
//!   agent shard, and the whole scalar is zeroized before the generate
//!   call returns. It only exists again, briefly, at signing time.
//!
//! Nothing in this module knows about credit, vaults, or transactions.
//! It hashes nothing on its own: the orchestrator decides what bytes get
//! signed, this module just signs them.

pub mod encryption;
pub mod splitter;

pub use encryption::{open, seal, SealError};
pub use splitter::{
    generate, reconstruct, sign, verify_shard, CoSignature, GeneratedKey, KeyShard,
    ReconstructedKey, SplitterError,
};
