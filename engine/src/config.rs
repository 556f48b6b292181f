//! # Engine Configuration & Constants
//!
//! Every magic number in PAYLINE lives here. If you're hardcoding a
//! constant somewhere else, you're doing it wrong and you owe the team
//! coffee.
//!
//! Most of these values are load-bearing for ledger arithmetic: the
//! fixed-point scale decides what "one dollar" means everywhere, and the
//! bps denominator decides what "1.5%" means. Change them and every stored
//! balance changes meaning with them.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Fixed-Point Money
// ---------------------------------------------------------------------------

/// All USD amounts in the engine are `u64` micro-USD: 6-decimal fixed
/// point. $1.00 == 1_000_000. Integer math only on ledger paths.
pub type MicroUsd = u64;

/// Vault ownership is tracked in micro-shares, same 6-decimal scale as
/// money so that an empty-vault deposit mints shares 1:1.
pub type MicroShares = u64;

/// One whole US dollar in micro-USD.
pub const MICRO_USD_SCALE: u64 = 1_000_000;

/// One whole vault share in micro-shares.
pub const MICRO_SHARE_SCALE: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Fees & Credit
// ---------------------------------------------------------------------------

/// Basis-point denominator. 1 bp = 0.01%, so 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Fee rate applied when the spend names no merchant (agent-to-agent
/// transfers, or merchants without a negotiated rate). 100 bps = 1%.
pub const DEFAULT_FEE_BPS: u32 = 100;

/// Upper bound on any merchant fee rate. 1_000 bps = 10%. A registry
/// entry above this is a data-entry error, not a business model.
pub const MAX_FEE_BPS: u32 = 1_000;

/// System-wide ceiling on a single agent's credit limit: $1,000,000.
/// `CreditLedger::adjust_limit` rejects anything above this.
pub const MAX_CREDIT_LIMIT: MicroUsd = 1_000_000 * MICRO_USD_SCALE;

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Rounding slack allowed when a lender burns "all" their shares:
/// 1e-3 of a share. Integer share math keeps real dust below this; a
/// request further over a lender's holdings than this is a real
/// over-withdrawal and gets rejected.
pub const SHARE_DUST_TOLERANCE: MicroShares = 1_000;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Curve for co-signed settlement keys. secp256k1, because the settlement
/// networks we broadcast to are EVM-shaped and want recoverable ECDSA.
pub const SIGNING_CURVE: &str = "secp256k1";

/// AES-256-GCM for sealing the server shard at rest.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits, the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// secp256k1 scalar length in bytes. Shards and reconstructed keys are
/// exactly this long.
pub const SCALAR_LENGTH: usize = 32;

/// How many times key generation re-draws before giving up when the
/// additive split fails its self-check. In practice the first draw
/// succeeds; the retry loop exists so an arithmetic bug surfaces as an
/// error instead of a bad key.
pub const KEYGEN_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// How long the orchestrator waits on the permission-check provider
/// before treating the verdict call as failed.
pub const VERDICT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the orchestrator waits for a broadcast to confirm. A chain
/// provider that neither confirms nor errors inside this window is a
/// failed settlement and triggers a full rollback; we do not hold
/// reserved liquidity hostage to a stuck RPC node.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a spend may sit in `Signing` waiting for the agent's shard
/// while its liquidity reservation and credit debit stay live. Past this,
/// the reservation expires and the transaction rolls back.
pub const SIGNING_RESERVATION_TTL: Duration = Duration::from_secs(15 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_are_consistent() {
        // Money and shares share a scale so empty-vault deposits mint 1:1.
        assert_eq!(MICRO_USD_SCALE, MICRO_SHARE_SCALE);
    }

    #[test]
    fn dust_tolerance_is_a_thousandth_of_a_share() {
        assert_eq!(SHARE_DUST_TOLERANCE * 1_000, MICRO_SHARE_SCALE);
    }

    #[test]
    fn default_fee_below_ceiling() {
        assert!(DEFAULT_FEE_BPS <= MAX_FEE_BPS);
    }
}
