//! # Settlement Error Taxonomy
//!
//! Every failure that can leave the orchestrator is one of these kinds.
//! Ledger and crypto errors are wrapped here before a caller sees them;
//! the crypto variants deliberately carry no detail, because raw
//! decryption and signing failures describe key material and do not
//! belong in a response body. Callers get the kind, logs get the rest.

use thiserror::Error;
use uuid::Uuid;

use crate::config::MicroUsd;
use crate::crypto::SplitterError;
use crate::ledger::{CreditError, MerchantError, VaultError};

/// The public failure surface of the settlement engine.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Malformed input, rejected before any ledger or crypto action.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown agent, merchant, recipient agent, or settlement network.
    #[error("not found: {0}")]
    NotFound(String),

    /// The permission-check provider said no. The spend itself reports
    /// this as an `Ok` outcome with status `rejected` (so idempotent
    /// replays stay byte-identical); the error form surfaces when a
    /// caller acts on the transaction afterwards, e.g. submits a shard
    /// for it. No ledger state was touched either way.
    #[error("verdict rejected for transaction {transaction_id}: {}", reasons.join("; "))]
    VerdictRejected {
        transaction_id: Uuid,
        reasons: Vec<String>,
    },

    /// The permission-check provider could not be reached or timed out.
    /// Distinct from a rejection: no verdict exists.
    #[error("permission check unavailable: {0}")]
    VerdictUnavailable(String),

    /// The vault cannot cover the net-amount reservation.
    #[error("insufficient liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity {
        available: MicroUsd,
        requested: MicroUsd,
    },

    /// The agent lacks credit headroom for the gross amount.
    #[error("insufficient credit: available {available}, requested {requested}")]
    InsufficientCredit {
        available: MicroUsd,
        requested: MicroUsd,
    },

    /// A key shard failed validation. No detail on purpose.
    #[error("invalid key shard")]
    InvalidShard,

    /// The sealed server shard could not be opened. No detail on purpose.
    #[error("shard decryption failed")]
    Decryption,

    /// Signature construction failed. No detail on purpose.
    #[error("signing failed")]
    Signing,

    /// The chain provider reported an error or non-confirmation.
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    /// The chain provider neither confirmed nor errored within the
    /// broadcast window.
    #[error("broadcast timed out")]
    BroadcastTimeout,

    /// The operation does not fit the transaction's current state, e.g.
    /// submitting a shard for a transaction that is not awaiting one, or
    /// resuming a reservation that already expired.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl SettlementError {
    /// Machine-readable kind string for the response contract.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::VerdictRejected { .. } => "verdict_rejected",
            Self::VerdictUnavailable(_) => "verdict_unavailable",
            Self::InsufficientLiquidity { .. } => "insufficient_liquidity",
            Self::InsufficientCredit { .. } => "insufficient_credit",
            Self::InvalidShard => "invalid_shard",
            Self::Decryption => "decryption_error",
            Self::Signing => "signing_error",
            Self::Broadcast(_) => "broadcast_error",
            Self::BroadcastTimeout => "broadcast_timeout",
            Self::Conflict(_) => "conflict",
        }
    }
}

impl From<VaultError> for SettlementError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::InsufficientLiquidity {
                available,
                requested,
            } => Self::InsufficientLiquidity {
                available,
                requested,
            },
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<CreditError> for SettlementError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::InsufficientCredit {
                available,
                requested,
                ..
            } => Self::InsufficientCredit {
                available,
                requested,
            },
            CreditError::AgentNotFound(id) => Self::NotFound(format!("agent {id}")),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<SplitterError> for SettlementError {
    fn from(err: SplitterError) -> Self {
        // Collapse crypto detail down to a kind; the reason stays in logs.
        match err {
            SplitterError::InvalidShard => Self::InvalidShard,
            SplitterError::Decryption => Self::Decryption,
            SplitterError::Signing | SplitterError::KeyGen { .. } => Self::Signing,
        }
    }
}

impl From<MerchantError> for SettlementError {
    fn from(err: MerchantError) -> Self {
        match err {
            MerchantError::NotFound(id) => Self::NotFound(format!("merchant {id}")),
            other => Self::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_strings() {
        assert_eq!(SettlementError::InvalidShard.kind(), "invalid_shard");
        assert_eq!(SettlementError::BroadcastTimeout.kind(), "broadcast_timeout");
        assert_eq!(
            SettlementError::Validation("x".into()).kind(),
            "validation_error"
        );
    }

    #[test]
    fn crypto_errors_carry_no_detail() {
        let err: SettlementError = SplitterError::Decryption.into();
        let msg = err.to_string();
        assert_eq!(msg, "shard decryption failed");
        assert!(!msg.contains("aead"), "no cipher internals in messages");
    }

    #[test]
    fn vault_liquidity_error_maps_with_amounts() {
        let err: SettlementError = VaultError::InsufficientLiquidity {
            available: 10,
            requested: 20,
        }
        .into();
        assert_eq!(err.kind(), "insufficient_liquidity");
    }

    #[test]
    fn credit_error_maps_to_taxonomy() {
        let err: SettlementError = CreditError::AgentNotFound(Uuid::nil()).into();
        assert_eq!(err.kind(), "not_found");
    }
}
