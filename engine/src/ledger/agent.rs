//! # Agent Records
//!
//! The persisted shape of an agent: identity, settlement wallet, credit
//! counters, compliance standing, and the key material the co-signing
//! scheme needs (public key + sealed server shard). The plaintext agent
//! shard is conspicuously absent; it was handed to the agent at issuance
//! and we kept no copy.
//!
//! Records are owned and mutated exclusively by
//! [`CreditLedger`](super::credit::CreditLedger). Everything here is plain
//! data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::MicroUsd;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Operational standing of an agent account.
///
/// `Delinquent` is entered when a repayment deadline is missed (decided by
/// the external sweep via [`crate::scoring`]) and left automatically when
/// the outstanding balance reaches zero. `Suspended` is a manual or
/// compliance hold; the ledger does not enter it on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Normal operation: may spend and repay.
    Active,
    /// Administrative hold. No spending; repayments still accepted.
    Suspended,
    /// Missed repayment deadline. No spending; repaying down to zero
    /// restores `Active`.
    Delinquent,
}

impl AgentStatus {
    /// Returns `true` if the status allows new spends.
    pub fn allows_spending(&self) -> bool {
        matches!(self, AgentStatus::Active)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Delinquent => write!(f, "delinquent"),
        }
    }
}

/// Know-Your-Agent verification state, set by the external compliance
/// pipeline. The engine stores it and echoes it to the permission-check
/// provider; it never decides it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KyaStatus {
    /// Verification not yet completed.
    Pending,
    /// Cleared by the compliance pipeline.
    Verified,
    /// Rejected by the compliance pipeline.
    Rejected,
}

// ---------------------------------------------------------------------------
// AgentRecord
// ---------------------------------------------------------------------------

/// One agent's complete credit record.
///
/// Invariant: `used_credit <= credit_limit` at every observable point.
/// Both counters are micro-USD. The record is `Clone` because reads hand
/// out snapshots; live state lives only inside the credit ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique agent identifier.
    pub id: Uuid,

    /// Settlement-network wallet address (`0x`-prefixed, derived from the
    /// agent's combined public key).
    pub wallet_address: String,

    /// Address of the human or organization that owns this agent.
    pub owner_address: String,

    /// Maximum outstanding balance this agent may carry.
    pub credit_limit: MicroUsd,

    /// Currently outstanding (drawn and not yet repaid) amount.
    pub used_credit: MicroUsd,

    /// Operational standing.
    pub status: AgentStatus,

    /// Compliance verification state.
    pub kya_status: KyaStatus,

    /// Risk score 0-100, written by the external re-scoring job via
    /// [`crate::scoring::risk_score`]. Higher is riskier.
    pub risk_score: u8,

    /// SEC1 compressed public key of the agent's settlement key, hex.
    pub public_key: String,

    /// The server shard of the settlement key, sealed at rest
    /// (`nonce || ciphertext`).
    #[serde(with = "hex_blob")]
    pub encrypted_server_shard: Vec<u8>,

    /// When the agent was registered.
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    /// Credit headroom: `credit_limit - used_credit`, zero when suspended
    /// or delinquent (those states allow no new draws).
    pub fn available_credit(&self) -> MicroUsd {
        if !self.status.allows_spending() {
            return 0;
        }
        self.credit_limit.saturating_sub(self.used_credit)
    }

    /// Utilization as a percentage (0-100), for reporting.
    pub fn utilization_pct(&self) -> f64 {
        if self.credit_limit == 0 {
            return 0.0;
        }
        (self.used_credit as f64 / self.credit_limit as f64) * 100.0
    }
}

/// Serde helper: sealed shard blobs serialize as hex strings rather than
/// JSON byte arrays, so a persisted record stays greppable.
mod hex_blob {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MICRO_USD_SCALE;

    fn record(limit: MicroUsd, used: MicroUsd) -> AgentRecord {
        AgentRecord {
            id: Uuid::new_v4(),
            wallet_address: "0x00000000000000000000000000000000000000aa".into(),
            owner_address: "0x00000000000000000000000000000000000000bb".into(),
            credit_limit: limit,
            used_credit: used,
            status: AgentStatus::Active,
            kya_status: KyaStatus::Verified,
            risk_score: 10,
            public_key: "02aa".into(),
            encrypted_server_shard: vec![1, 2, 3],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn available_credit_is_headroom() {
        let r = record(1_000 * MICRO_USD_SCALE, 250 * MICRO_USD_SCALE);
        assert_eq!(r.available_credit(), 750 * MICRO_USD_SCALE);
    }

    #[test]
    fn suspended_agent_has_no_headroom() {
        let mut r = record(1_000 * MICRO_USD_SCALE, 0);
        r.status = AgentStatus::Suspended;
        assert_eq!(r.available_credit(), 0);
    }

    #[test]
    fn utilization_percentage() {
        let r = record(1_000 * MICRO_USD_SCALE, 500 * MICRO_USD_SCALE);
        assert!((r.utilization_pct() - 50.0).abs() < 0.01);
    }

    #[test]
    fn record_serialization_roundtrip_with_hex_shard() {
        let r = record(100, 0);
        let json = serde_json::to_string(&r).expect("serialize");
        assert!(json.contains("\"010203\""), "shard must serialize as hex");
        let back: AgentRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.encrypted_server_shard, vec![1, 2, 3]);
    }
}
