//! # Transaction Records & the Settlement State Machine
//!
//! Every spend and repayment leaves exactly one [`TransactionRecord`]
//! behind, keyed by its idempotency key. The record carries the full
//! verdict snapshot and walks a fixed state machine:
//!
//! ```text
//!   pending_approval ──► approved ──► signing ──► broadcasting ──► confirmed
//!          │                              │             │
//!          └──► rejected                  └─────────────┴──► failed
//! ```
//!
//! `confirmed`, `failed`, and `rejected` are terminal. Transitions outside
//! the arrows are programming errors and get rejected at the store
//! boundary, not silently applied. Repayment records are the one
//! exception: they settle internally with no signing or broadcast leg,
//! so they jump straight from `pending_approval` to a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::config::MicroUsd;

/// Schema version stamped on every persisted verdict snapshot. Bump it
/// whenever [`Verdict`]'s field set changes, so old rows stay readable.
pub const VERDICT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Status & kind
// ---------------------------------------------------------------------------

/// Lifecycle state of a settlement transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, verdict not yet recorded.
    PendingApproval,
    /// Verdict passed; ledger reservations in progress.
    Approved,
    /// Verdict failed. Terminal; no ledger state was touched.
    Rejected,
    /// Reservations hold; waiting on (or performing) co-signing.
    Signing,
    /// Signed; handed to the chain provider.
    Broadcasting,
    /// Settled onchain. Terminal.
    Confirmed,
    /// Any post-approval failure, rolled back. Terminal.
    Failed,
}

impl TransactionStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (*self, next),
            (PendingApproval, Approved)
                | (PendingApproval, Rejected)
                | (PendingApproval, Failed)
                | (Approved, Signing)
                | (Approved, Failed)
                | (Signing, Broadcasting)
                | (Signing, Failed)
                | (Broadcasting, Confirmed)
                | (Broadcasting, Failed)
        )
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Signing => "signing",
            Self::Broadcasting => "broadcasting",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What kind of movement a transaction records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Agent pays a registered merchant.
    AgentToMerchant,
    /// Agent pays another agent's settlement wallet.
    AgentToAgent,
    /// Agent pays down its outstanding balance.
    Repayment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AgentToMerchant => "agent_to_merchant",
            Self::AgentToAgent => "agent_to_agent",
            Self::Repayment => "repayment",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// The permission-check provider's answer, persisted verbatim on the
/// transaction under a fixed schema. Five independent gates plus the
/// aggregate; `all_passed` is the provider's word, not something we
/// recompute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub schema_version: u32,
    pub credit_check: bool,
    pub sanctions_check: bool,
    pub counterparty_check: bool,
    pub kya_check: bool,
    pub risk_check: bool,
    pub all_passed: bool,
    pub failure_reasons: Vec<String>,
}

impl Verdict {
    /// An all-gates-green verdict, mostly useful in tests and mock
    /// providers.
    pub fn approved() -> Self {
        Self {
            schema_version: VERDICT_SCHEMA_VERSION,
            credit_check: true,
            sanctions_check: true,
            counterparty_check: true,
            kya_check: true,
            risk_check: true,
            all_passed: true,
            failure_reasons: Vec::new(),
        }
    }

    /// A rejection carrying the failure reasons. The gate booleans start
    /// from the all-green baseline; the provider flips the specific gates
    /// that failed.
    pub fn rejected(reasons: Vec<String>) -> Self {
        Self {
            all_passed: false,
            failure_reasons: reasons,
            ..Self::approved()
        }
    }
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// One settlement transaction, from submission to terminal state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub agent_id: Uuid,
    /// Set for [`TransactionKind::AgentToMerchant`].
    pub merchant_id: Option<Uuid>,
    /// Set for [`TransactionKind::AgentToAgent`].
    pub recipient_agent_id: Option<Uuid>,
    /// Gross amount the agent owes back.
    pub amount: MicroUsd,
    /// Platform fee carved out of `amount`.
    pub fee: MicroUsd,
    /// What the recipient actually receives: `amount - fee`.
    pub net_amount: MicroUsd,
    pub status: TransactionStatus,
    pub kind: TransactionKind,
    /// Settlement-network transaction hash, present once broadcast.
    pub tx_hash: Option<String>,
    pub recipient_address: String,
    /// Settlement network this spend broadcasts on.
    pub network_id: String,
    /// Caller-supplied key; globally unique across all transactions.
    pub idempotency_key: String,
    /// Permission-check snapshot, recorded whichever way it went.
    pub verdict: Option<Verdict>,
    /// Machine-readable error kind when `status == Failed`.
    pub failure_kind: Option<String>,
    /// While parked in `Signing` awaiting the agent's shard: the instant
    /// the reservation expires and the transaction rolls back.
    pub signing_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// `true` while the transaction is parked in `Signing` waiting for the
    /// caller to supply its key shard.
    pub fn awaiting_agent_signature(&self) -> bool {
        self.status == TransactionStatus::Signing && self.signing_deadline.is_some()
    }

    /// Whether the state machine permits moving this record to `next`.
    ///
    /// Spends follow [`TransactionStatus::can_transition_to`]. Repayments
    /// have no signing or broadcast leg, so their only legal moves are
    /// `pending_approval` straight to `confirmed` or `failed`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match self.kind {
            TransactionKind::Repayment => {
                self.status == TransactionStatus::PendingApproval
                    && matches!(
                        next,
                        TransactionStatus::Confirmed | TransactionStatus::Failed
                    )
            }
            _ => self.status.can_transition_to(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        use TransactionStatus::*;
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Signing));
        assert!(Signing.can_transition_to(Broadcasting));
        assert!(Broadcasting.can_transition_to(Confirmed));
    }

    #[test]
    fn every_post_approval_state_can_fail() {
        use TransactionStatus::*;
        for state in [PendingApproval, Approved, Signing, Broadcasting] {
            assert!(state.can_transition_to(Failed), "{state} must be able to fail");
        }
    }

    #[test]
    fn terminal_states_are_dead_ends() {
        use TransactionStatus::*;
        for terminal in [Confirmed, Failed, Rejected] {
            assert!(terminal.is_terminal());
            for next in [
                PendingApproval,
                Approved,
                Rejected,
                Signing,
                Broadcasting,
                Confirmed,
                Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn skipping_states_is_illegal() {
        use TransactionStatus::*;
        assert!(!PendingApproval.can_transition_to(Signing));
        assert!(!Approved.can_transition_to(Broadcasting));
        assert!(!Signing.can_transition_to(Confirmed));
        assert!(!Approved.can_transition_to(Confirmed));
    }

    fn record(kind: TransactionKind) -> TransactionRecord {
        TransactionRecord {
            id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            merchant_id: None,
            recipient_agent_id: None,
            amount: 100,
            fee: 0,
            net_amount: 100,
            status: TransactionStatus::PendingApproval,
            kind,
            tx_hash: None,
            recipient_address: "vault".into(),
            network_id: "internal".into(),
            idempotency_key: "key".into(),
            verdict: None,
            failure_kind: None,
            signing_deadline: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn repayments_confirm_straight_from_pending() {
        use TransactionStatus::*;
        let repayment = record(TransactionKind::Repayment);
        assert!(repayment.can_transition_to(Confirmed));
        assert!(repayment.can_transition_to(Failed));
        assert!(!repayment.can_transition_to(Approved));
        assert!(!repayment.can_transition_to(Signing));

        // Spends still walk the full machine.
        let spend = record(TransactionKind::AgentToMerchant);
        assert!(!spend.can_transition_to(Confirmed));
        assert!(spend.can_transition_to(Approved));
    }

    #[test]
    fn verdict_serializes_with_schema_version() {
        let v = Verdict::approved();
        let json = serde_json::to_string(&v).expect("serialize");
        assert!(json.contains("\"schema_version\":1"));
    }

    #[test]
    fn rejected_verdict_carries_reasons() {
        let v = Verdict::rejected(vec!["credit limit exceeded".into()]);
        assert!(!v.all_passed);
        assert_eq!(v.failure_reasons.len(), 1);
        // Gates keep the baseline until the provider flips the failed
        // ones; only the aggregate is rendered here.
        assert!(v.credit_check);
        assert!(v.sanctions_check);
    }

    #[test]
    fn status_snake_case_serialization() {
        let s = serde_json::to_string(&TransactionStatus::PendingApproval).expect("serialize");
        assert_eq!(s, "\"pending_approval\"");
    }
}
