//! # Credit Ledger
//!
//! Per-agent revolving credit. An agent draws against its limit when the
//! orchestrator reserves a spend, and pays the balance down through
//! repayments. The single invariant this module exists to defend:
//!
//! ```text
//!     0 <= used_credit <= credit_limit     (for every agent, always)
//! ```
//!
//! ## Linearization
//!
//! All records live behind one `parking_lot::RwLock`; every mutation takes
//! the write lock for the full check-and-set. Two concurrent reserves
//! against the same agent therefore serialize, and the second one sees the
//! first one's debit. There is no window where usage can overshoot the
//! limit.
//!
//! ## Who calls this
//!
//! Only the payment orchestrator (reserve/release/repay during
//! settlements) and administrative surfaces (register, adjust_limit,
//! status changes). The vault ledger never calls in here, and vice versa.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MicroUsd, MAX_CREDIT_LIMIT};
use crate::ledger::agent::{AgentRecord, AgentStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from credit ledger operations.
#[derive(Debug, Error)]
pub enum CreditError {
    /// Draw would push usage past the limit.
    #[error("insufficient credit: available {available}, requested {requested} (agent {agent_id})")]
    InsufficientCredit {
        agent_id: Uuid,
        /// Current headroom in micro-USD.
        available: MicroUsd,
        /// The rejected draw amount.
        requested: MicroUsd,
    },

    /// Repayment attempted with nothing outstanding.
    #[error("agent {0} has no outstanding balance")]
    NoOutstandingBalance(Uuid),

    /// New limit would be below what the agent already owes.
    #[error("new limit {new_limit} is below current usage {used} (agent {agent_id})")]
    LimitBelowUsage {
        agent_id: Uuid,
        new_limit: MicroUsd,
        used: MicroUsd,
    },

    /// New limit exceeds the system ceiling.
    #[error("new limit {0} exceeds the system maximum {MAX_CREDIT_LIMIT}")]
    LimitAboveMaximum(MicroUsd),

    /// No agent with the given id.
    #[error("agent {0} not found")]
    AgentNotFound(Uuid),

    /// A record with this wallet address already exists.
    #[error("wallet {0} is already registered")]
    WalletAlreadyRegistered(String),
}

// ---------------------------------------------------------------------------
// CreditLedger
// ---------------------------------------------------------------------------

/// The credit ledger: every agent record, behind one lock.
///
/// Shared across the engine as `Arc<CreditLedger>`; all methods take
/// `&self`.
#[derive(Default)]
pub struct CreditLedger {
    agents: RwLock<HashMap<Uuid, AgentRecord>>,
}

impl CreditLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new agent record.
    ///
    /// Rejects a duplicate wallet address; the wallet is derived from the
    /// settlement key, so a duplicate means a re-registration attempt,
    /// not a coincidence.
    pub fn register(&self, record: AgentRecord) -> Result<(), CreditError> {
        let mut agents = self.agents.write();
        if agents
            .values()
            .any(|a| a.wallet_address == record.wallet_address)
        {
            return Err(CreditError::WalletAlreadyRegistered(record.wallet_address));
        }
        agents.insert(record.id, record);
        Ok(())
    }

    /// Reserves (draws) `amount` against an agent's credit line.
    ///
    /// The full check-and-debit happens under the write lock. On success
    /// `used_credit` has grown by `amount`; on failure nothing changed.
    pub fn reserve(&self, agent_id: Uuid, amount: MicroUsd) -> Result<(), CreditError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CreditError::AgentNotFound(agent_id))?;

        let available = agent.available_credit();
        if amount > available {
            return Err(CreditError::InsufficientCredit {
                agent_id,
                available,
                requested: amount,
            });
        }

        agent.used_credit += amount;
        Ok(())
    }

    /// Releases a previous reservation during rollback.
    ///
    /// Floored at zero rather than erroring: a rollback must always
    /// succeed, and releasing more than is outstanding means the caller
    /// already returned part of it through another path.
    pub fn release(&self, agent_id: Uuid, amount: MicroUsd) -> Result<(), CreditError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CreditError::AgentNotFound(agent_id))?;
        agent.used_credit = agent.used_credit.saturating_sub(amount);
        Ok(())
    }

    /// Repays up to `amount` of the agent's outstanding balance.
    ///
    /// Returns the amount actually applied: `min(amount, used_credit)`.
    /// Overpayment is clamped, not rejected; agents round up, ledgers
    /// don't. A delinquent agent that reaches zero outstanding is
    /// restored to `Active`.
    ///
    /// # Errors
    ///
    /// [`CreditError::NoOutstandingBalance`] when there is nothing to
    /// repay at all.
    pub fn repay(&self, agent_id: Uuid, amount: MicroUsd) -> Result<MicroUsd, CreditError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CreditError::AgentNotFound(agent_id))?;

        if agent.used_credit == 0 {
            return Err(CreditError::NoOutstandingBalance(agent_id));
        }

        let applied = amount.min(agent.used_credit);
        agent.used_credit -= applied;

        if agent.used_credit == 0 && agent.status == AgentStatus::Delinquent {
            agent.status = AgentStatus::Active;
        }

        Ok(applied)
    }

    /// Adjusts an agent's credit limit.
    ///
    /// Rejected if the new limit would dip below current usage (the
    /// invariant is not negotiable) or exceed the system ceiling.
    pub fn adjust_limit(&self, agent_id: Uuid, new_limit: MicroUsd) -> Result<(), CreditError> {
        if new_limit > MAX_CREDIT_LIMIT {
            return Err(CreditError::LimitAboveMaximum(new_limit));
        }

        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CreditError::AgentNotFound(agent_id))?;

        if new_limit < agent.used_credit {
            return Err(CreditError::LimitBelowUsage {
                agent_id,
                new_limit,
                used: agent.used_credit,
            });
        }

        agent.credit_limit = new_limit;
        Ok(())
    }

    /// Sets an agent's operational status (admin/compliance surface).
    pub fn set_status(&self, agent_id: Uuid, status: AgentStatus) -> Result<(), CreditError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CreditError::AgentNotFound(agent_id))?;
        agent.status = status;
        Ok(())
    }

    /// Writes a new risk score (called by the external re-scoring job).
    pub fn set_risk_score(&self, agent_id: Uuid, score: u8) -> Result<(), CreditError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(CreditError::AgentNotFound(agent_id))?;
        agent.risk_score = score;
        Ok(())
    }

    /// Snapshot of one agent's record.
    pub fn get(&self, agent_id: Uuid) -> Result<AgentRecord, CreditError> {
        self.agents
            .read()
            .get(&agent_id)
            .cloned()
            .ok_or(CreditError::AgentNotFound(agent_id))
    }

    /// Looks up an agent by wallet address.
    pub fn get_by_wallet(&self, wallet: &str) -> Option<AgentRecord> {
        self.agents
            .read()
            .values()
            .find(|a| a.wallet_address == wallet)
            .cloned()
    }

    /// Current headroom for an agent.
    pub fn available_credit(&self, agent_id: Uuid) -> Result<MicroUsd, CreditError> {
        Ok(self.get(agent_id)?.available_credit())
    }

    /// Number of registered agents.
    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    /// Total outstanding across all agents, for reporting.
    pub fn total_outstanding(&self) -> MicroUsd {
        self.agents.read().values().map(|a| a.used_credit).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MICRO_USD_SCALE;
    use crate::ledger::agent::KyaStatus;
    use chrono::Utc;

    fn usd(n: u64) -> MicroUsd {
        n * MICRO_USD_SCALE
    }

    fn register_agent(ledger: &CreditLedger, limit: MicroUsd) -> Uuid {
        let id = Uuid::new_v4();
        ledger
            .register(AgentRecord {
                id,
                wallet_address: format!("0x{:040x}", id.as_u128()),
                owner_address: "0xowner".into(),
                credit_limit: limit,
                used_credit: 0,
                status: AgentStatus::Active,
                kya_status: KyaStatus::Verified,
                risk_score: 10,
                public_key: "02aa".into(),
                encrypted_server_shard: vec![0u8; 60],
                created_at: Utc::now(),
            })
            .unwrap();
        id
    }

    #[test]
    fn reserve_within_limit_succeeds() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));

        ledger.reserve(id, usd(400)).unwrap();
        assert_eq!(ledger.get(id).unwrap().used_credit, usd(400));
        assert_eq!(ledger.available_credit(id).unwrap(), usd(600));
    }

    #[test]
    fn reserve_exactly_at_limit() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));

        ledger.reserve(id, usd(1_000)).unwrap();
        assert_eq!(ledger.available_credit(id).unwrap(), 0);
    }

    #[test]
    fn reserve_past_limit_rejected_without_mutation() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(900)).unwrap();

        let result = ledger.reserve(id, usd(200));
        assert!(matches!(
            result,
            Err(CreditError::InsufficientCredit { .. })
        ));
        assert_eq!(ledger.get(id).unwrap().used_credit, usd(900));
    }

    #[test]
    fn release_restores_headroom() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(500)).unwrap();

        ledger.release(id, usd(500)).unwrap();
        assert_eq!(ledger.get(id).unwrap().used_credit, 0);
    }

    #[test]
    fn release_floors_at_zero() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(100)).unwrap();

        ledger.release(id, usd(500)).unwrap();
        assert_eq!(ledger.get(id).unwrap().used_credit, 0);
    }

    #[test]
    fn repay_clamps_to_outstanding() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(300)).unwrap();

        let applied = ledger.repay(id, usd(500)).unwrap();
        assert_eq!(applied, usd(300));
        assert_eq!(ledger.get(id).unwrap().used_credit, 0);
    }

    #[test]
    fn repay_with_zero_outstanding_rejected() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));

        assert!(matches!(
            ledger.repay(id, usd(100)),
            Err(CreditError::NoOutstandingBalance(_))
        ));
    }

    #[test]
    fn full_repayment_cures_delinquency() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(400)).unwrap();
        ledger.set_status(id, AgentStatus::Delinquent).unwrap();

        ledger.repay(id, usd(200)).unwrap();
        assert_eq!(ledger.get(id).unwrap().status, AgentStatus::Delinquent);

        ledger.repay(id, usd(200)).unwrap();
        assert_eq!(ledger.get(id).unwrap().status, AgentStatus::Active);
    }

    #[test]
    fn delinquent_agent_cannot_reserve() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(100)).unwrap();
        ledger.set_status(id, AgentStatus::Delinquent).unwrap();

        assert!(matches!(
            ledger.reserve(id, usd(1)),
            Err(CreditError::InsufficientCredit { available: 0, .. })
        ));
    }

    #[test]
    fn adjust_limit_below_usage_rejected() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        ledger.reserve(id, usd(600)).unwrap();

        assert!(matches!(
            ledger.adjust_limit(id, usd(500)),
            Err(CreditError::LimitBelowUsage { .. })
        ));
        ledger.adjust_limit(id, usd(600)).unwrap();
        assert_eq!(ledger.get(id).unwrap().credit_limit, usd(600));
    }

    #[test]
    fn adjust_limit_above_system_max_rejected() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));

        assert!(matches!(
            ledger.adjust_limit(id, MAX_CREDIT_LIMIT + 1),
            Err(CreditError::LimitAboveMaximum(_))
        ));
    }

    #[test]
    fn duplicate_wallet_rejected() {
        let ledger = CreditLedger::new();
        let id = register_agent(&ledger, usd(1_000));
        let existing = ledger.get(id).unwrap();

        let mut dup = existing.clone();
        dup.id = Uuid::new_v4();
        assert!(matches!(
            ledger.register(dup),
            Err(CreditError::WalletAlreadyRegistered(_))
        ));
    }

    #[test]
    fn unknown_agent_is_not_found() {
        let ledger = CreditLedger::new();
        assert!(matches!(
            ledger.reserve(Uuid::new_v4(), 1),
            Err(CreditError::AgentNotFound(_))
        ));
    }

    #[test]
    fn total_outstanding_sums_agents() {
        let ledger = CreditLedger::new();
        let a = register_agent(&ledger, usd(1_000));
        let b = register_agent(&ledger, usd(1_000));
        ledger.reserve(a, usd(100)).unwrap();
        ledger.reserve(b, usd(250)).unwrap();

        assert_eq!(ledger.total_outstanding(), usd(350));
        assert_eq!(ledger.agent_count(), 2);
    }

    #[test]
    fn concurrent_reserves_never_exceed_limit() {
        use std::sync::Arc;
        use std::thread;

        let ledger = Arc::new(CreditLedger::new());
        let id = register_agent(&ledger, usd(100));

        // 50 threads each trying to draw 10; only 10 can win.
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.reserve(id, usd(10)).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(wins, 10);
        assert_eq!(ledger.get(id).unwrap().used_credit, usd(100));
    }
}
