//! # Risk & Delinquency Scoring
//!
//! Pure functions over aggregated agent statistics. No clock, no ledger
//! access, no scheduler: an external job gathers the stats on whatever
//! cadence it likes, calls these, and writes the results back through
//! [`CreditLedger::set_risk_score`](crate::ledger::CreditLedger::set_risk_score)
//! and [`CreditLedger::set_status`](crate::ledger::CreditLedger::set_status).
//! Same inputs, same outputs, every time.

use serde::{Deserialize, Serialize};

use crate::config::MicroUsd;
use crate::ledger::AgentStatus;

/// Days past a repayment due date before an outstanding balance turns the
/// agent delinquent.
pub const DELINQUENCY_GRACE_DAYS: u32 = 30;

/// Aggregated behavior statistics for one agent, computed by the caller
/// over whatever window it scores on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AgentStats {
    /// Settled transactions, lifetime.
    pub transaction_count: u64,
    /// Repaid / drawn, in `[0.0, 1.0]`. Callers with no draws yet should
    /// pass `1.0`.
    pub repayment_ratio: f64,
    /// Times the agent has gone delinquent, lifetime.
    pub delinquency_count: u32,
    /// Whole days since registration.
    pub account_age_days: u32,
}

/// Risk score in `[0, 100]`, higher is riskier.
///
/// Starts every agent at 50 and moves on evidence: repayment behavior
/// dominates, settled volume and account age earn trust slowly, past
/// delinquencies cost 15 points each. Deterministic and clamped; the
/// weights are policy, not science, and live here so changing policy is
/// one diff.
pub fn risk_score(stats: &AgentStats) -> u8 {
    let mut score: f64 = 50.0;

    // Repayment behavior: up to -30 for a perfect record, up to +30 for
    // never repaying.
    let repayment = stats.repayment_ratio.clamp(0.0, 1.0);
    score += 30.0 - repayment * 60.0;

    // Track record: settled volume earns up to -10, saturating at 100
    // transactions.
    let volume = (stats.transaction_count as f64 / 100.0).min(1.0);
    score -= volume * 10.0;

    // Longevity: up to -10, saturating at one year.
    let age = (stats.account_age_days as f64 / 365.0).min(1.0);
    score -= age * 10.0;

    // History of delinquency is the strongest single signal.
    score += stats.delinquency_count as f64 * 15.0;

    score.clamp(0.0, 100.0).round() as u8
}

/// Status an agent with `outstanding` balance should hold after
/// `days_past_due` days beyond its repayment due date. Zero balance is
/// always `Active`; a balance inside the grace window stays `Active`;
/// past it, `Delinquent`. Curing back to `Active` on full repayment is
/// the credit ledger's job, not this function's.
pub fn delinquency_status(outstanding: MicroUsd, days_past_due: u32) -> AgentStatus {
    if outstanding == 0 || days_past_due <= DELINQUENCY_GRACE_DAYS {
        AgentStatus::Active
    } else {
        AgentStatus::Delinquent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> AgentStats {
        AgentStats {
            transaction_count: 0,
            repayment_ratio: 1.0,
            delinquency_count: 0,
            account_age_days: 0,
        }
    }

    #[test]
    fn new_agent_with_clean_slate_scores_low() {
        // Perfect repayment ratio, no history: 50 - 30 = 20.
        assert_eq!(risk_score(&stats()), 20);
    }

    #[test]
    fn never_repaying_scores_high() {
        let s = AgentStats {
            repayment_ratio: 0.0,
            ..stats()
        };
        assert_eq!(risk_score(&s), 80);
    }

    #[test]
    fn track_record_earns_trust() {
        let veteran = AgentStats {
            transaction_count: 100,
            account_age_days: 365,
            ..stats()
        };
        assert_eq!(risk_score(&veteran), 0);
    }

    #[test]
    fn delinquencies_dominate() {
        let repeat_offender = AgentStats {
            delinquency_count: 4,
            repayment_ratio: 0.0,
            ..stats()
        };
        assert_eq!(risk_score(&repeat_offender), 100);
    }

    #[test]
    fn score_is_deterministic() {
        let s = AgentStats {
            transaction_count: 42,
            repayment_ratio: 0.8,
            delinquency_count: 1,
            account_age_days: 200,
        };
        assert_eq!(risk_score(&s), risk_score(&s));
    }

    #[test]
    fn out_of_range_ratio_is_clamped() {
        let s = AgentStats {
            repayment_ratio: 7.5,
            ..stats()
        };
        assert_eq!(risk_score(&s), risk_score(&stats()));
    }

    #[test]
    fn zero_balance_is_never_delinquent() {
        assert_eq!(delinquency_status(0, 400), AgentStatus::Active);
    }

    #[test]
    fn grace_window_holds() {
        assert_eq!(
            delinquency_status(1_000_000, DELINQUENCY_GRACE_DAYS),
            AgentStatus::Active
        );
        assert_eq!(
            delinquency_status(1_000_000, DELINQUENCY_GRACE_DAYS + 1),
            AgentStatus::Delinquent
        );
    }
}
