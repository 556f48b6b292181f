//! # Vault Ledger — Pooled Lender Liquidity
//!
//! The vault is one pool of lender money with one price. Lenders deposit
//! USD and receive shares; the engine lends pooled funds out to back agent
//! spends and returns them on repayment; settlement fees are injected
//! into the pool without minting shares, which is the entire yield
//! mechanism:
//!
//! ```text
//!     share_price = total_deposits / total_shares      (1.0 when empty)
//! ```
//!
//! Fees raise `total_deposits` while `total_shares` stays put, so the
//! price only moves one way between withdrawals. A lender's yield is
//! realized at withdrawal as the difference between what their shares
//! redeem for and what they originally put in.
//!
//! ## Arithmetic
//!
//! All issuance and redemption math is integer ratio math in `u128`
//! intermediates: `shares = amount * S / D` and `payout = shares * D / S`.
//! No floats touch the ledger; [`VaultLedger::share_price`] returns `f64`
//! for dashboards only. With money and shares on the same 6-decimal
//! scale, an empty-vault deposit mints shares 1:1 and a full withdrawal
//! with no intervening fee returns exactly the deposit.
//!
//! ## Invariants
//!
//! - `total_lent <= total_deposits` (equivalently,
//!   `available_liquidity >= 0`), enforced on reserve and withdraw.
//! - Fee injection never mints or burns shares.
//!
//! One `parking_lot::Mutex` guards the whole state; every compound update
//! is atomic and vault operations are linearized with respect to each
//! other.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MicroShares, MicroUsd, BPS_DENOMINATOR, SHARE_DUST_TOLERANCE};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from vault ledger operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The pool cannot cover the requested reservation or payout.
    #[error("insufficient liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity {
        available: MicroUsd,
        requested: MicroUsd,
    },

    /// The lender does not own enough shares to burn.
    #[error("insufficient shares: owned {owned}, requested {requested}")]
    InsufficientShares {
        owned: MicroShares,
        requested: MicroShares,
    },

    /// Zero-amount deposits, withdrawals, and sub-share dust deposits are
    /// no-ops at best and bugs at worst; rejected either way.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// Checked arithmetic overflowed. Nobody deposits 18 quintillion
    /// micro-dollars by accident.
    #[error("vault arithmetic overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// LenderPosition
// ---------------------------------------------------------------------------

/// One lender deposit and its remaining stake.
///
/// A lender holds one position per deposit. Withdrawals burn shares
/// across a lender's positions oldest-first and realize yield into
/// `earned_yield` as they go. A fully burned position is kept as a
/// history row with zero shares.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LenderPosition {
    /// Position id, monotonically assigned per vault.
    pub id: u64,
    /// Lender's address.
    pub lender: String,
    /// Remaining original-deposit value backing this position.
    pub deposited_amount: MicroUsd,
    /// Shares still held by this position.
    pub shares_owned: MicroShares,
    /// Yield realized from this position so far (at withdrawals).
    pub earned_yield: MicroUsd,
}

// ---------------------------------------------------------------------------
// Snapshot & outcomes
// ---------------------------------------------------------------------------

/// Point-in-time view of the vault totals, for reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub total_deposits: MicroUsd,
    pub total_lent: MicroUsd,
    pub total_fees_earned: MicroUsd,
    pub total_shares: MicroShares,
    pub available_liquidity: MicroUsd,
}

/// What a withdrawal actually did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalOutcome {
    /// USD paid out to the lender.
    pub amount_paid: MicroUsd,
    /// Shares burned (may be less than requested within the dust
    /// tolerance).
    pub shares_burned: MicroShares,
    /// Yield realized by this withdrawal.
    pub yield_realized: MicroUsd,
}

// ---------------------------------------------------------------------------
// VaultLedger
// ---------------------------------------------------------------------------

struct VaultState {
    total_deposits: MicroUsd,
    total_lent: MicroUsd,
    total_fees_earned: MicroUsd,
    total_shares: MicroShares,
    positions: Vec<LenderPosition>,
    next_position_id: u64,
}

/// The pooled liquidity ledger. Singleton per engine, shared as
/// `Arc<VaultLedger>`.
pub struct VaultLedger {
    state: Mutex<VaultState>,
}

impl Default for VaultLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultLedger {
    /// Creates an empty vault.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VaultState {
                total_deposits: 0,
                total_lent: 0,
                total_fees_earned: 0,
                total_shares: 0,
                positions: Vec::new(),
                next_position_id: 1,
            }),
        }
    }

    /// Current share price for reporting. Exactly `1.0` for an empty
    /// vault. Ledger math never uses this value.
    pub fn share_price(&self) -> f64 {
        let state = self.state.lock();
        if state.total_shares == 0 {
            return 1.0;
        }
        state.total_deposits as f64 / state.total_shares as f64
    }

    /// Deposits `amount` into the pool and mints shares at the current
    /// price. Returns the shares issued. No eligibility checks here;
    /// identity and compliance gates live outside the ledger.
    pub fn deposit(&self, lender: &str, amount: MicroUsd) -> Result<MicroShares, VaultError> {
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }

        let mut state = self.state.lock();

        let shares = if state.total_shares == 0 {
            // Empty vault: price is 1.0 and money/shares share a scale.
            amount
        } else {
            ratio(amount, state.total_shares, state.total_deposits)?
        };
        if shares == 0 {
            // Deposit too small to mint a single micro-share at the
            // current price.
            return Err(VaultError::ZeroAmount);
        }

        state.total_deposits = state
            .total_deposits
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        state.total_shares = state
            .total_shares
            .checked_add(shares)
            .ok_or(VaultError::Overflow)?;

        let id = state.next_position_id;
        state.next_position_id += 1;
        state.positions.push(LenderPosition {
            id,
            lender: lender.to_string(),
            deposited_amount: amount,
            shares_owned: shares,
            earned_yield: 0,
        });

        Ok(shares)
    }

    /// Burns up to `shares_to_burn` of the lender's shares and pays out at
    /// the current price.
    ///
    /// Shares are burned across the lender's positions oldest-first. A
    /// request may overshoot actual holdings by at most
    /// [`SHARE_DUST_TOLERANCE`] (rounding slack for "withdraw everything"
    /// callers); past that it is an over-withdrawal and gets rejected.
    ///
    /// # Errors
    ///
    /// - [`VaultError::InsufficientShares`] if the lender owns too few.
    /// - [`VaultError::InsufficientLiquidity`] if the payout exceeds what
    ///   is not currently lent out. Lent funds come back through
    ///   repayments, not withdrawals.
    pub fn withdraw(
        &self,
        lender: &str,
        shares_to_burn: MicroShares,
    ) -> Result<WithdrawalOutcome, VaultError> {
        if shares_to_burn == 0 {
            return Err(VaultError::ZeroAmount);
        }

        let mut state = self.state.lock();

        let owned: MicroShares = state
            .positions
            .iter()
            .filter(|p| p.lender == lender)
            .map(|p| p.shares_owned)
            .sum();

        if shares_to_burn > owned.saturating_add(SHARE_DUST_TOLERANCE) {
            return Err(VaultError::InsufficientShares {
                owned,
                requested: shares_to_burn,
            });
        }
        let burn_total = shares_to_burn.min(owned);
        if burn_total == 0 {
            return Err(VaultError::InsufficientShares {
                owned,
                requested: shares_to_burn,
            });
        }

        // Price is fixed for the whole operation: every per-position
        // payout uses the pre-withdrawal totals.
        let deposits_before = state.total_deposits;
        let shares_before = state.total_shares;
        let available = deposits_before - state.total_lent;

        let mut remaining = burn_total;
        let mut amount_paid: MicroUsd = 0;
        let mut yield_realized: MicroUsd = 0;
        let mut plan: Vec<(usize, MicroShares, MicroUsd, MicroUsd)> = Vec::new();

        for (idx, pos) in state.positions.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            if pos.lender != lender || pos.shares_owned == 0 {
                continue;
            }

            let burn = remaining.min(pos.shares_owned);
            let payout = ratio(burn, deposits_before, shares_before)?;
            // Proportional slice of the position's original deposit value.
            let principal = ratio(burn, pos.deposited_amount, pos.shares_owned)?;

            amount_paid = amount_paid.checked_add(payout).ok_or(VaultError::Overflow)?;
            yield_realized += payout.saturating_sub(principal);
            plan.push((idx, burn, payout, principal));
            remaining -= burn;
        }

        // Burning the entire vault pays out everything: per-position
        // truncation could otherwise strand a few micro-USD with zero
        // shares left to claim them. The remainder folds into the last
        // slice, and it is all yield since every principal slice is exact
        // on a full burn.
        if burn_total == shares_before {
            if let Some(last) = plan.last_mut() {
                let dust = deposits_before - amount_paid;
                last.2 += dust;
                amount_paid = deposits_before;
                yield_realized += dust;
            }
        }

        if amount_paid > available {
            return Err(VaultError::InsufficientLiquidity {
                available,
                requested: amount_paid,
            });
        }

        // All checks passed; apply the plan.
        for &(idx, burn, payout, principal) in &plan {
            let pos = &mut state.positions[idx];
            pos.shares_owned -= burn;
            pos.deposited_amount = pos.deposited_amount.saturating_sub(principal);
            pos.earned_yield += payout.saturating_sub(principal);
        }
        state.total_shares -= burn_total;
        state.total_deposits -= amount_paid;

        Ok(WithdrawalOutcome {
            amount_paid,
            shares_burned: burn_total,
            yield_realized,
        })
    }

    /// Marks `amount` of pooled funds as lent out for a settlement.
    ///
    /// Fails if it would drive available liquidity negative; the caller
    /// gets the error before any credit has been debited.
    pub fn reserve_liquidity(&self, amount: MicroUsd) -> Result<(), VaultError> {
        let mut state = self.state.lock();
        let available = state.total_deposits - state.total_lent;
        if amount > available {
            return Err(VaultError::InsufficientLiquidity {
                available,
                requested: amount,
            });
        }
        state.total_lent += amount;
        Ok(())
    }

    /// Returns previously reserved funds to the pool (repayment or
    /// rollback). Floored at zero; a return must always succeed.
    pub fn return_liquidity(&self, amount: MicroUsd) {
        let mut state = self.state.lock();
        state.total_lent = state.total_lent.saturating_sub(amount);
    }

    /// Injects a settlement fee into the pool. Deposits grow, shares do
    /// not, the price rises: this is the lenders' entire yield. A zero
    /// amount is a no-op.
    pub fn inject_fee(&self, amount: MicroUsd) -> Result<(), VaultError> {
        if amount == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        state.total_deposits = state
            .total_deposits
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        state.total_fees_earned = state
            .total_fees_earned
            .checked_add(amount)
            .ok_or(VaultError::Overflow)?;
        Ok(())
    }

    /// Lifetime fee yield in basis points of current deposits, rounded.
    /// Informational only.
    pub fn yield_rate_bps(&self) -> u64 {
        let state = self.state.lock();
        if state.total_deposits == 0 {
            return 0;
        }
        let fees = state.total_fees_earned as u128;
        let deposits = state.total_deposits as u128;
        ((fees * BPS_DENOMINATOR as u128 + deposits / 2) / deposits) as u64
    }

    /// Funds not currently lent out.
    pub fn available_liquidity(&self) -> MicroUsd {
        let state = self.state.lock();
        state.total_deposits - state.total_lent
    }

    /// Snapshot of the vault totals.
    pub fn snapshot(&self) -> VaultSnapshot {
        let state = self.state.lock();
        VaultSnapshot {
            total_deposits: state.total_deposits,
            total_lent: state.total_lent,
            total_fees_earned: state.total_fees_earned,
            total_shares: state.total_shares,
            available_liquidity: state.total_deposits - state.total_lent,
        }
    }

    /// All positions belonging to a lender, oldest first.
    pub fn positions_of(&self, lender: &str) -> Vec<LenderPosition> {
        self.state
            .lock()
            .positions
            .iter()
            .filter(|p| p.lender == lender)
            .cloned()
            .collect()
    }

    /// Total shares currently owned by a lender.
    pub fn shares_of(&self, lender: &str) -> MicroShares {
        self.state
            .lock()
            .positions
            .iter()
            .filter(|p| p.lender == lender)
            .map(|p| p.shares_owned)
            .sum()
    }
}

/// `value * numerator / denominator` in u128, truncated back to u64.
/// The denominator is never zero at any call site (guarded by the empty
/// checks above); a zero denominator here is a bug, reported as overflow
/// rather than a panic.
fn ratio(value: u64, numerator: u64, denominator: u64) -> Result<u64, VaultError> {
    if denominator == 0 {
        return Err(VaultError::Overflow);
    }
    let out = (value as u128) * (numerator as u128) / (denominator as u128);
    u64::try_from(out).map_err(|_| VaultError::Overflow)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
