//! # Ledger Module — Credit & Pooled Liquidity
//!
//! The two leaf ledgers of the engine plus the merchant fee registry:
//!
//! - [`credit`] — per-agent revolving credit. Holds the agent records and
//!   enforces `0 <= used_credit <= credit_limit` on every mutation.
//! - [`vault`] — the pooled liquidity vault. Lender deposits, share
//!   issuance, loan reservations, and fee-driven share-price growth.
//! - [`merchant`] — merchant records and their negotiated fee rates.
//! - [`agent`] — the agent record type and its status enums.
//!
//! The leaf ledgers never call each other. The payment orchestrator in
//! [`crate::settlement`] is the only component that composes them, and the
//! only one permitted to mutate credit and vault state during a
//! settlement. Each ledger linearizes its own compound updates internally,
//! so callers get atomic check-and-set semantics without holding any
//! external lock.

pub mod agent;
pub mod credit;
pub mod merchant;
pub mod vault;

pub use agent::{AgentRecord, AgentStatus, KyaStatus};
pub use credit::{CreditError, CreditLedger};
pub use merchant::{Merchant, MerchantError, MerchantRegistry};
pub use vault::{LenderPosition, VaultError, VaultLedger, VaultSnapshot, WithdrawalOutcome};
