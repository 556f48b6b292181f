//! # Settlement Module — The Spend Pipeline
//!
//! Where a payment actually happens. [`orchestrator`] drives the flow,
//! [`transaction`] defines the record and its state machine, [`store`]
//! keeps the records with an atomic idempotency gate, [`providers`]
//! declares the two external collaborators the engine consumes, and
//! [`error`] is the one taxonomy every failure leaves through.

pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod store;
pub mod transaction;

pub use error::SettlementError;
pub use orchestrator::{
    canonical_digest, AgentOnboarding, PaymentOrchestrator, SpendOutcome, SpendRequest,
};
pub use providers::{
    ChainProvider, PermissionCheckRequest, PermissionProvider, ProviderError, ProviderSet,
    TransferReceipt, TxConfirmation,
};
pub use store::TransactionStore;
pub use transaction::{
    TransactionKind, TransactionRecord, TransactionStatus, Verdict, VERDICT_SCHEMA_VERSION,
};
