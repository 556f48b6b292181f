//! # External Collaborator Traits
//!
//! The engine consumes exactly two kinds of outside help: a permission
//! checker that renders the five-gate verdict, and a chain provider per
//! settlement network that moves funds and reports confirmations. Both are
//! `async_trait` objects injected at orchestrator construction; the engine
//! never reaches into a global registry to find them.
//!
//! [`ProviderSet`] is that injection: an explicit, immutable map from
//! network id to provider, built once at startup. A network the set does
//! not know is a configuration error surfaced before any ledger action.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::MicroUsd;
use crate::crypto::ReconstructedKey;
use crate::ledger::AgentRecord;
use crate::settlement::transaction::Verdict;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by an external provider. The orchestrator wraps these
/// into the settlement taxonomy before they reach a caller.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached or did not answer in time.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider answered, and the answer was a failure.
    #[error("provider call failed: {0}")]
    Call(String),
}

// ---------------------------------------------------------------------------
// Permission checking
// ---------------------------------------------------------------------------

/// Everything the permission-check provider gets to see about a spend.
/// The agent record is a snapshot; the provider never holds a reference
/// into live ledger state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionCheckRequest {
    pub agent: AgentRecord,
    pub recipient_address: String,
    pub amount: MicroUsd,
    pub merchant_id: Option<Uuid>,
    pub recipient_agent_id: Option<Uuid>,
}

/// Renders the five-gate verdict for a proposed spend. May itself call
/// out to sanctions or risk services; from the orchestrator's side it is
/// one awaited call under [`crate::config::VERDICT_TIMEOUT`].
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self, req: &PermissionCheckRequest) -> Result<Verdict, ProviderError>;
}

// ---------------------------------------------------------------------------
// Chain providers
// ---------------------------------------------------------------------------

/// Receipt for a broadcast transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    /// Network fee paid, in micro-USD equivalent.
    pub fee: MicroUsd,
    pub confirmed: bool,
}

/// Confirmation status of a previously broadcast transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxConfirmation {
    pub confirmed: bool,
    pub block_number: Option<u64>,
}

/// One settlement network's broadcast surface.
///
/// `transfer_with_key` borrows the reconstructed signing authority for
/// the duration of the call only; the key zeroizes when the orchestrator
/// drops it, and implementations must not retain a copy.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn transfer_with_key(
        &self,
        key: &ReconstructedKey,
        to: &str,
        amount: MicroUsd,
    ) -> Result<TransferReceipt, ProviderError>;

    async fn estimate_fee(&self, to: &str, amount: MicroUsd) -> Result<MicroUsd, ProviderError>;

    async fn verify_transaction(&self, tx_hash: &str) -> Result<TxConfirmation, ProviderError>;

    async fn get_balance(&self, address: &str) -> Result<MicroUsd, ProviderError>;
}

// ---------------------------------------------------------------------------
// ProviderSet
// ---------------------------------------------------------------------------

/// The injected, immutable map of settlement networks the engine can
/// broadcast on.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn ChainProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a network. Builder-style, chain at construction.
    pub fn with_network(mut self, network_id: &str, provider: Arc<dyn ChainProvider>) -> Self {
        self.providers.insert(network_id.to_string(), provider);
        self
    }

    /// Resolves a network's provider.
    pub fn get(&self, network_id: &str) -> Option<Arc<dyn ChainProvider>> {
        self.providers.get(network_id).cloned()
    }

    /// Whether the set knows this network at all.
    pub fn supports(&self, network_id: &str) -> bool {
        self.providers.contains_key(network_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProvider;

    #[async_trait]
    impl ChainProvider for NullProvider {
        async fn transfer_with_key(
            &self,
            _key: &ReconstructedKey,
            _to: &str,
            _amount: MicroUsd,
        ) -> Result<TransferReceipt, ProviderError> {
            Err(ProviderError::Unavailable("null provider".into()))
        }

        async fn estimate_fee(
            &self,
            _to: &str,
            _amount: MicroUsd,
        ) -> Result<MicroUsd, ProviderError> {
            Ok(0)
        }

        async fn verify_transaction(
            &self,
            _tx_hash: &str,
        ) -> Result<TxConfirmation, ProviderError> {
            Ok(TxConfirmation {
                confirmed: false,
                block_number: None,
            })
        }

        async fn get_balance(&self, _address: &str) -> Result<MicroUsd, ProviderError> {
            Ok(0)
        }
    }

    #[test]
    fn provider_set_resolves_by_network_id() {
        let set = ProviderSet::new().with_network("base-sepolia", Arc::new(NullProvider));
        assert!(set.supports("base-sepolia"));
        assert!(set.get("base-sepolia").is_some());
        assert!(!set.supports("mainnet"));
        assert!(set.get("mainnet").is_none());
    }
}
