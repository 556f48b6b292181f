//! # Merchant Registry
//!
//! Merchants are the receiving side of agent spends. Each carries a
//! settlement address and a negotiated fee rate in basis points; the
//! orchestrator reads the rate at verdict time and the fee it computes is
//! what the vault earns. Deactivated merchants stay on file (historical
//! transactions reference them) but stop accepting new spends.
//!
//! Reads dominate writes here, so the registry sits on a `DashMap` rather
//! than a ledger-style mutex.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{DEFAULT_FEE_BPS, MAX_FEE_BPS};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from merchant registry operations.
#[derive(Debug, Error)]
pub enum MerchantError {
    #[error("merchant {0} not found")]
    NotFound(Uuid),

    /// Fee rates above [`MAX_FEE_BPS`] are configuration mistakes, not
    /// negotiations.
    #[error("fee rate {0} bps exceeds the maximum of {MAX_FEE_BPS} bps")]
    FeeTooHigh(u32),

    #[error("merchant with settlement address {0} already registered")]
    AddressAlreadyRegistered(String),
}

// ---------------------------------------------------------------------------
// Merchant
// ---------------------------------------------------------------------------

/// One registered merchant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Merchant {
    /// Unique merchant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Settlement-network address that receives net payouts.
    pub settlement_address: String,
    /// Fee rate in basis points, deducted from every spend to this
    /// merchant and injected into the vault.
    pub fee_bps: u32,
    /// Whether the merchant accepts new spends.
    pub active: bool,
    /// When the merchant was registered.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// MerchantRegistry
// ---------------------------------------------------------------------------

/// In-memory merchant store.
#[derive(Default)]
pub struct MerchantRegistry {
    merchants: DashMap<Uuid, Merchant>,
}

impl MerchantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a merchant at the given fee rate. Pass `None` to take
    /// the platform default of [`DEFAULT_FEE_BPS`].
    pub fn register(
        &self,
        name: &str,
        settlement_address: &str,
        fee_bps: Option<u32>,
    ) -> Result<Merchant, MerchantError> {
        let fee_bps = fee_bps.unwrap_or(DEFAULT_FEE_BPS);
        if fee_bps > MAX_FEE_BPS {
            return Err(MerchantError::FeeTooHigh(fee_bps));
        }
        if self
            .merchants
            .iter()
            .any(|m| m.settlement_address == settlement_address)
        {
            return Err(MerchantError::AddressAlreadyRegistered(
                settlement_address.to_string(),
            ));
        }

        let merchant = Merchant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            settlement_address: settlement_address.to_string(),
            fee_bps,
            active: true,
            created_at: Utc::now(),
        };
        self.merchants.insert(merchant.id, merchant.clone());
        Ok(merchant)
    }

    /// Looks up a merchant by id.
    pub fn get(&self, id: Uuid) -> Option<Merchant> {
        self.merchants.get(&id).map(|m| m.clone())
    }

    /// Changes a merchant's fee rate, bounded by [`MAX_FEE_BPS`]. Applies
    /// to spends verdicted after the change; in-flight settlements keep
    /// the rate they were quoted.
    pub fn set_fee(&self, id: Uuid, fee_bps: u32) -> Result<(), MerchantError> {
        if fee_bps > MAX_FEE_BPS {
            return Err(MerchantError::FeeTooHigh(fee_bps));
        }
        let mut merchant = self
            .merchants
            .get_mut(&id)
            .ok_or(MerchantError::NotFound(id))?;
        merchant.fee_bps = fee_bps;
        Ok(())
    }

    /// Activates or deactivates a merchant.
    pub fn set_active(&self, id: Uuid, active: bool) -> Result<(), MerchantError> {
        let mut merchant = self
            .merchants
            .get_mut(&id)
            .ok_or(MerchantError::NotFound(id))?;
        merchant.active = active;
        Ok(())
    }

    /// Number of registered merchants, active or not.
    pub fn count(&self) -> usize {
        self.merchants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "0x00000000000000000000000000000000000000cc";

    #[test]
    fn register_with_default_fee() {
        let registry = MerchantRegistry::new();
        let m = registry.register("Acme API Credits", ADDR, None).unwrap();
        assert_eq!(m.fee_bps, DEFAULT_FEE_BPS);
        assert!(m.active);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn register_with_negotiated_fee() {
        let registry = MerchantRegistry::new();
        let m = registry.register("Acme", ADDR, Some(150)).unwrap();
        assert_eq!(m.fee_bps, 150);
    }

    #[test]
    fn fee_above_cap_rejected() {
        let registry = MerchantRegistry::new();
        let result = registry.register("Greedy", ADDR, Some(MAX_FEE_BPS + 1));
        assert!(matches!(result, Err(MerchantError::FeeTooHigh(_))));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn duplicate_settlement_address_rejected() {
        let registry = MerchantRegistry::new();
        registry.register("First", ADDR, None).unwrap();
        let result = registry.register("Second", ADDR, None);
        assert!(matches!(
            result,
            Err(MerchantError::AddressAlreadyRegistered(_))
        ));
    }

    #[test]
    fn fee_update_respects_cap() {
        let registry = MerchantRegistry::new();
        let m = registry.register("Acme", ADDR, None).unwrap();

        registry.set_fee(m.id, 250).unwrap();
        assert_eq!(registry.get(m.id).unwrap().fee_bps, 250);

        assert!(matches!(
            registry.set_fee(m.id, MAX_FEE_BPS + 1),
            Err(MerchantError::FeeTooHigh(_))
        ));
    }

    #[test]
    fn deactivation_keeps_the_record() {
        let registry = MerchantRegistry::new();
        let m = registry.register("Acme", ADDR, None).unwrap();
        registry.set_active(m.id, false).unwrap();

        let stored = registry.get(m.id).unwrap();
        assert!(!stored.active);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unknown_merchant_errors() {
        let registry = MerchantRegistry::new();
        assert!(matches!(
            registry.set_fee(Uuid::new_v4(), 100),
            Err(MerchantError::NotFound(_))
        ));
    }
}
