//! # Payment Orchestrator
//!
//! The one component allowed to compose the credit ledger, the vault, the
//! merchant registry, the co-signing crypto, and the external providers
//! into a settlement. Everything else in the engine is a leaf; this is
//! the trunk.
//!
//! A spend walks the fixed pipeline: idempotency gate, fee computation,
//! verdict, vault reservation, credit debit, co-sign, broadcast, settle.
//! Any failure after a reservation triggers a synchronous compensating
//! rollback (return the liquidity, release the credit) in the same call,
//! guarded by the Failed transition so a rollback runs at most once per
//! transaction.
//!
//! Co-signing is two-phase when the caller is not ready: a spend without
//! an agent shard parks at `signing` with its reservation and debit live
//! and a deadline attached. [`PaymentOrchestrator::submit_shard`] resumes
//! it; past the deadline the resume (or the
//! [`PaymentOrchestrator::expire_stale_signings`] sweep, whichever comes
//! first) rolls it back instead. Reserved money never outlives the
//! deadline.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{
    MicroUsd, AES_KEY_LENGTH, BPS_DENOMINATOR, BROADCAST_TIMEOUT, DEFAULT_FEE_BPS,
    MAX_CREDIT_LIMIT, SIGNING_RESERVATION_TTL, VERDICT_TIMEOUT,
};
use crate::crypto::{self, KeyShard};
use crate::ledger::{
    AgentRecord, AgentStatus, CreditLedger, KyaStatus, MerchantRegistry, VaultLedger,
};
use crate::settlement::error::SettlementError;
use crate::settlement::providers::{PermissionCheckRequest, PermissionProvider, ProviderSet};
use crate::settlement::store::TransactionStore;
use crate::settlement::transaction::{
    TransactionKind, TransactionRecord, TransactionStatus, Verdict,
};

// ---------------------------------------------------------------------------
// Requests & responses
// ---------------------------------------------------------------------------

/// A spend submission. `merchant_id` and `recipient_agent_id` are
/// mutually exclusive; supplying neither means a plain transfer to
/// `recipient_address` at the default fee rate.
#[derive(Clone, Debug, Deserialize)]
pub struct SpendRequest {
    pub agent_id: Uuid,
    pub recipient_address: String,
    /// Gross amount, micro-USD. Must be positive.
    pub amount: MicroUsd,
    /// Globally unique; replays return the existing transaction.
    pub idempotency_key: String,
    /// Settlement network to broadcast on.
    pub network_id: String,
    pub merchant_id: Option<Uuid>,
    pub recipient_agent_id: Option<Uuid>,
    /// The agent's key shard, hex. Absent parks the spend at `signing`
    /// until [`PaymentOrchestrator::submit_shard`].
    pub agent_shard: Option<String>,
}

/// What a caller gets back for a spend, repayment, or replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpendOutcome {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub fee: MicroUsd,
    pub net_amount: MicroUsd,
    pub verdict: Option<Verdict>,
    pub tx_hash: Option<String>,
    pub awaiting_agent_signature: bool,
    /// Machine-readable error kind when the transaction failed.
    pub failure_kind: Option<String>,
}

impl SpendOutcome {
    fn from_record(record: &TransactionRecord) -> Self {
        Self {
            transaction_id: record.id,
            status: record.status,
            fee: record.fee,
            net_amount: record.net_amount,
            verdict: record.verdict.clone(),
            tx_hash: record.tx_hash.clone(),
            awaiting_agent_signature: record.awaiting_agent_signature(),
            failure_kind: record.failure_kind.clone(),
        }
    }
}

/// Result of provisioning a new agent: the persisted record plus the
/// agent's key shard, returned exactly once and never stored.
pub struct AgentOnboarding {
    pub agent: AgentRecord,
    /// Hex-encoded agent shard. Hand it to the agent and forget it.
    pub agent_shard: String,
}

// ---------------------------------------------------------------------------
// PaymentOrchestrator
// ---------------------------------------------------------------------------

/// Composes the ledgers, the co-signer, and the injected providers into
/// settlement flows. Cheap to share behind an `Arc`; all internal state
/// is already synchronized.
pub struct PaymentOrchestrator {
    credit: Arc<CreditLedger>,
    vault: Arc<VaultLedger>,
    merchants: Arc<MerchantRegistry>,
    store: TransactionStore,
    permission: Arc<dyn PermissionProvider>,
    providers: ProviderSet,
    /// Master key sealing every agent's server shard at rest.
    encryption_key: Zeroizing<[u8; AES_KEY_LENGTH]>,
    /// How long a parked spend keeps its reservations.
    signing_ttl: ChronoDuration,
    /// Makes `Repay` + `ReturnLiquidity` one atomic unit.
    repayment_lock: Mutex<()>,
}

impl PaymentOrchestrator {
    pub fn new(
        credit: Arc<CreditLedger>,
        vault: Arc<VaultLedger>,
        merchants: Arc<MerchantRegistry>,
        permission: Arc<dyn PermissionProvider>,
        providers: ProviderSet,
        encryption_key: [u8; AES_KEY_LENGTH],
    ) -> Self {
        Self {
            credit,
            vault,
            merchants,
            store: TransactionStore::new(),
            permission,
            providers,
            encryption_key: Zeroizing::new(encryption_key),
            signing_ttl: ChronoDuration::from_std(SIGNING_RESERVATION_TTL)
                .unwrap_or(ChronoDuration::zero()),
            repayment_lock: Mutex::new(()),
        }
    }

    /// Overrides the default signing-reservation TTL
    /// ([`SIGNING_RESERVATION_TTL`]). Deployments with slower co-signers
    /// raise it; tests shrink it.
    pub fn with_signing_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.signing_ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero());
        self
    }

    // -----------------------------------------------------------------------
    // Agent provisioning
    // -----------------------------------------------------------------------

    /// Provisions a new agent: generates a split settlement key, seals the
    /// server shard, registers the credit record, and returns the agent
    /// shard for the one time it will ever be visible.
    pub fn register_agent(
        &self,
        owner_address: &str,
        credit_limit: MicroUsd,
    ) -> Result<AgentOnboarding, SettlementError> {
        if credit_limit > MAX_CREDIT_LIMIT {
            return Err(SettlementError::Validation(format!(
                "credit limit {credit_limit} exceeds the system maximum {MAX_CREDIT_LIMIT}"
            )));
        }

        let generated = crypto::generate(&self.encryption_key)?;
        let record = AgentRecord {
            id: Uuid::new_v4(),
            wallet_address: generated.address.clone(),
            owner_address: owner_address.to_string(),
            credit_limit,
            used_credit: 0,
            status: AgentStatus::Active,
            kya_status: KyaStatus::Pending,
            risk_score: 50,
            public_key: generated.public_key.clone(),
            encrypted_server_shard: generated.encrypted_server_shard.clone(),
            created_at: Utc::now(),
        };
        self.credit.register(record.clone())?;

        info!(
            agent_id = %record.id,
            wallet = %record.wallet_address,
            "agent provisioned"
        );
        Ok(AgentOnboarding {
            agent: record,
            agent_shard: generated.agent_shard.to_hex(),
        })
    }

    // -----------------------------------------------------------------------
    // Spend pipeline
    // -----------------------------------------------------------------------

    /// Executes (or resumes, via the idempotency gate) a spend.
    pub async fn spend(&self, req: SpendRequest) -> Result<SpendOutcome, SettlementError> {
        self.validate(&req)?;

        let agent = self.credit.get(req.agent_id)?;
        let (kind, fee_bps) = self.resolve_recipient(&req)?;
        let fee = mul_bps(req.amount, fee_bps);
        let net_amount = req.amount - fee;

        // Idempotency gate: exactly one caller per key creates the record.
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            agent_id: req.agent_id,
            merchant_id: req.merchant_id,
            recipient_agent_id: req.recipient_agent_id,
            amount: req.amount,
            fee,
            net_amount,
            status: TransactionStatus::PendingApproval,
            kind,
            tx_hash: None,
            recipient_address: req.recipient_address.clone(),
            network_id: req.network_id.clone(),
            idempotency_key: req.idempotency_key.clone(),
            verdict: None,
            failure_kind: None,
            signing_deadline: None,
            created_at: Utc::now(),
            settled_at: None,
        };
        let tx_id = record.id;
        if let Err(existing) = self.store.insert_new(record) {
            let snapshot = self
                .store
                .get(existing)
                .ok_or_else(|| SettlementError::NotFound(format!("transaction {existing}")))?;
            debug!(
                transaction_id = %existing,
                idempotency_key = %req.idempotency_key,
                "idempotent replay, returning existing transaction"
            );
            return Ok(SpendOutcome::from_record(&snapshot));
        }

        info!(
            transaction_id = %tx_id,
            agent_id = %req.agent_id,
            amount = req.amount,
            fee,
            net_amount,
            kind = %kind,
            "spend submitted"
        );

        // Verdict. Recorded on the transaction whichever way it goes.
        let check = PermissionCheckRequest {
            agent: agent.clone(),
            recipient_address: req.recipient_address.clone(),
            amount: req.amount,
            merchant_id: req.merchant_id,
            recipient_agent_id: req.recipient_agent_id,
        };
        let verdict = match timeout(VERDICT_TIMEOUT, self.permission.check(&check)).await {
            Err(_) => {
                let err = SettlementError::VerdictUnavailable("timed out".into());
                self.mark_failed_pre_reservation(tx_id, err.kind());
                return Err(err);
            }
            Ok(Err(provider_err)) => {
                let err = SettlementError::VerdictUnavailable(provider_err.to_string());
                self.mark_failed_pre_reservation(tx_id, err.kind());
                return Err(err);
            }
            Ok(Ok(verdict)) => verdict,
        };

        if !verdict.all_passed {
            let snapshot = self
                .store
                .transition(tx_id, TransactionStatus::Rejected, |r| {
                    r.verdict = Some(verdict)
                })?;
            info!(
                transaction_id = %tx_id,
                reasons = ?snapshot.verdict.as_ref().map(|v| &v.failure_reasons),
                "spend rejected by verdict"
            );
            return Ok(SpendOutcome::from_record(&snapshot));
        }
        self.store
            .transition(tx_id, TransactionStatus::Approved, |r| {
                r.verdict = Some(verdict)
            })?;

        // Reserve the net payout from the vault. Nothing to roll back yet.
        if let Err(vault_err) = self.vault.reserve_liquidity(net_amount) {
            let err: SettlementError = vault_err.into();
            self.mark_failed_pre_reservation(tx_id, err.kind());
            return Err(err);
        }

        // Debit the gross amount against the agent's credit line. The
        // agent owes the full amount back, fee included.
        if let Err(credit_err) = self.credit.reserve(req.agent_id, req.amount) {
            self.vault.return_liquidity(net_amount);
            let err: SettlementError = credit_err.into();
            self.mark_failed_pre_reservation(tx_id, err.kind());
            return Err(err);
        }

        // Both reservations live from here; every failure path below must
        // go through rollback_failed.
        match req.agent_shard {
            None => {
                let deadline = Utc::now() + self.signing_ttl;
                let snapshot = self
                    .store
                    .transition(tx_id, TransactionStatus::Signing, |r| {
                        r.signing_deadline = Some(deadline)
                    })
                    .map_err(|err| {
                        self.vault.return_liquidity(net_amount);
                        let _ = self.credit.release(req.agent_id, req.amount);
                        err
                    })?;
                info!(
                    transaction_id = %tx_id,
                    deadline = %deadline,
                    "spend parked awaiting agent signature"
                );
                Ok(SpendOutcome::from_record(&snapshot))
            }
            Some(ref shard_hex) => {
                if let Err(err) = self
                    .store
                    .transition(tx_id, TransactionStatus::Signing, |_| {})
                {
                    self.vault.return_liquidity(net_amount);
                    let _ = self.credit.release(req.agent_id, req.amount);
                    return Err(err);
                }
                match self.run_settlement(tx_id, shard_hex).await {
                    Ok(outcome) => Ok(outcome),
                    Err(err) => {
                        self.rollback_failed(tx_id, req.agent_id, req.amount, net_amount, &err);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Resumes a spend parked at `signing` with the agent's shard.
    ///
    /// A resume past the reservation deadline does not sign; it rolls the
    /// transaction back and reports the conflict. Two concurrent resumes
    /// race on the `signing -> broadcasting` transition; the loser gets a
    /// conflict and the winner's settlement proceeds alone.
    pub async fn submit_shard(
        &self,
        transaction_id: Uuid,
        agent_shard: &str,
    ) -> Result<SpendOutcome, SettlementError> {
        let record = self
            .store
            .get(transaction_id)
            .ok_or_else(|| SettlementError::NotFound(format!("transaction {transaction_id}")))?;

        if !record.awaiting_agent_signature() {
            // A rejected spend never held reservations; report the verdict
            // instead of a generic conflict.
            if record.status == TransactionStatus::Rejected {
                return Err(SettlementError::VerdictRejected {
                    transaction_id,
                    reasons: record
                        .verdict
                        .clone()
                        .map(|v| v.failure_reasons)
                        .unwrap_or_default(),
                });
            }
            return Err(SettlementError::Conflict(format!(
                "transaction {transaction_id} is not awaiting an agent signature (status {})",
                record.status
            )));
        }
        if record.signing_deadline.is_some_and(|d| d < Utc::now()) {
            let err = SettlementError::Conflict(format!(
                "signing reservation for transaction {transaction_id} expired"
            ));
            // Atomic: only the caller that actually flips the record to
            // Failed restores the ledgers.
            if let Some(failed) = self
                .store
                .fail_if_signing_expired(transaction_id, err.kind())
            {
                self.restore_reservations(&failed);
            }
            return Err(err);
        }

        match self.run_settlement(transaction_id, agent_shard).await {
            Ok(outcome) => Ok(outcome),
            // A conflict means another resume won the signing ->
            // broadcasting race; its settlement is in flight and there is
            // nothing of ours to roll back.
            Err(err @ SettlementError::Conflict(_)) => Err(err),
            Err(err) => {
                self.rollback_failed(
                    transaction_id,
                    record.agent_id,
                    record.amount,
                    record.net_amount,
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Rolls back every parked spend whose signing deadline has passed.
    /// Returns how many were expired. Call this on whatever cadence the
    /// deployment likes; resumes past the deadline are caught either way.
    pub fn expire_stale_signings(&self) -> usize {
        let mut expired = 0;
        for id in self.store.stale_signing_ids() {
            if let Some(failed) = self.store.fail_if_signing_expired(id, "conflict") {
                self.restore_reservations(&failed);
                warn!(
                    transaction_id = %id,
                    agent_id = %failed.agent_id,
                    "signing reservation expired, spend rolled back"
                );
                expired += 1;
            }
        }
        expired
    }

    // -----------------------------------------------------------------------
    // Repayment
    // -----------------------------------------------------------------------

    /// Pays down an agent's outstanding balance and returns the repaid
    /// funds to the vault as one atomic unit. Repaying to zero cures
    /// delinquency. Records a confirmed `repayment` transaction.
    pub fn repay(
        &self,
        agent_id: Uuid,
        amount: MicroUsd,
        idempotency_key: &str,
    ) -> Result<SpendOutcome, SettlementError> {
        if amount == 0 {
            return Err(SettlementError::Validation(
                "repayment amount must be positive".into(),
            ));
        }
        if idempotency_key.is_empty() {
            return Err(SettlementError::Validation(
                "idempotency key must not be empty".into(),
            ));
        }
        let agent = self.credit.get(agent_id)?;

        let record = TransactionRecord {
            id: Uuid::new_v4(),
            agent_id,
            merchant_id: None,
            recipient_agent_id: None,
            amount,
            fee: 0,
            net_amount: amount,
            status: TransactionStatus::PendingApproval,
            kind: TransactionKind::Repayment,
            tx_hash: None,
            recipient_address: "vault".into(),
            network_id: "internal".into(),
            idempotency_key: idempotency_key.to_string(),
            verdict: None,
            failure_kind: None,
            signing_deadline: None,
            created_at: Utc::now(),
            settled_at: None,
        };
        let tx_id = record.id;
        if let Err(existing) = self.store.insert_new(record) {
            let snapshot = self
                .store
                .get(existing)
                .ok_or_else(|| SettlementError::NotFound(format!("transaction {existing}")))?;
            return Ok(SpendOutcome::from_record(&snapshot));
        }

        // Repay + return-liquidity must be observed together.
        let _guard = self.repayment_lock.lock();
        let actual = match self.credit.repay(agent_id, amount) {
            Ok(actual) => actual,
            Err(credit_err) => {
                let err: SettlementError = credit_err.into();
                self.mark_failed_pre_reservation(tx_id, err.kind());
                return Err(err);
            }
        };
        self.vault.return_liquidity(actual);

        // Repayments settle internally; the state machine admits the
        // pending_approval -> confirmed jump for this kind only.
        let snapshot = self
            .store
            .transition(tx_id, TransactionStatus::Confirmed, |r| {
                r.amount = actual;
                r.net_amount = actual;
            })?;

        info!(
            transaction_id = %tx_id,
            agent_id = %agent_id,
            requested = amount,
            repaid = actual,
            wallet = %agent.wallet_address,
            "repayment settled"
        );
        Ok(SpendOutcome::from_record(&snapshot))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Snapshot of one transaction.
    pub fn transaction(&self, id: Uuid) -> Option<TransactionRecord> {
        self.store.get(id)
    }

    /// Snapshot by idempotency key.
    pub fn transaction_by_key(&self, key: &str) -> Option<TransactionRecord> {
        self.store.get_by_idempotency_key(key)
    }

    /// All transactions for one agent, newest first.
    pub fn transactions_for_agent(&self, agent_id: Uuid) -> Vec<TransactionRecord> {
        self.store.transactions_for_agent(agent_id)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn validate(&self, req: &SpendRequest) -> Result<(), SettlementError> {
        if req.amount == 0 {
            return Err(SettlementError::Validation(
                "amount must be positive".into(),
            ));
        }
        if req.idempotency_key.is_empty() {
            return Err(SettlementError::Validation(
                "idempotency key must not be empty".into(),
            ));
        }
        if !is_canonical_address(&req.recipient_address) {
            return Err(SettlementError::Validation(format!(
                "recipient address {:?} is not a canonical 0x address",
                req.recipient_address
            )));
        }
        if req.merchant_id.is_some() && req.recipient_agent_id.is_some() {
            return Err(SettlementError::Validation(
                "merchant_id and recipient_agent_id are mutually exclusive".into(),
            ));
        }
        if !self.providers.supports(&req.network_id) {
            return Err(SettlementError::NotFound(format!(
                "settlement network {:?}",
                req.network_id
            )));
        }
        Ok(())
    }

    /// Resolves the transaction kind and fee rate from the named
    /// counterparty, before any record exists.
    fn resolve_recipient(
        &self,
        req: &SpendRequest,
    ) -> Result<(TransactionKind, u32), SettlementError> {
        if let Some(merchant_id) = req.merchant_id {
            let merchant = self
                .merchants
                .get(merchant_id)
                .ok_or_else(|| SettlementError::NotFound(format!("merchant {merchant_id}")))?;
            if !merchant.active {
                return Err(SettlementError::NotFound(format!(
                    "merchant {merchant_id} is not accepting payments"
                )));
            }
            return Ok((TransactionKind::AgentToMerchant, merchant.fee_bps));
        }
        if let Some(recipient_agent_id) = req.recipient_agent_id {
            // Must exist; its wallet is where the funds land.
            self.credit.get(recipient_agent_id).map_err(|_| {
                SettlementError::NotFound(format!("recipient agent {recipient_agent_id}"))
            })?;
            return Ok((TransactionKind::AgentToAgent, DEFAULT_FEE_BPS));
        }
        Ok((TransactionKind::AgentToAgent, DEFAULT_FEE_BPS))
    }

    /// Sign and broadcast. No rollback in here; callers own that, so it
    /// happens exactly once however this function is reached.
    async fn run_settlement(
        &self,
        tx_id: Uuid,
        shard_hex: &str,
    ) -> Result<SpendOutcome, SettlementError> {
        let record = self
            .store
            .get(tx_id)
            .ok_or_else(|| SettlementError::NotFound(format!("transaction {tx_id}")))?;
        let agent = self.credit.get(record.agent_id)?;

        let shard = KeyShard::from_hex(shard_hex)?;
        let key = crypto::reconstruct(
            &agent.encrypted_server_shard,
            &self.encryption_key,
            &shard,
        )?;
        // A shard that decrypts-and-adds to the wrong key is still the
        // wrong shard.
        if !key
            .public_key_hex()
            .eq_ignore_ascii_case(&agent.public_key)
        {
            return Err(SettlementError::InvalidShard);
        }

        let digest = canonical_digest(
            record.id,
            &record.recipient_address,
            record.net_amount,
            &record.network_id,
        );
        let signature = key.sign_digest(&digest)?;
        debug!(
            transaction_id = %tx_id,
            signature = %signature.to_hex(),
            "transfer digest co-signed"
        );

        let provider = self.providers.get(&record.network_id).ok_or_else(|| {
            SettlementError::NotFound(format!("settlement network {:?}", record.network_id))
        })?;

        self.store
            .transition(tx_id, TransactionStatus::Broadcasting, |r| {
                r.signing_deadline = None
            })?;

        let receipt = match timeout(
            BROADCAST_TIMEOUT,
            provider.transfer_with_key(&key, &record.recipient_address, record.net_amount),
        )
        .await
        {
            Err(_) => return Err(SettlementError::BroadcastTimeout),
            Ok(Err(provider_err)) => {
                return Err(SettlementError::Broadcast(provider_err.to_string()))
            }
            Ok(Ok(receipt)) => receipt,
        };
        if !receipt.confirmed {
            return Err(SettlementError::Broadcast(
                "provider reported non-confirmation".into(),
            ));
        }

        let snapshot = self
            .store
            .transition(tx_id, TransactionStatus::Confirmed, |r| {
                r.tx_hash = Some(receipt.tx_hash.clone())
            })?;

        // The transfer is onchain; a fee-injection failure here is an
        // accounting error to alarm on, not something we can roll back.
        if let Err(vault_err) = self.vault.inject_fee(record.fee) {
            error!(
                transaction_id = %tx_id,
                fee = record.fee,
                error = %vault_err,
                "fee injection failed after confirmed settlement"
            );
        }

        info!(
            transaction_id = %tx_id,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            "settlement confirmed"
        );
        Ok(SpendOutcome::from_record(&snapshot))
    }

    /// Marks a transaction failed before any reservation existed. No
    /// ledger state to restore.
    fn mark_failed_pre_reservation(&self, tx_id: Uuid, kind: &str) {
        if let Err(err) = self
            .store
            .transition(tx_id, TransactionStatus::Failed, |r| {
                r.failure_kind = Some(kind.to_string())
            })
        {
            warn!(transaction_id = %tx_id, error = %err, "could not mark transaction failed");
        }
    }

    /// Returns a failed transaction's reservations to the ledgers. Only
    /// ever called by whichever path won the flip to `Failed`.
    fn restore_reservations(&self, record: &TransactionRecord) {
        self.vault.return_liquidity(record.net_amount);
        if let Err(release_err) = self.credit.release(record.agent_id, record.amount) {
            warn!(
                transaction_id = %record.id,
                agent_id = %record.agent_id,
                error = %release_err,
                "credit release failed during rollback"
            );
        }
    }

    /// Compensating rollback: restore the vault and credit reservations
    /// and mark the transaction failed. The Failed transition doubles as
    /// the exactly-once guard; if the record is already terminal the
    /// ledgers were already restored (or the spend settled) and this is a
    /// no-op.
    fn rollback_failed(
        &self,
        tx_id: Uuid,
        agent_id: Uuid,
        amount: MicroUsd,
        net_amount: MicroUsd,
        cause: &SettlementError,
    ) {
        match self
            .store
            .transition(tx_id, TransactionStatus::Failed, |r| {
                r.failure_kind = Some(cause.kind().to_string())
            }) {
            Ok(failed) => {
                self.restore_reservations(&failed);
                warn!(
                    transaction_id = %tx_id,
                    agent_id = %agent_id,
                    amount,
                    net_amount,
                    kind = cause.kind(),
                    "settlement failed, reservations rolled back"
                );
            }
            Err(_) => {
                debug!(
                    transaction_id = %tx_id,
                    "rollback skipped, transaction already terminal"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

/// `amount * bps / 10_000`, truncated, in `u128` so the product cannot
/// overflow.
fn mul_bps(amount: MicroUsd, bps: u32) -> MicroUsd {
    ((amount as u128 * bps as u128) / BPS_DENOMINATOR as u128) as MicroUsd
}

/// `0x` + 40 hex characters.
fn is_canonical_address(addr: &str) -> bool {
    addr.len() == 42
        && addr.starts_with("0x")
        && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// The canonical transfer digest both co-signers commit to: Keccak-256
/// over a fixed-layout encoding of the transaction identity and transfer
/// terms. Variable-length fields are length-prefixed so no two distinct
/// transfers can share an encoding.
pub fn canonical_digest(
    transaction_id: Uuid,
    recipient_address: &str,
    net_amount: MicroUsd,
    network_id: &str,
) -> [u8; 32] {
    let recipient = recipient_address.to_ascii_lowercase();
    let mut hasher = Keccak256::new();
    hasher.update(b"PAYLINE/transfer/v1");
    hasher.update(transaction_id.as_bytes());
    hasher.update(net_amount.to_be_bytes());
    hasher.update((recipient.len() as u32).to_be_bytes());
    hasher.update(recipient.as_bytes());
    hasher.update((network_id.len() as u32).to_be_bytes());
    hasher.update(network_id.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_math_truncates() {
        // $100.00 at 150 bps = $1.50 exactly.
        assert_eq!(mul_bps(100_000_000, 150), 1_500_000);
        // 1 micro-USD at 1 bp truncates to zero.
        assert_eq!(mul_bps(1, 1), 0);
        // No overflow at the money ceiling.
        assert_eq!(mul_bps(u64::MAX, 10_000), u64::MAX);
    }

    #[test]
    fn address_validation() {
        assert!(is_canonical_address(
            "0x00000000000000000000000000000000000000aa"
        ));
        assert!(!is_canonical_address("0x123"));
        assert!(!is_canonical_address(
            "0x00000000000000000000000000000000000000zz"
        ));
        assert!(!is_canonical_address(
            "1x00000000000000000000000000000000000000aa"
        ));
    }

    #[test]
    fn digest_is_deterministic_and_field_sensitive() {
        let id = Uuid::new_v4();
        let a = canonical_digest(id, "0xAA", 100, "base-sepolia");
        let b = canonical_digest(id, "0xaa", 100, "base-sepolia");
        // Address case does not matter.
        assert_eq!(a, b);

        assert_ne!(a, canonical_digest(id, "0xaa", 101, "base-sepolia"));
        assert_ne!(a, canonical_digest(id, "0xab", 100, "base-sepolia"));
        assert_ne!(a, canonical_digest(id, "0xaa", 100, "mainnet"));
        assert_ne!(a, canonical_digest(Uuid::new_v4(), "0xaa", 100, "base-sepolia"));
    }
}
