//! # Transaction Store
//!
//! In-process store for settlement transactions with the one guarantee
//! the orchestrator cannot live without: idempotency-key insertion is
//! atomic. Two concurrent spends bearing the same key race on a single
//! `DashMap::entry` call; exactly one creates a record, the other gets
//! the winner's id back. That entry call is the unique-constraint a
//! database would provide.
//!
//! Status transitions go through [`TransactionStore::transition`], which
//! refuses moves the state machine does not allow. Durable persistence is
//! an adapter concern; this store provides the transactional semantics.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::settlement::error::SettlementError;
use crate::settlement::transaction::{TransactionRecord, TransactionStatus};

/// Transactions by id, plus the idempotency-key index.
#[derive(Default)]
pub struct TransactionStore {
    transactions: DashMap<Uuid, TransactionRecord>,
    by_idempotency_key: DashMap<String, Uuid>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new transaction, atomically claiming its idempotency
    /// key. If the key is already claimed, returns `Err` with the
    /// existing transaction's id and inserts nothing.
    pub fn insert_new(&self, record: TransactionRecord) -> Result<(), Uuid> {
        let id = record.id;
        let key = record.idempotency_key.clone();
        // Record before key claim: any id read out of the index always
        // resolves to a record.
        self.transactions.insert(id, record);
        match self.by_idempotency_key.entry(key) {
            Entry::Occupied(existing) => {
                self.transactions.remove(&id);
                Err(*existing.get())
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    /// Snapshot of a transaction by id.
    pub fn get(&self, id: Uuid) -> Option<TransactionRecord> {
        self.transactions.get(&id).map(|r| r.clone())
    }

    /// Snapshot by idempotency key.
    pub fn get_by_idempotency_key(&self, key: &str) -> Option<TransactionRecord> {
        let id = *self.by_idempotency_key.get(key)?;
        self.get(id)
    }

    /// Moves a transaction to `next`, enforcing state-machine legality,
    /// and applies `apply` to the record under the same lock.
    pub fn transition(
        &self,
        id: Uuid,
        next: TransactionStatus,
        apply: impl FnOnce(&mut TransactionRecord),
    ) -> Result<TransactionRecord, SettlementError> {
        let mut record = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("transaction {id}")))?;

        if !record.can_transition_to(next) {
            return Err(SettlementError::Conflict(format!(
                "transaction {id} cannot move from {} to {next}",
                record.status
            )));
        }

        record.status = next;
        if next.is_terminal() && next != TransactionStatus::Confirmed {
            record.signing_deadline = None;
        }
        if next == TransactionStatus::Confirmed {
            record.settled_at = Some(Utc::now());
            record.signing_deadline = None;
        }
        apply(&mut record);
        Ok(record.clone())
    }

    /// Atomically fails a transaction if, and only if, it is still parked
    /// in `Signing` past its reservation deadline. Returns the failed
    /// snapshot, or `None` if the transaction moved on (resumed, settled,
    /// or already rolled back) in the meantime. The check and the write
    /// happen under one record lock, so an expiry can never clobber a
    /// broadcast that won the race.
    pub fn fail_if_signing_expired(&self, id: Uuid, kind: &str) -> Option<TransactionRecord> {
        let mut record = self.transactions.get_mut(&id)?;
        let expired = record.status == TransactionStatus::Signing
            && record.signing_deadline.is_some_and(|d| d < Utc::now());
        if !expired {
            return None;
        }
        record.status = TransactionStatus::Failed;
        record.failure_kind = Some(kind.to_string());
        record.signing_deadline = None;
        Some(record.clone())
    }

    /// Ids of transactions parked in `Signing` whose reservation deadline
    /// has passed. The orchestrator sweeps these and rolls them back.
    pub fn stale_signing_ids(&self) -> Vec<Uuid> {
        let now = Utc::now();
        self.transactions
            .iter()
            .filter(|r| {
                r.status == TransactionStatus::Signing
                    && r.signing_deadline.is_some_and(|d| d < now)
            })
            .map(|r| r.id)
            .collect()
    }

    /// All transactions for one agent, newest first.
    pub fn transactions_for_agent(&self, agent_id: Uuid) -> Vec<TransactionRecord> {
        let mut out: Vec<TransactionRecord> = self
            .transactions
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Total number of stored transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::transaction::TransactionKind;

    fn record(key: &str) -> TransactionRecord {
        TransactionRecord {
            id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            merchant_id: None,
            recipient_agent_id: None,
            amount: 100,
            fee: 1,
            net_amount: 99,
            status: TransactionStatus::PendingApproval,
            kind: TransactionKind::AgentToMerchant,
            tx_hash: None,
            recipient_address: "0x00000000000000000000000000000000000000dd".into(),
            network_id: "base-sepolia".into(),
            idempotency_key: key.into(),
            verdict: None,
            failure_kind: None,
            signing_deadline: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn duplicate_idempotency_key_returns_existing_id() {
        let store = TransactionStore::new();
        let first = record("key-1");
        let first_id = first.id;
        store.insert_new(first).unwrap();

        let result = store.insert_new(record("key-1"));
        assert_eq!(result, Err(first_id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookup_by_idempotency_key() {
        let store = TransactionStore::new();
        let r = record("key-2");
        let id = r.id;
        store.insert_new(r).unwrap();
        assert_eq!(store.get_by_idempotency_key("key-2").unwrap().id, id);
        assert!(store.get_by_idempotency_key("missing").is_none());
    }

    #[test]
    fn legal_transition_applies() {
        let store = TransactionStore::new();
        let r = record("key-3");
        let id = r.id;
        store.insert_new(r).unwrap();

        let updated = store
            .transition(id, TransactionStatus::Approved, |_| {})
            .unwrap();
        assert_eq!(updated.status, TransactionStatus::Approved);
    }

    #[test]
    fn illegal_transition_is_a_conflict() {
        let store = TransactionStore::new();
        let r = record("key-4");
        let id = r.id;
        store.insert_new(r).unwrap();

        let result = store.transition(id, TransactionStatus::Confirmed, |_| {});
        assert!(matches!(result, Err(SettlementError::Conflict(_))));
        // Record untouched.
        assert_eq!(store.get(id).unwrap().status, TransactionStatus::PendingApproval);
    }

    #[test]
    fn confirmation_stamps_settled_at() {
        let store = TransactionStore::new();
        let r = record("key-5");
        let id = r.id;
        store.insert_new(r).unwrap();

        store.transition(id, TransactionStatus::Approved, |_| {}).unwrap();
        store.transition(id, TransactionStatus::Signing, |_| {}).unwrap();
        store.transition(id, TransactionStatus::Broadcasting, |_| {}).unwrap();
        let confirmed = store
            .transition(id, TransactionStatus::Confirmed, |r| {
                r.tx_hash = Some("0xabc".into());
            })
            .unwrap();

        assert!(confirmed.settled_at.is_some());
        assert_eq!(confirmed.tx_hash.as_deref(), Some("0xabc"));
    }

    #[test]
    fn repayment_records_confirm_directly() {
        let store = TransactionStore::new();
        let mut r = record("repay-key");
        r.kind = TransactionKind::Repayment;
        let id = r.id;
        store.insert_new(r).unwrap();

        let confirmed = store
            .transition(id, TransactionStatus::Confirmed, |_| {})
            .unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Confirmed);
        assert!(confirmed.settled_at.is_some());

        // A spend record attempting the same jump is still a conflict.
        let spend = record("spend-key");
        let spend_id = spend.id;
        store.insert_new(spend).unwrap();
        let result = store.transition(spend_id, TransactionStatus::Confirmed, |_| {});
        assert!(matches!(result, Err(SettlementError::Conflict(_))));
    }

    #[test]
    fn stale_signing_sweep_finds_expired_only() {
        let store = TransactionStore::new();

        let mut parked = record("key-6");
        parked.status = TransactionStatus::Signing;
        parked.signing_deadline = Some(Utc::now() - chrono::Duration::seconds(1));
        let parked_id = parked.id;
        store.insert_new(parked).unwrap();

        let mut fresh = record("key-7");
        fresh.status = TransactionStatus::Signing;
        fresh.signing_deadline = Some(Utc::now() + chrono::Duration::minutes(10));
        store.insert_new(fresh).unwrap();

        let stale = store.stale_signing_ids();
        assert_eq!(stale, vec![parked_id]);
    }

    #[test]
    fn concurrent_inserts_with_same_key_admit_one() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(TransactionStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.insert_new(record("shared-key")).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
