//! Remote data service seam.
//!
//! The sync engine depends only on this contract: create/update/delete
//! operations that return the authoritative stored record, including its
//! server-assigned identifier. Transport details live behind the trait.
//!
//! [`InMemoryRemote`] is a complete in-process implementation used by tests
//! and demos, with a kill switch for simulating outages.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

use crate::records::{
    CachedCustomer, CachedTransaction, CustomerDraft, CustomerPatch, TransactionDraft,
    TransactionPatch,
};

#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// The service understood and refused the call
    #[error("Remote service rejected the call: {0}")]
    Rejected(String),
    /// The service could not be reached or answered abnormally;
    /// timeouts land here too
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),
}

/// The remote collaborator's contract.
///
/// Each mutating call returns the authoritative stored record so callers can
/// overwrite their cached copy with server truth.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn create_customer(&self, draft: &CustomerDraft) -> Result<CachedCustomer, RemoteError>;

    async fn update_customer(
        &self,
        id: &str,
        patch: &CustomerPatch,
    ) -> Result<CachedCustomer, RemoteError>;

    /// Idempotent: deleting an already-deleted customer succeeds, so a
    /// replayed delete after a partial failure cannot wedge the queue.
    async fn delete_customer(&self, id: &str) -> Result<(), RemoteError>;

    async fn create_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<CachedTransaction, RemoteError>;

    async fn update_transaction(
        &self,
        id: &str,
        patch: &TransactionPatch,
    ) -> Result<CachedTransaction, RemoteError>;
}

/// In-process implementation of [`RemoteService`].
///
/// Assigns sequential `cus_N` / `txn_N` identifiers and keeps customer
/// balances in sync with their transactions, the way the real service does.
pub struct InMemoryRemote {
    customers: DashMap<String, CachedCustomer>,
    transactions: DashMap<String, CachedTransaction>,
    next_id: AtomicU64,
    reject_all: AtomicBool,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            customers: DashMap::new(),
            transactions: DashMap::new(),
            next_id: AtomicU64::new(1),
            reject_all: AtomicBool::new(false),
        }
    }

    /// Make every call fail with [`RemoteError::Unavailable`] until cleared.
    pub fn set_reject_all(&self, reject: bool) {
        self.reject_all.store(reject, Ordering::Release);
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.reject_all.load(Ordering::Acquire) {
            Err(RemoteError::Unavailable("remote unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Server-side copy of a customer, if present.
    #[must_use]
    pub fn customer(&self, id: &str) -> Option<CachedCustomer> {
        self.customers.get(id).map(|r| r.value().clone())
    }

    /// Server-side copy of a transaction, if present.
    #[must_use]
    pub fn transaction(&self, id: &str) -> Option<CachedTransaction> {
        self.transactions.get(id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteService for InMemoryRemote {
    async fn create_customer(&self, draft: &CustomerDraft) -> Result<CachedCustomer, RemoteError> {
        self.check_available()?;

        let customer = CachedCustomer {
            id: self.fresh_id("cus"),
            owner_id: draft.owner_id.clone(),
            name: draft.name.clone(),
            phone: draft.phone.clone(),
            address: draft.address.clone(),
            notes: draft.notes.clone(),
            balance: Decimal::ZERO,
            transaction_count: Some(0),
            last_transaction_date: None,
            is_deleted: None,
            created_at: draft.created_at,
            cached_at: 0,
        };
        self.customers.insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }

    async fn update_customer(
        &self,
        id: &str,
        patch: &CustomerPatch,
    ) -> Result<CachedCustomer, RemoteError> {
        self.check_available()?;

        let mut entry = self
            .customers
            .get_mut(id)
            .ok_or_else(|| RemoteError::Rejected(format!("no such customer '{}'", id)))?;
        patch.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn delete_customer(&self, id: &str) -> Result<(), RemoteError> {
        self.check_available()?;

        self.customers.remove(id);
        Ok(())
    }

    async fn create_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<CachedTransaction, RemoteError> {
        self.check_available()?;

        let mut customer = self
            .customers
            .get_mut(&draft.customer_id)
            .ok_or_else(|| {
                RemoteError::Rejected(format!("no such customer '{}'", draft.customer_id))
            })?;

        let transaction_date = draft.transaction_date.unwrap_or(draft.created_at);
        let txn = CachedTransaction {
            id: self.fresh_id("txn"),
            owner_id: draft.owner_id.clone(),
            customer_id: draft.customer_id.clone(),
            kind: draft.kind,
            amount: draft.amount,
            description: draft.description.clone(),
            transaction_date: Some(transaction_date),
            created_at: draft.created_at,
            customer_name: Some(customer.name.clone()),
            cached_at: 0,
        };

        let c = customer.value_mut();
        c.balance = draft.kind.apply(c.balance, draft.amount);
        c.transaction_count = Some(c.transaction_count.unwrap_or(0) + 1);
        c.last_transaction_date = Some(transaction_date);
        drop(customer);

        self.transactions.insert(txn.id.clone(), txn.clone());
        Ok(txn)
    }

    async fn update_transaction(
        &self,
        id: &str,
        patch: &TransactionPatch,
    ) -> Result<CachedTransaction, RemoteError> {
        self.check_available()?;

        let mut entry = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| RemoteError::Rejected(format!("no such transaction '{}'", id)))?;
        patch.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }
}
