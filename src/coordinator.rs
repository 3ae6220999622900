// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator: the single entry point for mutating user actions.
//!
//! Per action the coordinator decides the online or offline path:
//!
//! - **Online**: call the remote service; on success cache the authoritative
//!   result and return it. A remote failure does not surface to the caller —
//!   the action degrades to the offline path instead (resilience over strict
//!   consistency).
//! - **Offline**: generate a temp id for creates, write an optimistic record
//!   into the entity cache, enqueue the intended remote effect, and return
//!   the optimistic record immediately.
//!
//! All mutating callers go through here rather than writing the local store
//! directly; together with the processor's single-active-run guard this is
//! what keeps cache and queue free of lost updates.

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::notify::SyncNotifier;
use crate::queue::{MutationAction, MutationQueue};
use crate::records::{
    now_millis, temp_id, CachedCustomer, CachedTransaction, CustomerDraft, CustomerPatch,
    TransactionDraft, TransactionPatch,
};
use crate::remote::RemoteService;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Transaction amounts must be positive; the kind carries the sign
    #[error("Invalid amount: must be positive, got {0}")]
    InvalidAmount(Decimal),
    /// The record to update does not exist locally or remotely
    #[error("Unknown record '{0}'")]
    UnknownRecord(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decides, per user action, between the remote call and the optimistic
/// offline path.
pub struct SyncCoordinator {
    cache: Arc<EntityCache>,
    queue: Arc<MutationQueue>,
    remote: Arc<dyn RemoteService>,
    online: watch::Receiver<bool>,
    notifier: Arc<SyncNotifier>,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(
        cache: Arc<EntityCache>,
        queue: Arc<MutationQueue>,
        remote: Arc<dyn RemoteService>,
        online: watch::Receiver<bool>,
        notifier: Arc<SyncNotifier>,
    ) -> Self {
        Self {
            cache,
            queue,
            remote,
            online,
            notifier,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Create a customer. Returns the authoritative record when online, the
    /// optimistic temp-id record otherwise.
    pub async fn create_customer(
        &self,
        draft: CustomerDraft,
    ) -> Result<CachedCustomer, CoordinatorError> {
        if self.is_online() {
            match self.remote.create_customer(&draft).await {
                Ok(stored) => {
                    self.cache.set_customer(&stored).await?;
                    return Ok(stored);
                }
                Err(err) => {
                    warn!(error = %err, "Remote create_customer failed, taking offline path");
                }
            }
        }

        let id = temp_id();
        let record = CachedCustomer {
            id: id.clone(),
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
        self.cache.set_customer(&record).await?;
        self.enqueue(MutationAction::CreateCustomer { temp_id: id, draft })
            .await?;
        Ok(record)
    }

    /// Update a customer's fields.
    pub async fn update_customer(
        &self,
        id: &str,
        patch: CustomerPatch,
    ) -> Result<CachedCustomer, CoordinatorError> {
        if self.is_online() {
            match self.remote.update_customer(id, &patch).await {
                Ok(stored) => {
                    self.cache.set_customer(&stored).await?;
                    return Ok(stored);
                }
                Err(err) => {
                    warn!(id, error = %err, "Remote update_customer failed, taking offline path");
                }
            }
        }

        let mut record = self
            .cache
            .customer(id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownRecord(id.to_string()))?;
        patch.apply_to(&mut record);
        self.cache.set_customer(&record).await?;
        self.enqueue(MutationAction::UpdateCustomer {
            id: id.to_string(),
            patch,
        })
        .await?;
        Ok(record)
    }

    /// Delete a customer. The cached record disappears immediately even when
    /// the remote deletion itself has to be queued.
    pub async fn delete_customer(&self, id: &str) -> Result<(), CoordinatorError> {
        self.cache.delete_customer(id).await?;

        if self.is_online() {
            match self.remote.delete_customer(id).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(id, error = %err, "Remote delete_customer failed, taking offline path");
                }
            }
        }

        self.enqueue(MutationAction::DeleteCustomer { id: id.to_string() })
            .await?;
        Ok(())
    }

    /// Record a debt/payment transaction. On either path the referenced
    /// customer's cached balance moves with the transaction so displayed
    /// balances stay consistent without a round trip.
    pub async fn create_transaction(
        &self,
        draft: TransactionDraft,
    ) -> Result<CachedTransaction, CoordinatorError> {
        if draft.amount <= Decimal::ZERO {
            return Err(CoordinatorError::InvalidAmount(draft.amount));
        }

        if self.is_online() {
            match self.remote.create_transaction(&draft).await {
                Ok(stored) => {
                    self.cache.set_transaction(&stored).await?;
                    self.adjust_customer_for(&stored.customer_id, &draft).await?;
                    return Ok(stored);
                }
                Err(err) => {
                    warn!(
                        customer_id = %draft.customer_id,
                        error = %err,
                        "Remote create_transaction failed, taking offline path"
                    );
                }
            }
        }

        let id = temp_id();
        let record = CachedTransaction {
            id: id.clone(),
            owner_id: draft.owner_id.clone(),
            customer_id: draft.customer_id.clone(),
            kind: draft.kind,
            amount: draft.amount,
            description: draft.description.clone(),
            transaction_date: Some(draft.transaction_date.unwrap_or(draft.created_at)),
            created_at: draft.created_at,
            customer_name: draft.customer_name.clone(),
            cached_at: 0,
        };
        self.cache.set_transaction(&record).await?;
        self.adjust_customer_for(&draft.customer_id, &draft).await?;
        self.enqueue(MutationAction::CreateTransaction { temp_id: id, draft })
            .await?;
        Ok(record)
    }

    /// Update a transaction's fields. Balances are not re-derived here; only
    /// creation moves the customer balance.
    pub async fn update_transaction(
        &self,
        id: &str,
        patch: TransactionPatch,
    ) -> Result<CachedTransaction, CoordinatorError> {
        if let Some(amount) = patch.amount {
            if amount <= Decimal::ZERO {
                return Err(CoordinatorError::InvalidAmount(amount));
            }
        }

        if self.is_online() {
            match self.remote.update_transaction(id, &patch).await {
                Ok(stored) => {
                    self.cache.set_transaction(&stored).await?;
                    return Ok(stored);
                }
                Err(err) => {
                    warn!(id, error = %err, "Remote update_transaction failed, taking offline path");
                }
            }
        }

        let mut record = self
            .cache
            .transaction(id)
            .await?
            .ok_or_else(|| CoordinatorError::UnknownRecord(id.to_string()))?;
        patch.apply_to(&mut record);
        self.cache.set_transaction(&record).await?;
        self.enqueue(MutationAction::UpdateTransaction {
            id: id.to_string(),
            patch,
        })
        .await?;
        Ok(record)
    }

    /// Move the cached customer balance for a new transaction. A customer
    /// missing from the cache is skipped, not an error.
    async fn adjust_customer_for(
        &self,
        customer_id: &str,
        draft: &TransactionDraft,
    ) -> Result<(), StoreError> {
        let Some(mut customer) = self.cache.customer(customer_id).await? else {
            debug!(customer_id, "Customer not cached, skipping balance adjustment");
            return Ok(());
        };

        customer.balance = draft.kind.apply(customer.balance, draft.amount);
        customer.transaction_count = Some(customer.transaction_count.unwrap_or(0) + 1);
        customer.last_transaction_date =
            Some(draft.transaction_date.unwrap_or(draft.created_at));
        self.cache.set_customer(&customer).await
    }

    async fn enqueue(&self, action: MutationAction) -> Result<(), StoreError> {
        let kind = action.kind();
        let id = self.queue.enqueue(action, now_millis()).await?;
        let pending = self.queue.count_pending().await?;
        self.notifier.publish_pending(pending);
        debug!(queue_item = %id, action = kind, pending, "Action queued for sync");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueStatus;
    use crate::records::TransactionKind;
    use crate::remote::InMemoryRemote;
    use crate::store::{LocalStore, StoreLocation};
    use rust_decimal_macros::dec;

    struct Harness {
        coordinator: SyncCoordinator,
        cache: Arc<EntityCache>,
        queue: Arc<MutationQueue>,
        remote: Arc<InMemoryRemote>,
        online_tx: watch::Sender<bool>,
        notifier: Arc<SyncNotifier>,
    }

    async fn harness(online: bool) -> Harness {
        let store = LocalStore::open(&StoreLocation::Memory).await.unwrap();
        let cache = Arc::new(EntityCache::new(store.clone()));
        let queue = Arc::new(MutationQueue::new(store));
        let remote = Arc::new(InMemoryRemote::new());
        let notifier = Arc::new(SyncNotifier::new());
        let (online_tx, online_rx) = watch::channel(online);

        let coordinator = SyncCoordinator::new(
            cache.clone(),
            queue.clone(),
            remote.clone(),
            online_rx,
            notifier.clone(),
        );

        Harness {
            coordinator,
            cache,
            queue,
            remote,
            online_tx,
            notifier,
        }
    }

    fn customer_draft(name: &str) -> CustomerDraft {
        CustomerDraft {
            owner_id: "owner-1".into(),
            name: name.into(),
            phone: None,
            address: None,
            notes: None,
            created_at: now_millis(),
        }
    }

    fn txn_draft(customer_id: &str, kind: TransactionKind, amount: Decimal) -> TransactionDraft {
        TransactionDraft {
            owner_id: "owner-1".into(),
            customer_id: customer_id.into(),
            kind,
            amount,
            description: None,
            transaction_date: None,
            customer_name: None,
            created_at: now_millis(),
        }
    }

    fn cached_customer(id: &str, balance: Decimal) -> CachedCustomer {
        CachedCustomer {
            id: id.to_string(),
            owner_id: "owner-1".into(),
            name: "Asha".into(),
            phone: None,
            address: None,
            notes: None,
            balance,
            transaction_count: Some(1),
            last_transaction_date: None,
            is_deleted: None,
            created_at: 0,
            cached_at: 0,
        }
    }

    #[tokio::test]
    async fn test_online_create_caches_authoritative_record() {
        let h = harness(true).await;

        let created = h
            .coordinator
            .create_customer(customer_draft("Asha"))
            .await
            .unwrap();

        assert!(created.id.starts_with("cus_"));
        // Nothing queued
        assert_eq!(h.queue.count_pending().await.unwrap(), 0);
        // Cache holds the server record
        let cached = h.cache.customer(&created.id).await.unwrap().unwrap();
        assert_eq!(cached.name, "Asha");
    }

    #[tokio::test]
    async fn test_offline_create_returns_temp_record_and_queues() {
        let h = harness(false).await;

        let created = h
            .coordinator
            .create_customer(customer_draft("Asha"))
            .await
            .unwrap();

        assert!(crate::records::is_temp_id(&created.id));
        assert_eq!(h.remote.customer_count(), 0);

        let pending = h.queue.list(Some(QueueStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action.kind(), "create_customer");
        assert_eq!(h.notifier.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_offline_path() {
        let h = harness(true).await;
        h.remote.set_reject_all(true);

        let created = h
            .coordinator
            .create_customer(customer_draft("Asha"))
            .await
            .unwrap();

        // No hard error: the action landed on the offline path
        assert!(crate::records::is_temp_id(&created.id));
        assert_eq!(h.queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_transactions_adjust_cached_balance() {
        let h = harness(false).await;
        h.cache
            .set_customer(&cached_customer("cus_1", dec!(50)))
            .await
            .unwrap();

        h.coordinator
            .create_transaction(txn_draft("cus_1", TransactionKind::Debt, dec!(150)))
            .await
            .unwrap();

        let customer = h.cache.customer("cus_1").await.unwrap().unwrap();
        assert_eq!(customer.balance, dec!(200));
        assert_eq!(customer.transaction_count, Some(2));

        h.coordinator
            .create_transaction(txn_draft("cus_1", TransactionKind::Payment, dec!(30)))
            .await
            .unwrap();

        let customer = h.cache.customer("cus_1").await.unwrap().unwrap();
        assert_eq!(customer.balance, dec!(170));
    }

    #[tokio::test]
    async fn test_nonpositive_amount_is_rejected() {
        let h = harness(false).await;

        let zero = h
            .coordinator
            .create_transaction(txn_draft("cus_1", TransactionKind::Debt, dec!(0)))
            .await;
        assert!(matches!(zero, Err(CoordinatorError::InvalidAmount(_))));

        let negative = h
            .coordinator
            .create_transaction(txn_draft("cus_1", TransactionKind::Debt, dec!(-5)))
            .await;
        assert!(matches!(negative, Err(CoordinatorError::InvalidAmount(_))));

        assert_eq!(h.queue.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_from_cache_immediately_when_offline() {
        let h = harness(false).await;
        h.cache
            .set_customer(&cached_customer("cus_1", dec!(0)))
            .await
            .unwrap();

        h.coordinator.delete_customer("cus_1").await.unwrap();

        assert!(h.cache.customer("cus_1").await.unwrap().is_none());
        assert_eq!(h.queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_online_delete_does_not_queue() {
        let h = harness(true).await;
        let created = h
            .coordinator
            .create_customer(customer_draft("Asha"))
            .await
            .unwrap();

        h.coordinator.delete_customer(&created.id).await.unwrap();

        assert_eq!(h.queue.count_pending().await.unwrap(), 0);
        assert!(h.remote.customer(&created.id).is_none());
    }

    #[tokio::test]
    async fn test_offline_update_patches_cached_record() {
        let h = harness(false).await;
        let created = h
            .coordinator
            .create_customer(customer_draft("Asha"))
            .await
            .unwrap();

        let updated = h
            .coordinator
            .update_customer(
                &created.id,
                CustomerPatch {
                    notes: Some("pays on fridays".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.notes.as_deref(), Some("pays on fridays"));
        // Create + update both queued, FIFO
        let pending = h.queue.list(Some(QueueStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].action.kind(), "create_customer");
        assert_eq!(pending[1].action.kind(), "update_customer");
    }

    #[tokio::test]
    async fn test_offline_update_of_unknown_record_errors() {
        let h = harness(false).await;

        let result = h
            .coordinator
            .update_customer("cus_ghost", CustomerPatch::default())
            .await;

        assert!(matches!(result, Err(CoordinatorError::UnknownRecord(_))));
    }

    #[tokio::test]
    async fn test_going_online_changes_the_path() {
        let h = harness(false).await;

        let offline = h
            .coordinator
            .create_customer(customer_draft("Offline"))
            .await
            .unwrap();
        assert!(crate::records::is_temp_id(&offline.id));

        h.online_tx.send(true).unwrap();

        let online = h
            .coordinator
            .create_customer(customer_draft("Online"))
            .await
            .unwrap();
        assert!(online.id.starts_with("cus_"));
    }
}
