// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync processor: drains the mutation queue against the remote service.
//!
//! Exactly one run at a time. A second invocation while a run is active is a
//! no-op returning zero counts — that guard is the engine's sole
//! serialization primitive. Each item's outcome is independent: a failure
//! increments that item's retry bookkeeping and never aborts the batch.
//!
//! When a replayed create succeeds, the server-assigned identifier replaces
//! the temporary one everywhere it appears: the temp-keyed cache record is
//! swapped for a server-keyed one, cached transactions pointing at a temp
//! customer are rewritten, and every still-queued payload referencing the
//! temp id is remapped. Payloads are carried through whole — reconciliation
//! never writes placeholder records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::EntityCache;
use crate::notify::{SyncCompletion, SyncNotifier};
use crate::queue::{MutationAction, MutationQueue, QueueItem, QueuePatch, QueueStatus};
use crate::records::now_millis;
use crate::remote::{RemoteError, RemoteService};
use crate::store::StoreError;

/// Counts for one processor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub processed: usize,
    pub failed: usize,
}

/// Why a single queued item could not be applied this run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The item references an entity whose server identifier is not known
    /// yet. Self-correcting across runs: FIFO order replays the create
    /// first, which remaps this item's reference.
    #[error("Dependency not ready: '{id}' has no server-assigned identifier yet")]
    DependencyNotReady { id: String },
}

/// Replays queued mutations against the remote service.
pub struct SyncProcessor {
    cache: Arc<EntityCache>,
    queue: Arc<MutationQueue>,
    remote: Arc<dyn RemoteService>,
    online: watch::Receiver<bool>,
    notifier: Arc<SyncNotifier>,
    running: AtomicBool,
}

impl SyncProcessor {
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
            running: AtomicBool::new(false),
        }
    }

    /// Whether a run is currently active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drain pending mutations in FIFO order.
    ///
    /// No-op (zero counts) when a run is already active or when offline.
    /// Bookkeeping failures against the local store abort the run and
    /// propagate; remote failures are per-item and never do.
    pub async fn run(&self) -> Result<SyncOutcome, StoreError> {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Sync run already active, skipping");
            return Ok(SyncOutcome::default());
        }
        let _guard = RunGuard(&self.running);

        if !*self.online.borrow() {
            debug!("Offline, skipping sync run");
            return Ok(SyncOutcome::default());
        }

        let pending = self.queue.list(Some(QueueStatus::Pending)).await?;
        let mut outcome = SyncOutcome::default();

        if !pending.is_empty() {
            info!(pending = pending.len(), "Starting sync run");
        }

        for stale in pending {
            // An earlier item's reconciliation may have rewritten this
            // payload; always work from the stored version.
            let Some(item) = self.queue.get(&stale.id).await? else {
                continue;
            };
            if item.status != QueueStatus::Pending {
                continue;
            }

            self.queue
                .update(&item.id, QueuePatch::status(QueueStatus::Syncing))
                .await?;

            match self.apply(&item).await {
                Ok(()) => {
                    self.queue.remove(&item.id).await?;
                    outcome.processed += 1;
                    debug!(id = %item.id, action = item.action.kind(), "Mutation applied");
                }
                Err(err) => {
                    outcome.failed += 1;
                    self.record_failure(&item, &err).await?;
                }
            }
        }

        let pending_now = self.queue.count_pending().await?;
        self.notifier.publish_pending(pending_now);
        self.notifier.publish_completion(SyncCompletion {
            processed: outcome.processed,
            failed: outcome.failed,
            timestamp: now_millis(),
        });

        info!(
            processed = outcome.processed,
            failed = outcome.failed,
            pending = pending_now,
            "Sync run complete"
        );
        Ok(outcome)
    }

    /// Dispatch one item to the matching remote call.
    async fn apply(&self, item: &QueueItem) -> Result<(), SyncError> {
        if let Some(id) = item.action.unresolved_dependency() {
            return Err(SyncError::DependencyNotReady { id: id.to_string() });
        }

        match &item.action {
            MutationAction::CreateCustomer { temp_id, draft } => {
                let stored = self.remote.create_customer(draft).await?;
                self.reconcile_customer(temp_id, stored).await?;
            }
            MutationAction::UpdateCustomer { id, patch } => {
                let stored = self.remote.update_customer(id, patch).await?;
                self.cache.set_customer(&stored).await?;
            }
            MutationAction::DeleteCustomer { id } => {
                self.remote.delete_customer(id).await?;
                // The coordinator already removed the cached record; this
                // covers replays from a previous session.
                self.cache.delete_customer(id).await?;
            }
            MutationAction::CreateTransaction { temp_id, draft } => {
                let stored = self.remote.create_transaction(draft).await?;
                self.reconcile_transaction(temp_id, stored).await?;
            }
            MutationAction::UpdateTransaction { id, patch } => {
                let stored = self.remote.update_transaction(id, patch).await?;
                self.cache.set_transaction(&stored).await?;
            }
        }
        Ok(())
    }

    /// Swap a temp customer id for its server identity everywhere.
    ///
    /// Balance, transaction count, and last-transaction date are taken from
    /// the optimistic record: transactions still queued behind this create
    /// have already moved the local balance, and the server cannot know
    /// about them yet.
    async fn reconcile_customer(
        &self,
        temp: &str,
        mut stored: crate::records::CachedCustomer,
    ) -> Result<(), StoreError> {
        if let Some(local) = self.cache.customer(temp).await? {
            stored.balance = local.balance;
            stored.transaction_count = local.transaction_count;
            stored.last_transaction_date = local.last_transaction_date;
        }
        self.cache.delete_customer(temp).await?;
        self.cache.set_customer(&stored).await?;

        for mut txn in self.cache.transactions_for_customer(temp).await? {
            txn.customer_id = stored.id.clone();
            self.cache.set_transaction(&txn).await?;
        }

        let remapped = self
            .remap_queue(|action| action.remap_customer_id(temp, &stored.id))
            .await?;

        info!(
            temp_id = temp,
            server_id = %stored.id,
            queue_items_remapped = remapped,
            "Customer identifier reconciled"
        );
        Ok(())
    }

    /// Swap a temp transaction id for its server identity everywhere.
    async fn reconcile_transaction(
        &self,
        temp: &str,
        stored: crate::records::CachedTransaction,
    ) -> Result<(), StoreError> {
        self.cache.delete_transaction(temp).await?;
        self.cache.set_transaction(&stored).await?;

        let remapped = self
            .remap_queue(|action| action.remap_transaction_id(temp, &stored.id))
            .await?;

        debug!(
            temp_id = temp,
            server_id = %stored.id,
            queue_items_remapped = remapped,
            "Transaction identifier reconciled"
        );
        Ok(())
    }

    /// Rewrite references in every queue payload the remap touches. Failed
    /// items are included — a later explicit reset must replay them with
    /// resolved identifiers.
    async fn remap_queue(
        &self,
        mut remap: impl FnMut(&mut MutationAction) -> bool,
    ) -> Result<usize, StoreError> {
        let mut remapped = 0;
        for item in self.queue.list(None).await? {
            let mut action = item.action.clone();
            if remap(&mut action) {
                self.queue
                    .update(&item.id, QueuePatch::action(action))
                    .await?;
                remapped += 1;
            }
        }
        Ok(remapped)
    }

    /// Retry bookkeeping for a failed item.
    async fn record_failure(&self, item: &QueueItem, err: &SyncError) -> Result<(), StoreError> {
        let retry_count = item.retry_count + 1;

        if retry_count >= item.max_retries {
            warn!(
                id = %item.id,
                action = item.action.kind(),
                retry_count,
                error = %err,
                "Mutation failed terminally, awaiting explicit retry"
            );
            self.queue
                .update(
                    &item.id,
                    QueuePatch::failure(QueueStatus::Failed, retry_count, err.to_string()),
                )
                .await?;
        } else {
            debug!(
                id = %item.id,
                action = item.action.kind(),
                retry_count,
                max_retries = item.max_retries,
                error = %err,
                "Mutation failed, will retry on a later run"
            );
            self.queue
                .update(
                    &item.id,
                    QueuePatch::failure(QueueStatus::Pending, retry_count, err.to_string()),
                )
                .await?;
        }
        Ok(())
    }
}

/// RAII guard resetting the single-active-run flag.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{
        is_temp_id, temp_id, CachedCustomer, CustomerDraft, TransactionDraft, TransactionKind,
    };
    use crate::remote::InMemoryRemote;
    use crate::store::{LocalStore, StoreLocation};
    use rust_decimal_macros::dec;

    struct Harness {
        processor: SyncProcessor,
        cache: Arc<EntityCache>,
        queue: Arc<MutationQueue>,
        remote: Arc<InMemoryRemote>,
        online_tx: watch::Sender<bool>,
    }

    async fn harness(online: bool) -> Harness {
        let store = LocalStore::open(&StoreLocation::Memory).await.unwrap();
        let cache = Arc::new(EntityCache::new(store.clone()));
        let queue = Arc::new(MutationQueue::new(store));
        let remote = Arc::new(InMemoryRemote::new());
        let notifier = Arc::new(SyncNotifier::new());
        let (online_tx, online_rx) = watch::channel(online);

        let processor = SyncProcessor::new(
            cache.clone(),
            queue.clone(),
            remote.clone(),
            online_rx,
            notifier,
        );

        Harness {
            processor,
            cache,
            queue,
            remote,
            online_tx,
        }
    }

    fn customer_draft(name: &str) -> CustomerDraft {
        CustomerDraft {
            owner_id: "owner-1".into(),
            name: name.into(),
            phone: None,
            address: None,
            notes: None,
            created_at: 1,
        }
    }

    fn optimistic_customer(id: &str) -> CachedCustomer {
        CachedCustomer {
            id: id.to_string(),
            owner_id: "owner-1".into(),
            name: "Asha".into(),
            phone: None,
            address: None,
            notes: None,
            balance: dec!(0),
            transaction_count: Some(0),
            last_transaction_date: None,
            is_deleted: None,
            created_at: 1,
            cached_at: 0,
        }
    }

    fn txn_draft(customer_id: &str, amount: rust_decimal::Decimal) -> TransactionDraft {
        TransactionDraft {
            owner_id: "owner-1".into(),
            customer_id: customer_id.into(),
            kind: TransactionKind::Debt,
            amount,
            description: Some("invoice".into()),
            transaction_date: None,
            customer_name: Some("Asha".into()),
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn test_offline_run_is_a_no_op() {
        let h = harness(false).await;
        h.queue
            .enqueue(
                MutationAction::DeleteCustomer { id: "cus_1".into() },
                0,
            )
            .await
            .unwrap();

        let outcome = h.processor.run().await.unwrap();

        assert_eq!(outcome, SyncOutcome::default());
        assert_eq!(h.queue.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let h = harness(true).await;
        h.queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp_id(),
                    draft: customer_draft("Asha"),
                },
                0,
            )
            .await
            .unwrap();

        let first = h.processor.run().await.unwrap();
        assert_eq!(first, SyncOutcome { processed: 1, failed: 0 });

        // Nothing left: the second run must not re-apply anything
        let second = h.processor.run().await.unwrap();
        assert_eq!(second, SyncOutcome::default());
        assert_eq!(h.remote.customer_count(), 1);
    }

    #[tokio::test]
    async fn test_customer_reconciliation_replaces_temp_id_everywhere() {
        let h = harness(true).await;

        let temp = temp_id();
        h.cache
            .set_customer(&optimistic_customer(&temp))
            .await
            .unwrap();

        // Offline-created customer, then a transaction against its temp id
        h.queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp.clone(),
                    draft: customer_draft("Asha"),
                },
                0,
            )
            .await
            .unwrap();
        h.queue
            .enqueue(
                MutationAction::CreateTransaction {
                    temp_id: temp_id(),
                    draft: txn_draft(&temp, dec!(150)),
                },
                1,
            )
            .await
            .unwrap();

        let outcome = h.processor.run().await.unwrap();
        assert_eq!(outcome, SyncOutcome { processed: 2, failed: 0 });

        // Queue fully drained, no temp ids anywhere
        assert!(h.queue.list(None).await.unwrap().is_empty());
        let customers = h.cache.customers("owner-1").await.unwrap();
        assert_eq!(customers.len(), 1);
        assert!(!is_temp_id(&customers[0].id));

        let transactions = h.cache.transactions("owner-1").await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert!(!is_temp_id(&transactions[0].id));
        assert_eq!(transactions[0].customer_id, customers[0].id);
        // Full payload carried through reconciliation
        assert_eq!(transactions[0].amount, dec!(150));
        assert_eq!(transactions[0].description.as_deref(), Some("invoice"));

        // Remote agrees
        assert_eq!(h.remote.customer_count(), 1);
        assert_eq!(h.remote.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_reconciliation_preserves_optimistic_balance() {
        let h = harness(true).await;

        let temp = temp_id();
        let mut optimistic = optimistic_customer(&temp);
        optimistic.balance = dec!(150);
        optimistic.transaction_count = Some(1);
        h.cache.set_customer(&optimistic).await.unwrap();

        h.queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp.clone(),
                    draft: customer_draft("Asha"),
                },
                0,
            )
            .await
            .unwrap();
        h.queue
            .enqueue(
                MutationAction::CreateTransaction {
                    temp_id: temp_id(),
                    draft: txn_draft(&temp, dec!(150)),
                },
                1,
            )
            .await
            .unwrap();

        h.processor.run().await.unwrap();

        // The drain itself must not move the balance again
        let customers = h.cache.customers("owner-1").await.unwrap();
        assert_eq!(customers[0].balance, dec!(150));
        assert_eq!(customers[0].transaction_count, Some(1));
    }

    #[tokio::test]
    async fn test_dependent_item_fails_fast_without_remote_call() {
        let h = harness(true).await;

        // Transaction referencing a temp customer whose create is NOT queued
        h.queue
            .enqueue(
                MutationAction::CreateTransaction {
                    temp_id: temp_id(),
                    draft: txn_draft("temp-unresolved", dec!(10)),
                },
                0,
            )
            .await
            .unwrap();

        let outcome = h.processor.run().await.unwrap();

        assert_eq!(outcome, SyncOutcome { processed: 0, failed: 1 });
        // Never reached the remote
        assert_eq!(h.remote.transaction_count(), 0);
        // Back to pending with a descriptive error
        let items = h.queue.list(Some(QueueStatus::Pending)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].retry_count, 1);
        assert!(items[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("server-assigned identifier"));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_marks_failed_and_excludes_from_drains() {
        let h = harness(true).await;
        h.remote.set_reject_all(true);

        let id = h
            .queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp_id(),
                    draft: customer_draft("Asha"),
                },
                0,
            )
            .await
            .unwrap();

        for _ in 0..3 {
            let outcome = h.processor.run().await.unwrap();
            assert_eq!(outcome.failed, 1);
        }

        let item = h.queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 3);
        assert!(item.error_message.is_some());

        // Excluded from further drains until explicitly reset
        let outcome = h.processor.run().await.unwrap();
        assert_eq!(outcome, SyncOutcome::default());

        // Explicit reset puts it back in play
        h.queue.reset_failed().await.unwrap();
        h.remote.set_reject_all(false);
        let outcome = h.processor.run().await.unwrap();
        assert_eq!(outcome, SyncOutcome { processed: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let h = harness(true).await;

        // First item will fail (unknown customer), second will succeed
        h.queue
            .enqueue(
                MutationAction::UpdateCustomer {
                    id: "cus_ghost".into(),
                    patch: Default::default(),
                },
                0,
            )
            .await
            .unwrap();
        h.queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp_id(),
                    draft: customer_draft("Bram"),
                },
                1,
            )
            .await
            .unwrap();

        let outcome = h.processor.run().await.unwrap();

        assert_eq!(outcome, SyncOutcome { processed: 1, failed: 1 });
        assert_eq!(h.remote.customer_count(), 1);
    }

    #[tokio::test]
    async fn test_single_run_guard_returns_zero_counts() {
        let h = harness(true).await;
        h.queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp_id(),
                    draft: customer_draft("Asha"),
                },
                0,
            )
            .await
            .unwrap();

        // Simulate an active run holding the guard
        assert!(!h.processor.running.swap(true, Ordering::AcqRel));

        let outcome = h.processor.run().await.unwrap();
        assert_eq!(outcome, SyncOutcome::default());
        // Queue untouched
        assert_eq!(h.queue.count_pending().await.unwrap(), 1);

        h.processor.running.store(false, Ordering::Release);
        let outcome = h.processor.run().await.unwrap();
        assert_eq!(outcome, SyncOutcome { processed: 1, failed: 0 });
    }

    #[tokio::test]
    async fn test_going_online_lets_a_skipped_run_proceed() {
        let h = harness(false).await;
        h.queue
            .enqueue(
                MutationAction::CreateCustomer {
                    temp_id: temp_id(),
                    draft: customer_draft("Asha"),
                },
                0,
            )
            .await
            .unwrap();

        assert_eq!(h.processor.run().await.unwrap(), SyncOutcome::default());

        h.online_tx.send(true).unwrap();
        assert_eq!(
            h.processor.run().await.unwrap(),
            SyncOutcome { processed: 1, failed: 0 }
        );
    }
}
