// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable mutation queue.
//!
//! Records intent before (or instead of) a remote call. Items are "in
//! flight" to the remote service, not a permanent storage location: a drain
//! removes each item once the mutation is durably applied remotely.
//!
//! Replay order is FIFO by `added_at`. Cross-entity ordering (a customer's
//! create before its transactions) is preserved by enqueue order alone; the
//! processor never re-derives it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::records::{
    is_temp_id, now_millis, CustomerDraft, CustomerPatch, TransactionDraft, TransactionPatch,
};
use crate::store::{LocalStore, StoreError, SYNC_QUEUE};

/// Lifecycle status of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting for the next processor run
    Pending,
    /// Picked up by the active run
    Syncing,
    /// Applied remotely; the item is removed rather than stored completed
    Completed,
    /// Retry budget exhausted; needs an explicit reset
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The intended remote effect of a queued mutation.
///
/// A tagged union keyed by `action_type`; each variant carries a precisely
/// typed payload, so processor dispatch is a `match`, not a runtime cast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action_type", content = "payload", rename_all = "snake_case")]
pub enum MutationAction {
    CreateCustomer {
        /// Local identity of the record until the server assigns one
        temp_id: String,
        draft: CustomerDraft,
    },
    UpdateCustomer {
        id: String,
        patch: CustomerPatch,
    },
    DeleteCustomer {
        id: String,
    },
    CreateTransaction {
        temp_id: String,
        draft: TransactionDraft,
    },
    UpdateTransaction {
        id: String,
        patch: TransactionPatch,
    },
}

impl MutationAction {
    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateCustomer { .. } => "create_customer",
            Self::UpdateCustomer { .. } => "update_customer",
            Self::DeleteCustomer { .. } => "delete_customer",
            Self::CreateTransaction { .. } => "create_transaction",
            Self::UpdateTransaction { .. } => "update_transaction",
        }
    }

    /// The temporary identifier this action depends on, if any.
    ///
    /// An action creating an entity does not depend on its own temp id;
    /// only references to *other* not-yet-reconciled entities count.
    #[must_use]
    pub fn unresolved_dependency(&self) -> Option<&str> {
        let id = match self {
            Self::CreateCustomer { .. } => return None,
            Self::UpdateCustomer { id, .. } => id,
            Self::DeleteCustomer { id } => id,
            Self::CreateTransaction { draft, .. } => &draft.customer_id,
            Self::UpdateTransaction { id, .. } => id,
        };
        is_temp_id(id).then_some(id.as_str())
    }

    /// Rewrite references to a reconciled customer id. Returns whether the
    /// action changed. The `CreateCustomer` temp_id marker itself is not a
    /// reference and is left alone.
    pub fn remap_customer_id(&mut self, from: &str, to: &str) -> bool {
        match self {
            Self::UpdateCustomer { id, .. } | Self::DeleteCustomer { id } if *id == from => {
                *id = to.to_string();
                true
            }
            Self::CreateTransaction { draft, .. } if draft.customer_id == from => {
                draft.customer_id = to.to_string();
                true
            }
            _ => false,
        }
    }

    /// Rewrite references to a reconciled transaction id.
    pub fn remap_transaction_id(&mut self, from: &str, to: &str) -> bool {
        match self {
            Self::UpdateTransaction { id, .. } if *id == from => {
                *id = to.to_string();
                true
            }
            _ => false,
        }
    }
}

/// A queued mutation with its retry bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: String,
    #[serde(flatten)]
    pub action: MutationAction,
    /// When the user performed the action (epoch millis)
    pub client_timestamp: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Enqueue time (epoch millis); establishes FIFO replay order
    pub added_at: i64,
}

/// Field-wise update for a queue item; `None` leaves the field untouched.
/// `error_message: Some(None)` clears the message.
#[derive(Debug, Clone, Default)]
pub struct QueuePatch {
    pub status: Option<QueueStatus>,
    pub retry_count: Option<u32>,
    pub error_message: Option<Option<String>>,
    pub action: Option<MutationAction>,
}

impl QueuePatch {
    #[must_use]
    pub fn status(status: QueueStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn action(action: MutationAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }

    /// Bookkeeping for a failed attempt.
    #[must_use]
    pub fn failure(status: QueueStatus, retry_count: u32, message: String) -> Self {
        Self {
            status: Some(status),
            retry_count: Some(retry_count),
            error_message: Some(Some(message)),
            ..Default::default()
        }
    }
}

/// Durable, ordered list of pending mutations.
#[derive(Clone)]
pub struct MutationQueue {
    store: LocalStore,
    default_max_retries: u32,
}

impl MutationQueue {
    /// Default retry budget per item.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self::with_max_retries(store, Self::DEFAULT_MAX_RETRIES)
    }

    #[must_use]
    pub fn with_max_retries(store: LocalStore, default_max_retries: u32) -> Self {
        Self {
            store,
            default_max_retries,
        }
    }

    /// Record a mutation durably. Returns the assigned queue item id.
    pub async fn enqueue(
        &self,
        action: MutationAction,
        client_timestamp: i64,
    ) -> Result<String, StoreError> {
        let item = QueueItem {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            client_timestamp,
            retry_count: 0,
            max_retries: self.default_max_retries,
            status: QueueStatus::Pending,
            error_message: None,
            added_at: now_millis(),
        };

        self.store.put(&SYNC_QUEUE, &to_value(&item)?).await?;

        debug!(
            id = %item.id,
            action = item.action.kind(),
            "Mutation enqueued"
        );
        Ok(item.id)
    }

    /// Items in FIFO order, optionally filtered by status.
    ///
    /// This is the authoritative processing order: ascending `added_at`,
    /// with same-millisecond items kept in enqueue order.
    pub async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueItem>, StoreError> {
        let rows = match status {
            Some(status) => {
                self.store
                    .get_all_by_index(&SYNC_QUEUE, "status", status.as_str())
                    .await?
            }
            None => self.store.get_all(&SYNC_QUEUE).await?,
        };

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(from_value::<QueueItem>(row)?);
        }
        // Rows arrive in insertion order; a stable sort keeps that order
        // for equal timestamps.
        items.sort_by_key(|item| item.added_at);
        Ok(items)
    }

    /// Fetch a single item by id.
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, StoreError> {
        match self.store.get(&SYNC_QUEUE, id).await? {
            Some(row) => Ok(Some(from_value(row)?)),
            None => Ok(None),
        }
    }

    /// Merge a patch into a stored item. Fails with [`StoreError::NotFound`]
    /// if the id does not exist — callers must not race a concurrent remove
    /// against an update of the same id.
    pub async fn update(&self, id: &str, patch: QueuePatch) -> Result<QueueItem, StoreError> {
        let mut item = self.get(id).await?.ok_or(StoreError::NotFound)?;

        if let Some(status) = patch.status {
            item.status = status;
        }
        if let Some(retry_count) = patch.retry_count {
            item.retry_count = retry_count;
        }
        if let Some(error_message) = patch.error_message {
            item.error_message = error_message;
        }
        if let Some(action) = patch.action {
            item.action = action;
        }

        self.store.put(&SYNC_QUEUE, &to_value(&item)?).await?;
        Ok(item)
    }

    /// Delete an item once its mutation is durably applied.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&SYNC_QUEUE, id).await
    }

    /// Number of pending items. Reflects `list(Pending)` exactly.
    pub async fn count_pending(&self) -> Result<u64, StoreError> {
        self.store
            .count_by_index(&SYNC_QUEUE, "status", QueueStatus::Pending.as_str())
            .await
    }

    /// Explicit user-triggered retry: every failed item goes back to
    /// pending with a fresh retry budget. Returns how many were reset.
    pub async fn reset_failed(&self) -> Result<usize, StoreError> {
        let failed = self.list(Some(QueueStatus::Failed)).await?;
        let count = failed.len();
        for item in failed {
            self.update(
                &item.id,
                QueuePatch {
                    status: Some(QueueStatus::Pending),
                    retry_count: Some(0),
                    error_message: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        }
        if count > 0 {
            debug!(count, "Failed queue items reset to pending");
        }
        Ok(count)
    }
}

fn to_value<T: Serialize>(item: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(item).map_err(|e| StoreError::Backend(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Backend(format!("corrupt queue item: {}", e)))
}
