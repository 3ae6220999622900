//! Local persistent store.
//!
//! SQLite-backed collections surviving process restarts; the foundation the
//! entity cache and the mutation queue are layered on. See [`sql::LocalStore`]
//! for the operations and [`StoreHandle`] for shared, race-free opening.

pub mod sql;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

pub use sql::LocalStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Expected-absence on an operation that requires presence
    /// (e.g. updating a missing queue item). Plain reads report absence
    /// as `Ok(None)`, not as this error.
    #[error("Record not found")]
    NotFound,
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Static description of a record collection: table name, the payload field
/// holding the primary key, and the payload fields mirrored into secondary
/// index columns for equality lookups.
#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub name: &'static str,
    pub key_field: &'static str,
    pub indexes: &'static [&'static str],
}

/// Cached customers, keyed by customer id, indexed by owner.
pub const CUSTOMERS: CollectionSpec = CollectionSpec {
    name: "customers",
    key_field: "id",
    indexes: &["owner_id"],
};

/// Cached transactions, keyed by transaction id, indexed by owner and by
/// the referenced customer.
pub const TRANSACTIONS: CollectionSpec = CollectionSpec {
    name: "transactions",
    key_field: "id",
    indexes: &["owner_id", "customer_id"],
};

/// Generic cache envelopes, keyed by caller-chosen key.
pub const CACHE: CollectionSpec = CollectionSpec {
    name: "cache",
    key_field: "key",
    indexes: &[],
};

/// Durable mutation queue, keyed by queue item id, indexed by status.
pub const SYNC_QUEUE: CollectionSpec = CollectionSpec {
    name: "sync_queue",
    key_field: "id",
    indexes: &["status"],
};

pub(crate) const ALL_COLLECTIONS: &[&CollectionSpec] =
    &[&CUSTOMERS, &TRANSACTIONS, &CACHE, &SYNC_QUEUE];

/// Where the store lives on disk. `Memory` is for tests and demos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreLocation {
    #[default]
    Memory,
    File(std::path::PathBuf),
}

/// Shared handle that opens the store at most once.
///
/// Concurrent `get()` calls during initialization converge on a single
/// underlying connection pool: the first caller runs [`LocalStore::open`],
/// everyone else awaits the same in-flight initialization.
#[derive(Clone)]
pub struct StoreHandle {
    location: StoreLocation,
    cell: Arc<OnceCell<LocalStore>>,
}

impl StoreHandle {
    #[must_use]
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Get the store, opening it on first use.
    pub async fn get(&self) -> Result<&LocalStore, StoreError> {
        self.cell
            .get_or_try_init(|| LocalStore::open(&self.location))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_opens_once_for_concurrent_callers() {
        let handle = StoreHandle::new(StoreLocation::Memory);

        let (a, b) = tokio::join!(handle.get(), handle.get());
        let a = a.unwrap();
        let b = b.unwrap();

        // Both callers see the same underlying store
        assert!(std::ptr::eq(a, b));
    }

    #[tokio::test]
    async fn test_handle_is_idempotent_across_calls() {
        let handle = StoreHandle::new(StoreLocation::Memory);

        let first = handle.get().await.unwrap() as *const LocalStore;
        let second = handle.get().await.unwrap() as *const LocalStore;

        assert_eq!(first, second);
    }

    #[test]
    fn test_not_found_is_distinct_from_backend() {
        let not_found = StoreError::NotFound;
        let backend = StoreError::Backend("disk io".into());

        assert!(matches!(not_found, StoreError::NotFound));
        assert!(matches!(backend, StoreError::Backend(_)));
        assert_ne!(not_found.to_string(), backend.to_string());
    }
}
