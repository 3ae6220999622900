//! Entity cache: typed façade over the local store.
//!
//! Gives the rest of the engine typed access to the two domain collections
//! plus the generic envelope collection. Every write stamps `cached_at`;
//! every read filters records older than the TTL (default 24h).
//!
//! Expiry is passive: an expired record is invisible to reads but stays on
//! disk until the next write to the same key overwrites it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::records::{now_millis, CacheEnvelope, CachedCustomer, CachedTransaction};
use crate::store::{LocalStore, StoreError, CACHE, CUSTOMERS, TRANSACTIONS};

/// Default record time-to-live: 24 hours.
pub const DEFAULT_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Typed read/write access to cached domain entities.
#[derive(Clone)]
pub struct EntityCache {
    store: LocalStore,
    ttl_ms: i64,
}

impl EntityCache {
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self::with_ttl(store, DEFAULT_TTL_MS)
    }

    #[must_use]
    pub fn with_ttl(store: LocalStore, ttl_ms: i64) -> Self {
        Self { store, ttl_ms }
    }

    fn is_fresh(&self, cached_at: i64, now: i64) -> bool {
        now - cached_at < self.ttl_ms
    }

    // ========== Customers ==========

    /// Upsert a batch of customers for an owner, stamping `cached_at`.
    ///
    /// An empty batch resolves immediately without touching the store. The
    /// first failing record write fails the whole call.
    pub async fn set_customers(
        &self,
        owner_id: &str,
        records: &[CachedCustomer],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        for record in records {
            let mut record = record.clone();
            record.owner_id = owner_id.to_string();
            record.cached_at = now;
            self.store.put(&CUSTOMERS, &to_value(&record)?).await?;
        }
        debug!(owner_id, count = records.len(), "Customers cached");
        Ok(())
    }

    /// All unexpired customers for an owner.
    pub async fn customers(&self, owner_id: &str) -> Result<Vec<CachedCustomer>, StoreError> {
        let now = now_millis();
        let rows = self
            .store
            .get_all_by_index(&CUSTOMERS, "owner_id", owner_id)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record: CachedCustomer = from_value(row)?;
            if self.is_fresh(record.cached_at, now) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// A single unexpired customer by id.
    pub async fn customer(&self, id: &str) -> Result<Option<CachedCustomer>, StoreError> {
        match self.store.get(&CUSTOMERS, id).await? {
            Some(row) => {
                let record: CachedCustomer = from_value(row)?;
                if self.is_fresh(record.cached_at, now_millis()) {
                    Ok(Some(record))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Upsert a single customer (optimistic write path).
    pub async fn set_customer(&self, record: &CachedCustomer) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.cached_at = now_millis();
        self.store.put(&CUSTOMERS, &to_value(&record)?).await
    }

    pub async fn delete_customer(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&CUSTOMERS, id).await
    }

    // ========== Transactions ==========

    /// Upsert a batch of transactions for an owner, stamping `cached_at`.
    pub async fn set_transactions(
        &self,
        owner_id: &str,
        records: &[CachedTransaction],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        for record in records {
            let mut record = record.clone();
            record.owner_id = owner_id.to_string();
            record.cached_at = now;
            self.store.put(&TRANSACTIONS, &to_value(&record)?).await?;
        }
        debug!(owner_id, count = records.len(), "Transactions cached");
        Ok(())
    }

    /// All unexpired transactions for an owner.
    pub async fn transactions(&self, owner_id: &str) -> Result<Vec<CachedTransaction>, StoreError> {
        let rows = self
            .store
            .get_all_by_index(&TRANSACTIONS, "owner_id", owner_id)
            .await?;
        self.filter_transactions(rows)
    }

    /// All unexpired transactions referencing a customer. Used by the
    /// processor when a temporary customer id gets its server identity.
    pub async fn transactions_for_customer(
        &self,
        customer_id: &str,
    ) -> Result<Vec<CachedTransaction>, StoreError> {
        let rows = self
            .store
            .get_all_by_index(&TRANSACTIONS, "customer_id", customer_id)
            .await?;
        self.filter_transactions(rows)
    }

    fn filter_transactions(&self, rows: Vec<Value>) -> Result<Vec<CachedTransaction>, StoreError> {
        let now = now_millis();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record: CachedTransaction = from_value(row)?;
            if self.is_fresh(record.cached_at, now) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// A single unexpired transaction by id.
    pub async fn transaction(&self, id: &str) -> Result<Option<CachedTransaction>, StoreError> {
        match self.store.get(&TRANSACTIONS, id).await? {
            Some(row) => {
                let record: CachedTransaction = from_value(row)?;
                if self.is_fresh(record.cached_at, now_millis()) {
                    Ok(Some(record))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Upsert a single transaction (optimistic write path).
    pub async fn set_transaction(&self, record: &CachedTransaction) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.cached_at = now_millis();
        self.store.put(&TRANSACTIONS, &to_value(&record)?).await
    }

    pub async fn delete_transaction(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&TRANSACTIONS, id).await
    }

    // ========== Generic envelopes ==========

    /// Store an arbitrary value under a key with the cache TTL policy.
    pub async fn set_envelope<T: Serialize>(&self, key: &str, data: T) -> Result<(), StoreError> {
        let envelope = CacheEnvelope {
            key: key.to_string(),
            data,
            stored_at: now_millis(),
        };
        self.store.put(&CACHE, &to_value(&envelope)?).await
    }

    /// Fetch an envelope's data; `None` if absent or expired.
    pub async fn get_envelope<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.store.get(&CACHE, key).await? {
            Some(row) => {
                let envelope: CacheEnvelope<T> = from_value(row)?;
                if self.is_fresh(envelope.stored_at, now_millis()) {
                    Ok(Some(envelope.data))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

fn to_value<T: Serialize>(record: &T) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Backend(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Backend(format!("corrupt record: {}", e)))
}
