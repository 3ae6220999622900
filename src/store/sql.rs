// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend for the local store.
//!
//! One table per collection, shaped like an object store:
//!
//! ```sql
//! CREATE TABLE customers (
//!   key TEXT PRIMARY KEY,   -- stable record identifier
//!   payload TEXT NOT NULL,  -- full record as JSON
//!   idx_owner_id TEXT       -- one column per declared secondary index
//! )
//! ```
//!
//! Index columns are copied out of the JSON payload on every write and
//! backed by real SQLite indexes, so equality lookups (by owner, by
//! referenced customer, by status) never scan payloads.
//!
//! Upserts use `ON CONFLICT ... DO UPDATE` rather than `INSERT OR REPLACE`
//! so a row keeps its rowid for the life of the record — reads ordered by
//! rowid therefore return insertion order, which the mutation queue relies
//! on for FIFO replay.
//!
//! Schema changes are gated on `PRAGMA user_version` and applied additively
//! (new tables/indexes only); queued, unsynced user data survives upgrades.

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{CollectionSpec, StoreError, StoreLocation, ALL_COLLECTIONS};
use crate::retry::{retry, RetryConfig};

/// Current schema version, recorded in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 2;

/// Durable, versioned storage partitioned into named record collections.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (and if necessary create) the store at the given location.
    ///
    /// Idempotent: collections and indexes are created on first use or on a
    /// version bump, never dropped. Transient open failures are retried with
    /// the startup backoff policy; a definitive failure is fatal to every
    /// component depending on this store for the session.
    pub async fn open(location: &StoreLocation) -> Result<Self, StoreError> {
        let in_memory = matches!(location, StoreLocation::Memory);
        let options = match location {
            StoreLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
            StoreLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        };

        let pool = retry("store_open", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                let pool_options = if in_memory {
                    // An in-memory database lives and dies with its single
                    // connection: one connection, never recycled.
                    SqlitePoolOptions::new()
                        .max_connections(1)
                        .min_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None)
                } else {
                    SqlitePoolOptions::new().max_connections(5)
                };
                pool_options
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))
            }
        })
        .await?;

        let store = Self { pool };

        if matches!(location, StoreLocation::File(_)) {
            store.enable_wal_mode().await?;
        }
        retry("store_migrate", &RetryConfig::startup(), || store.migrate()).await?;

        info!(location = ?location, version = SCHEMA_VERSION, "Local store opened");
        Ok(store)
    }

    /// Enable WAL journaling for file-backed stores: readers don't block the
    /// writer, and commits need a single fsync.
    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    /// Apply additive migrations up to [`SCHEMA_VERSION`].
    async fn migrate(&self) -> Result<(), StoreError> {
        let row = sqlx::query("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let version: i64 = row
            .try_get(0)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        if version >= SCHEMA_VERSION {
            return Ok(());
        }

        // v1: collection tables with all index columns, plus by-owner indexes
        if version < 1 {
            for spec in ALL_COLLECTIONS {
                let mut columns = String::from("key TEXT PRIMARY KEY, payload TEXT NOT NULL");
                for field in spec.indexes {
                    columns.push_str(&format!(", idx_{} TEXT", field));
                }
                let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", spec.name, columns);
                sqlx::query(&sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
            self.create_index(&super::CUSTOMERS, "owner_id").await?;
            self.create_index(&super::TRANSACTIONS, "owner_id").await?;
        }

        // v2: lookup indexes for reconciliation and queue filtering
        if version < 2 {
            self.create_index(&super::TRANSACTIONS, "customer_id").await?;
            self.create_index(&super::SYNC_QUEUE, "status").await?;
        }

        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(from = version, to = SCHEMA_VERSION, "Store schema migrated");
        Ok(())
    }

    async fn create_index(
        &self,
        spec: &CollectionSpec,
        field: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS ix_{table}_{field} ON {table} (idx_{field})",
            table = spec.name,
            field = field
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn key_of<'a>(spec: &CollectionSpec, record: &'a Value) -> Result<&'a str, StoreError> {
        record
            .get(spec.key_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::Backend(format!(
                    "record for '{}' missing key field '{}'",
                    spec.name, spec.key_field
                ))
            })
    }

    fn require_index(spec: &CollectionSpec, index: &str) -> Result<(), StoreError> {
        if spec.indexes.contains(&index) {
            Ok(())
        } else {
            Err(StoreError::Backend(format!(
                "collection '{}' has no index '{}'",
                spec.name, index
            )))
        }
    }

    /// Upsert a record. The key and index columns are extracted from the
    /// JSON payload.
    pub async fn put(&self, spec: &CollectionSpec, record: &Value) -> Result<(), StoreError> {
        let key = Self::key_of(spec, record)?;
        let payload = record.to_string();

        let mut cols = String::from("key, payload");
        let mut binds = String::from("?, ?");
        let mut updates = String::from("payload = excluded.payload");
        for field in spec.indexes {
            cols.push_str(&format!(", idx_{}", field));
            binds.push_str(", ?");
            updates.push_str(&format!(", idx_{field} = excluded.idx_{field}", field = field));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(key) DO UPDATE SET {}",
            spec.name, cols, binds, updates
        );

        let mut query = sqlx::query(&sql).bind(key).bind(&payload);
        for field in spec.indexes {
            let value = record.get(*field).and_then(Value::as_str).map(String::from);
            query = query.bind(value);
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Fetch a single record by key. Absence is `Ok(None)`, not an error.
    pub async fn get(
        &self,
        spec: &CollectionSpec,
        key: &str,
    ) -> Result<Option<Value>, StoreError> {
        let sql = format!("SELECT payload FROM {} WHERE key = ?", spec.name);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                let value = serde_json::from_str(&payload)
                    .map_err(|e| StoreError::Backend(format!("corrupt payload: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All records in a collection, in insertion order.
    pub async fn get_all(&self, spec: &CollectionSpec) -> Result<Vec<Value>, StoreError> {
        let sql = format!("SELECT payload FROM {} ORDER BY rowid", spec.name);
        self.fetch_payloads(&sql, None).await
    }

    /// All records whose index column equals `value`, in insertion order.
    pub async fn get_all_by_index(
        &self,
        spec: &CollectionSpec,
        index: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError> {
        Self::require_index(spec, index)?;
        let sql = format!(
            "SELECT payload FROM {} WHERE idx_{} = ? ORDER BY rowid",
            spec.name, index
        );
        self.fetch_payloads(&sql, Some(value)).await
    }

    /// Count records whose index column equals `value`.
    pub async fn count_by_index(
        &self,
        spec: &CollectionSpec,
        index: &str,
        value: &str,
    ) -> Result<u64, StoreError> {
        Self::require_index(spec, index)?;
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE idx_{} = ?",
            spec.name, index
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(n as u64)
    }

    /// Delete a record by key. Deleting a missing key is not an error.
    pub async fn delete(&self, spec: &CollectionSpec, key: &str) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE key = ?", spec.name);
        sqlx::query(&sql)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Remove every record in a collection.
    pub async fn clear(&self, spec: &CollectionSpec) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {}", spec.name);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn fetch_payloads(
        &self,
        sql: &str,
        bind: Option<&str>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row
                .try_get("payload")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let value = serde_json::from_str(&payload)
                .map_err(|e| StoreError::Backend(format!("corrupt payload: {}", e)))?;
            values.push(value);
        }
        Ok(values)
    }
}
