//! Domain records cached by the engine.
//!
//! [`CachedCustomer`] and [`CachedTransaction`] are the two entity types the
//! ledger keeps offline, plus [`CacheEnvelope`] for arbitrary cached values.
//! Every record carries a `cached_at` stamp (epoch millis) that the entity
//! cache checks against its TTL on read.
//!
//! Entities created while offline get a locally generated identifier with a
//! fixed `temp-` prefix. The sync processor swaps these for server-assigned
//! identifiers during reconciliation; [`is_temp_id`] tells the two apart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Prefix marking locally generated identifiers.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Generate a collision-resistant local identifier for an entity created
/// while offline.
#[must_use]
pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}

/// Check whether an identifier is a local temporary one.
#[must_use]
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Current time as epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A customer as held in the entity cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedCustomer {
    /// Server-assigned id, or a `temp-` id until reconciled
    pub id: String,
    /// Owning user (ledger account)
    pub owner_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Outstanding balance; debts add, payments subtract
    pub balance: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<u32>,
    /// Epoch millis of the most recent transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transaction_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    /// Epoch millis
    pub created_at: i64,
    /// Stamped by the entity cache on every write (epoch millis)
    #[serde(default)]
    pub cached_at: i64,
}

/// Direction of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// The customer owes more
    Debt,
    /// The customer paid some of the balance off
    Payment,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debt => write!(f, "debt"),
            Self::Payment => write!(f, "payment"),
        }
    }
}

impl TransactionKind {
    /// Apply this transaction direction to a balance.
    #[must_use]
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> Decimal {
        match self {
            Self::Debt => balance + amount,
            Self::Payment => balance - amount,
        }
    }
}

/// A debt/payment transaction as held in the entity cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedTransaction {
    /// Server-assigned id, or a `temp-` id until reconciled
    pub id: String,
    /// Owning user (ledger account)
    pub owner_id: String,
    /// References a [`CachedCustomer::id`]; may itself be a temp id
    pub customer_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Always positive; the kind carries the sign
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Epoch millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<i64>,
    /// Epoch millis
    pub created_at: i64,
    /// Denormalized for list rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    /// Stamped by the entity cache on every write (epoch millis)
    #[serde(default)]
    pub cached_at: i64,
}

/// Generic wrapper for arbitrary cached values.
///
/// Shares the entity cache's TTL policy: a read returns `None` once
/// `now - stored_at` reaches the TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope<T> {
    pub key: String,
    pub data: T,
    /// Epoch millis
    pub stored_at: i64,
}

/// Input for creating a customer. The server (or the offline path) assigns
/// the identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerDraft {
    pub owner_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: i64,
}

/// Field-wise customer update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CustomerPatch {
    /// Apply the patch to a cached record in place.
    pub fn apply_to(&self, customer: &mut CachedCustomer) {
        if let Some(name) = &self.name {
            customer.name = name.clone();
        }
        if let Some(phone) = &self.phone {
            customer.phone = Some(phone.clone());
        }
        if let Some(address) = &self.address {
            customer.address = Some(address.clone());
        }
        if let Some(notes) = &self.notes {
            customer.notes = Some(notes.clone());
        }
    }
}

/// Input for creating a transaction.
///
/// `customer_id` may reference a customer that only exists locally; the
/// processor resolves it before the remote call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionDraft {
    pub owner_id: String,
    pub customer_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub created_at: i64,
}

/// Field-wise transaction update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_date: Option<i64>,
}

impl TransactionPatch {
    /// Apply the patch to a cached record in place.
    pub fn apply_to(&self, txn: &mut CachedTransaction) {
        if let Some(amount) = self.amount {
            txn.amount = amount;
        }
        if let Some(description) = &self.description {
            txn.description = Some(description.clone());
        }
        if let Some(date) = self.transaction_date {
            txn.transaction_date = Some(date);
        }
    }
}
