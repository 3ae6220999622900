//! # Ledger Sync
//!
//! An offline-first sync engine for a small-business ledger. Customers and
//! debt/payment transactions stay available and editable while the device
//! has no connectivity, then reconcile automatically once it returns.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Sync Coordinator                       │
//! │  • Single entry point for mutating user actions            │
//! │  • Online → remote call; offline → optimistic cache write  │
//! │    + durable queue entry (temp ids for creates)            │
//! └─────────────────────────────────────────────────────────────┘
//!                │                            │
//!                ▼                            ▼
//! ┌──────────────────────────┐  ┌──────────────────────────────┐
//! │       Entity Cache       │  │        Mutation Queue        │
//! │  • Typed, 24h TTL reads  │  │  • FIFO by added_at          │
//! │  • Passive expiry        │  │  • Retry bookkeeping         │
//! └──────────────────────────┘  └──────────────────────────────┘
//!                │                            │
//!                └──────────┬─────────────────┘
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Local Store (SQLite, versioned)                │
//! │  • One table per collection, secondary index columns       │
//! │  • Additive migrations gated on user_version               │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   connectivity regained → Sync Processor drains the queue against
//!   the remote service, remapping temp ids to server identifiers.
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ledger_sync::{
//!     CustomerDraft, InMemoryRemote, SyncConfig, SyncEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let remote = Arc::new(InMemoryRemote::new());
//!     let engine = SyncEngine::start(SyncConfig::default(), remote, None)
//!         .await
//!         .expect("failed to open local store");
//!
//!     // Offline: the action lands in cache + queue and returns at once
//!     engine.connectivity().set_online(false);
//!     let customer = engine
//!         .coordinator()
//!         .create_customer(CustomerDraft {
//!             owner_id: "owner-1".into(),
//!             name: "Asha".into(),
//!             phone: None,
//!             address: None,
//!             notes: None,
//!             created_at: ledger_sync::now_millis(),
//!         })
//!         .await
//!         .expect("offline create failed");
//!     assert!(ledger_sync::is_temp_id(&customer.id));
//!
//!     // Back online: the scheduler drains the queue and the customer
//!     // gets its server identity everywhere it appears.
//!     engine.connectivity().set_online(true);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: online/offline decision per user action
//! - [`processor`]: queue drain with identifier reconciliation
//! - [`cache`]: typed TTL façade over the local store
//! - [`queue`]: durable FIFO mutation queue
//! - [`store`]: SQLite-backed versioned collections
//! - [`connectivity`]: online signal, deferred-run registration, scheduler
//! - [`remote`]: the remote data service contract
//! - [`notify`]: pending-count and completion subscriptions

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod engine;
pub mod notify;
pub mod processor;
pub mod queue;
pub mod records;
pub mod remote;
pub mod retry;
pub mod store;

pub use cache::{EntityCache, DEFAULT_TTL_MS};
pub use config::SyncConfig;
pub use connectivity::{
    ConnectivityHandle, DeferredRunner, Registration, SchedulerHandle, SyncScheduler,
};
pub use coordinator::{CoordinatorError, SyncCoordinator};
pub use engine::SyncEngine;
pub use notify::{SyncCompletion, SyncNotifier};
pub use processor::{SyncError, SyncOutcome, SyncProcessor};
pub use queue::{MutationAction, MutationQueue, QueueItem, QueuePatch, QueueStatus};
pub use records::{
    is_temp_id, now_millis, temp_id, CacheEnvelope, CachedCustomer, CachedTransaction,
    CustomerDraft, CustomerPatch, TransactionDraft, TransactionKind, TransactionPatch,
    TEMP_ID_PREFIX,
};
pub use remote::{InMemoryRemote, RemoteError, RemoteService};
pub use retry::RetryConfig;
pub use store::{LocalStore, StoreError, StoreHandle, StoreLocation};
