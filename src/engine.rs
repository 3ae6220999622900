//! Engine assembly.
//!
//! Wires the store, cache, queue, coordinator, processor, and scheduler
//! together from a [`SyncConfig`]. Every component is an ordinary injectable
//! value — tests that want isolated instances construct them directly and
//! skip this module entirely.

use std::sync::Arc;

use crate::cache::EntityCache;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityHandle, DeferredRunner, SchedulerHandle, SyncScheduler};
use crate::coordinator::SyncCoordinator;
use crate::notify::SyncNotifier;
use crate::processor::SyncProcessor;
use crate::queue::MutationQueue;
use crate::remote::RemoteService;
use crate::store::{LocalStore, StoreError, StoreLocation};

/// A fully wired sync engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ledger_sync::{InMemoryRemote, SyncConfig, SyncEngine};
///
/// # #[tokio::main]
/// # async fn main() {
/// let remote = Arc::new(InMemoryRemote::new());
/// let engine = SyncEngine::start(SyncConfig::default(), remote, None)
///     .await
///     .expect("store open failed");
///
/// // The host runtime reports connectivity changes:
/// engine.connectivity().set_online(false);
/// // ... user keeps working; mutations queue up ...
/// engine.connectivity().set_online(true);
/// // ... the scheduler drains the queue ...
/// # }
/// ```
pub struct SyncEngine {
    cache: Arc<EntityCache>,
    queue: Arc<MutationQueue>,
    coordinator: SyncCoordinator,
    processor: Arc<SyncProcessor>,
    notifier: Arc<SyncNotifier>,
    connectivity: ConnectivityHandle,
    _scheduler: SchedulerHandle,
}

impl SyncEngine {
    /// Open the store and wire every component.
    ///
    /// A store-open failure here is fatal for the session: nothing else can
    /// operate without the local store.
    pub async fn start(
        config: SyncConfig,
        remote: Arc<dyn RemoteService>,
        deferred: Option<Arc<dyn DeferredRunner>>,
    ) -> Result<Self, StoreError> {
        let location = match &config.db_path {
            Some(path) => StoreLocation::File(path.into()),
            None => StoreLocation::Memory,
        };
        let store = LocalStore::open(&location).await?;

        let cache = Arc::new(EntityCache::with_ttl(store.clone(), config.cache_ttl_ms));
        let queue = Arc::new(MutationQueue::with_max_retries(store, config.max_retries));
        let notifier = Arc::new(SyncNotifier::new());
        let (connectivity, online) = ConnectivityHandle::new(config.start_online);

        let coordinator = SyncCoordinator::new(
            cache.clone(),
            queue.clone(),
            remote.clone(),
            online.clone(),
            notifier.clone(),
        );
        let processor = Arc::new(SyncProcessor::new(
            cache.clone(),
            queue.clone(),
            remote,
            online.clone(),
            notifier.clone(),
        ));
        let scheduler = SyncScheduler::spawn(processor.clone(), online, deferred);

        // Surface any mutations left over from a previous session
        let pending = queue.count_pending().await?;
        notifier.publish_pending(pending);

        Ok(Self {
            cache,
            queue,
            coordinator,
            processor,
            notifier,
            connectivity,
            _scheduler: scheduler,
        })
    }

    /// Entry point for all mutating user actions.
    #[must_use]
    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Manual drain, e.g. behind a "sync now" button.
    #[must_use]
    pub fn processor(&self) -> &Arc<SyncProcessor> {
        &self.processor
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    #[must_use]
    pub fn notifier(&self) -> &Arc<SyncNotifier> {
        &self.notifier
    }

    /// Host-side connectivity reporting.
    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }
}
