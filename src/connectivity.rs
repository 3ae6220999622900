// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connectivity signal and sync scheduling.
//!
//! The host runtime feeds online/offline transitions into a
//! [`ConnectivityHandle`]; the engine observes them through a watch channel.
//! On every offline→online transition the [`SyncScheduler`] asks the host's
//! deferred-execution mechanism to run the processor later; when the host
//! has none (or the registration fails) it runs the processor immediately.
//! The queue always eventually drains — never solely through an optional
//! mechanism.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::processor::SyncProcessor;

/// Host-side sender for the online/offline signal.
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    /// Create the signal with its initial state. Returns the handle and the
    /// receiver the engine components watch.
    #[must_use]
    pub fn new(initially_online: bool) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(initially_online);
        (Self { tx }, rx)
    }

    /// Report a connectivity change. Redundant reports are deduplicated.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Outcome of asking the host runtime for a deferred processor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The host accepted and will invoke the processor later
    Registered,
    /// The host has no deferred-execution mechanism
    Unsupported,
    /// The host has one, but registration failed
    Failed(String),
}

/// Optional collaborator: a best-effort way to ask the host runtime to run
/// the processor later (e.g. when the app itself is about to suspend).
pub trait DeferredRunner: Send + Sync {
    fn register(&self) -> Registration;
}

/// Watches the connectivity signal and triggers processor runs.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawn the watch loop. Dropping the returned handle stops it.
    pub fn spawn(
        processor: Arc<SyncProcessor>,
        mut online: watch::Receiver<bool>,
        runner: Option<Arc<dyn DeferredRunner>>,
    ) -> SchedulerHandle {
        let handle = tokio::spawn(async move {
            loop {
                if online.changed().await.is_err() {
                    // Signal sender dropped; nothing left to watch
                    break;
                }
                let is_online = *online.borrow_and_update();
                if !is_online {
                    debug!("Connectivity lost");
                    continue;
                }

                info!("Connectivity regained, scheduling sync");
                let registration = match &runner {
                    Some(runner) => runner.register(),
                    None => Registration::Unsupported,
                };

                match registration {
                    Registration::Registered => {
                        debug!("Deferred sync registered with host runtime");
                    }
                    Registration::Unsupported => {
                        Self::run_now(&processor).await;
                    }
                    Registration::Failed(reason) => {
                        warn!(reason = %reason, "Deferred registration failed, running immediately");
                        Self::run_now(&processor).await;
                    }
                }
            }
        });
        SchedulerHandle { handle }
    }

    async fn run_now(processor: &SyncProcessor) {
        if let Err(err) = processor.run().await {
            warn!(error = %err, "Scheduled sync run failed");
        }
    }
}

/// Owns the scheduler task; aborts it on drop.
pub struct SchedulerHandle {
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
