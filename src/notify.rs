//! Listener channels for sync observability.
//!
//! UI badges and background workers subscribe here instead of polling:
//! a watch channel carries the pending-mutation count, and a broadcast
//! channel carries a completion event after every processor run.

use tokio::sync::{broadcast, watch};

/// Broadcast after each processor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCompletion {
    pub processed: usize,
    pub failed: usize,
    /// Epoch millis
    pub timestamp: i64,
}

/// Shared notification hub.
pub struct SyncNotifier {
    pending: watch::Sender<u64>,
    completions: broadcast::Sender<SyncCompletion>,
}

impl SyncNotifier {
    #[must_use]
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        let (completions, _) = broadcast::channel(16);
        Self {
            pending,
            completions,
        }
    }

    /// Current pending-mutation count as last published.
    #[must_use]
    pub fn pending_count(&self) -> u64 {
        *self.pending.borrow()
    }

    /// Subscribe to pending-count changes.
    #[must_use]
    pub fn subscribe_pending(&self) -> watch::Receiver<u64> {
        self.pending.subscribe()
    }

    /// Subscribe to run-completion events.
    #[must_use]
    pub fn subscribe_completions(&self) -> broadcast::Receiver<SyncCompletion> {
        self.completions.subscribe()
    }

    pub(crate) fn publish_pending(&self, count: u64) {
        self.pending.send_replace(count);
    }

    pub(crate) fn publish_completion(&self, completion: SyncCompletion) {
        // No subscribers is fine
        let _ = self.completions.send(completion);
    }
}

impl Default for SyncNotifier {
    fn default() -> Self {
        Self::new()
    }
}
