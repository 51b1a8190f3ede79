use curbsync_core::{WorkerId, WorkerStatus};
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 64;

/// User-facing notifications from the reconciliation controller. Network
/// failures never propagate into display code; they surface here instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Optimistic local change, emitted before any network confirmation.
    StatusChanged {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
    /// Server confirmed both status fields match the desired value.
    SyncConfirmed {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
    /// Retries exhausted; the local value stays in place unconfirmed.
    SyncWarning {
        worker_id: WorkerId,
        status: WorkerStatus,
        message: String,
    },
    /// Divergence detected and a one-shot forced overwrite was issued.
    ReconcileForced {
        worker_id: WorkerId,
        status: WorkerStatus,
    },
    /// A stored intent aged out of its authority window and was dropped.
    IntentExpired { worker_id: WorkerId },
}

#[derive(Debug, Clone)]
pub struct StatusEventFeed {
    sender: broadcast::Sender<StatusEvent>,
}

impl Default for StatusEventFeed {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_CAPACITY)
    }
}

impl StatusEventFeed {
    pub fn new(buffer_capacity: usize) -> Self {
        assert!(
            buffer_capacity > 0,
            "buffer_capacity must be greater than 0"
        );
        let (sender, _receiver) = broadcast::channel(buffer_capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event);
        }
    }
}
