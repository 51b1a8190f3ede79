use std::sync::Arc;
use std::time::Duration;

use curbsync_core::{Clock, CoreError, KeyValueStore, WorkerId, WorkerStatus};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const KEY_WORKER_STATUS: &str = "workerStatus";
pub const KEY_WORKER_STATUS_UPDATED_AT: &str = "workerStatusUpdatedAt";
pub const KEY_WORKER_ID: &str = "workerId";
pub const KEY_RECONCILED: &str = "workerStatusReconciled";

const RECONCILED_FLAG: &str = "1";

/// The locally-held status intent: what the user last asked for, when, for
/// which worker, and whether a forced reconciliation has already been spent
/// on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIntent {
    pub worker_id: WorkerId,
    pub desired: WorkerStatus,
    pub set_at: OffsetDateTime,
    pub reconciled_once: bool,
}

impl StatusIntent {
    pub fn new(worker_id: WorkerId, desired: WorkerStatus, clock: &dyn Clock) -> Self {
        Self {
            worker_id,
            desired,
            set_at: clock.now(),
            reconciled_once: false,
        }
    }

    /// The intent only belongs to the worker it was written for; anything
    /// else is stale foreign data.
    pub fn matches(&self, worker_id: &WorkerId) -> bool {
        self.worker_id == *worker_id
    }

    /// Past the authority window the stored intent stops being trusted over
    /// server state.
    pub fn is_expired(&self, now: OffsetDateTime, window: Duration) -> bool {
        match time::Duration::try_from(window) {
            Ok(window) => now - self.set_at > window,
            Err(_) => false,
        }
    }
}

/// Codec for the four string keys the intent persists under.
#[derive(Clone)]
pub struct IntentStore {
    store: Arc<dyn KeyValueStore>,
}

impl IntentStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, intent: &StatusIntent) -> Result<(), CoreError> {
        let set_at = intent
            .set_at
            .format(&Rfc3339)
            .map_err(|err| CoreError::Persistence(format!("failed to format timestamp: {err}")))?;

        self.store
            .set(KEY_WORKER_STATUS, intent.desired.as_str())?;
        self.store.set(KEY_WORKER_ID, intent.worker_id.as_str())?;
        self.store.set(KEY_WORKER_STATUS_UPDATED_AT, &set_at)?;
        if intent.reconciled_once {
            self.store.set(KEY_RECONCILED, RECONCILED_FLAG)?;
        } else {
            self.store.remove(KEY_RECONCILED)?;
        }
        Ok(())
    }

    /// Reads the stored intent back. Missing or unreadable fields yield
    /// `None` rather than an error: a half-written or legacy entry is
    /// treated as absent.
    pub fn load(&self) -> Result<Option<StatusIntent>, CoreError> {
        let Some(raw_status) = self.store.get(KEY_WORKER_STATUS)? else {
            return Ok(None);
        };
        let Some(raw_worker_id) = self.store.get(KEY_WORKER_ID)? else {
            return Ok(None);
        };
        let Some(raw_set_at) = self.store.get(KEY_WORKER_STATUS_UPDATED_AT)? else {
            return Ok(None);
        };

        let Some(desired) = WorkerStatus::parse(&raw_status) else {
            return Ok(None);
        };
        let Ok(set_at) = OffsetDateTime::parse(&raw_set_at, &Rfc3339) else {
            return Ok(None);
        };
        let reconciled_once =
            self.store.get(KEY_RECONCILED)?.as_deref() == Some(RECONCILED_FLAG);

        Ok(Some(StatusIntent {
            worker_id: WorkerId::new(raw_worker_id),
            desired,
            set_at,
            reconciled_once,
        }))
    }

    pub fn mark_reconciled(&self) -> Result<(), CoreError> {
        self.store.set(KEY_RECONCILED, RECONCILED_FLAG)
    }

    pub fn clear(&self) -> Result<(), CoreError> {
        self.store.remove(KEY_WORKER_STATUS)?;
        self.store.remove(KEY_WORKER_ID)?;
        self.store.remove(KEY_WORKER_STATUS_UPDATED_AT)?;
        self.store.remove(KEY_RECONCILED)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use curbsync_core::test_support::ManualClock;
    use curbsync_core::{Clock, MemoryKeyValueStore, WorkerId, WorkerStatus};

    use super::{IntentStore, StatusIntent, KEY_WORKER_STATUS_UPDATED_AT};

    fn store() -> IntentStore {
        IntentStore::new(Arc::new(MemoryKeyValueStore::default()))
    }

    #[test]
    fn save_and_load_round_trip() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let intents = store();
        let intent = StatusIntent::new(WorkerId::new("w-1"), WorkerStatus::Inactive, &clock);

        intents.save(&intent).expect("save intent");
        let loaded = intents.load().expect("load intent").expect("intent stored");
        assert_eq!(loaded, intent);
        assert!(!loaded.reconciled_once);
    }

    #[test]
    fn mark_reconciled_survives_reload_and_save_clears_it() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let intents = store();
        let intent = StatusIntent::new(WorkerId::new("w-1"), WorkerStatus::Active, &clock);

        intents.save(&intent).expect("save intent");
        intents.mark_reconciled().expect("mark reconciled");
        assert!(intents.load().expect("load").expect("stored").reconciled_once);

        // A new toggle writes a fresh intent, clearing the guard.
        intents.save(&intent).expect("save again");
        assert!(!intents.load().expect("load").expect("stored").reconciled_once);
    }

    #[test]
    fn clear_removes_every_key() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let intents = store();
        intents
            .save(&StatusIntent::new(
                WorkerId::new("w-1"),
                WorkerStatus::Active,
                &clock,
            ))
            .expect("save intent");

        intents.clear().expect("clear intent");
        assert_eq!(intents.load().expect("load"), None);
    }

    #[test]
    fn malformed_timestamps_read_as_absent() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let backing = Arc::new(MemoryKeyValueStore::default());
        let intents = IntentStore::new(backing.clone());
        intents
            .save(&StatusIntent::new(
                WorkerId::new("w-1"),
                WorkerStatus::Active,
                &clock,
            ))
            .expect("save intent");

        use curbsync_core::KeyValueStore;
        backing
            .set(KEY_WORKER_STATUS_UPDATED_AT, "yesterday-ish")
            .expect("corrupt timestamp");
        assert_eq!(intents.load().expect("load"), None);
    }

    #[test]
    fn expiry_respects_the_authority_window() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let intent = StatusIntent::new(WorkerId::new("w-1"), WorkerStatus::Active, &clock);
        let window = Duration::from_secs(24 * 60 * 60);

        clock.advance(Duration::from_secs(23 * 60 * 60));
        assert!(!intent.is_expired(clock.now(), window));

        clock.advance(Duration::from_secs(2 * 60 * 60));
        assert!(intent.is_expired(clock.now(), window));
    }

    #[test]
    fn intents_only_match_their_own_worker() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let intent = StatusIntent::new(WorkerId::new("w-a"), WorkerStatus::Active, &clock);
        assert!(intent.matches(&WorkerId::new("w-a")));
        assert!(!intent.matches(&WorkerId::new("w-b")));
    }
}
