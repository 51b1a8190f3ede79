use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use curbsync_api::{ApiError, FleetClient, HttpMethod, RequestDescriptor, RestTransport};
use curbsync_core::test_support::ManualClock;
use curbsync_core::{KeyValueStore, MemoryKeyValueStore, WorkerId, WorkerStatus};
use curbsync_reconcile::intent::KEY_WORKER_STATUS;
use curbsync_reconcile::{
    BackoffPolicy, IntentStore, StatusController, StatusEvent, StatusIntent, StatusSyncConfig,
};
use serde_json::{json, Value};

type RouteKey = (HttpMethod, String);

/// Fake fleet backend: responses are scripted per route, consumed in order,
/// and the final scripted response repeats. Every call is recorded.
#[derive(Default)]
struct FakeFleet {
    responses: Mutex<HashMap<RouteKey, Vec<Result<Value, ApiError>>>>,
    calls: Mutex<Vec<(HttpMethod, String, Option<Value>)>>,
}

impl FakeFleet {
    fn respond(&self, method: HttpMethod, path: &str, response: Result<Value, ApiError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .entry((method, path.to_owned()))
            .or_default()
            .push(response);
    }

    fn calls_to(&self, method: HttpMethod, path: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(m, p, _)| *m == method && p == path)
            .count()
    }

    fn call_paths(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, path, _)| path.clone())
            .collect()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl RestTransport for FakeFleet {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Value, ApiError> {
        self.calls.lock().expect("calls lock").push((
            request.method,
            request.path.clone(),
            request.body.clone(),
        ));

        let mut responses = self.responses.lock().expect("responses lock");
        match responses.get_mut(&(request.method, request.path.clone())) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Err(ApiError::Status {
                status: 404,
                body: format!("no scripted route for {}", request.path),
            }),
        }
    }
}

fn server_error() -> Result<Value, ApiError> {
    Err(ApiError::Status {
        status: 500,
        body: "internal error".to_owned(),
    })
}

fn worker_payload(worker_status: &str, status: &str) -> Result<Value, ApiError> {
    Ok(json!({
        "id": "w-1",
        "workerStatus": worker_status,
        "status": status,
    }))
}

fn fast_config() -> StatusSyncConfig {
    StatusSyncConfig {
        verify_delay: Duration::from_millis(0),
        monitor_interval: Duration::from_millis(10),
        authority_window: Duration::from_secs(24 * 60 * 60),
        retry: BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(0),
        },
    }
}

struct Fixture {
    controller: StatusController,
    fleet: Arc<FakeFleet>,
    store: Arc<MemoryKeyValueStore>,
    clock: Arc<ManualClock>,
}

fn fixture(initial: WorkerStatus) -> Fixture {
    let fleet = Arc::new(FakeFleet::default());
    let store = Arc::new(MemoryKeyValueStore::default());
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let client = FleetClient::with_transport(fleet.clone());
    let controller = StatusController::with_parts(
        WorkerId::new("w-1"),
        initial,
        client,
        store.clone() as Arc<dyn KeyValueStore>,
        clock.clone(),
        fast_config(),
    );
    Fixture {
        controller,
        fleet,
        store,
        clock,
    }
}

fn seed_intent(fixture: &Fixture, worker: &str, desired: WorkerStatus) {
    let intents = IntentStore::new(fixture.store.clone() as Arc<dyn KeyValueStore>);
    intents
        .save(&StatusIntent::new(
            WorkerId::new(worker),
            desired,
            fixture.clock.as_ref(),
        ))
        .expect("seed intent");
}

#[tokio::test]
async fn double_toggle_returns_to_the_original_status_and_intent() {
    let fixture = fixture(WorkerStatus::Active);
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1/status", Ok(Value::Null));
    // Convergence checks fail so the persisted intent stays observable.
    fixture
        .fleet
        .respond(HttpMethod::Get, "/workers/w-1", server_error());

    let first = fixture.controller.toggle().await.expect("first toggle");
    assert_eq!(first, WorkerStatus::Inactive);
    let second = fixture.controller.toggle().await.expect("second toggle");
    assert_eq!(second, WorkerStatus::Active);
    fixture.controller.wait_for_sync().await;

    assert_eq!(fixture.controller.displayed_status(), WorkerStatus::Active);
    assert_eq!(
        fixture.store.get(KEY_WORKER_STATUS).expect("read intent"),
        Some("active".to_owned())
    );
}

#[tokio::test]
async fn expired_intents_are_dropped_without_touching_the_server() {
    let fixture = fixture(WorkerStatus::Active);
    seed_intent(&fixture, "w-1", WorkerStatus::Inactive);
    fixture.clock.advance(Duration::from_secs(25 * 60 * 60));

    let mut events = fixture.controller.subscribe();
    fixture.controller.monitor_tick().await.expect("tick");

    assert_eq!(fixture.fleet.total_calls(), 0);
    assert_eq!(fixture.store.get(KEY_WORKER_STATUS).expect("read"), None);
    assert_eq!(
        events.try_recv().expect("expiry event"),
        StatusEvent::IntentExpired {
            worker_id: WorkerId::new("w-1"),
        }
    );
}

#[tokio::test]
async fn foreign_intents_are_never_applied_or_reconciled() {
    let fixture = fixture(WorkerStatus::Active);
    seed_intent(&fixture, "w-other", WorkerStatus::Inactive);

    let restored = fixture.controller.restore().expect("restore");
    assert_eq!(restored, None);
    assert_eq!(fixture.controller.displayed_status(), WorkerStatus::Active);

    fixture.controller.monitor_tick().await.expect("tick");
    assert_eq!(fixture.fleet.total_calls(), 0);

    // The foreign entry is left alone, not treated as ours to clean up.
    assert_eq!(
        fixture.store.get(KEY_WORKER_STATUS).expect("read"),
        Some("inactive".to_owned())
    );
}

#[tokio::test]
async fn persistent_divergence_is_force_reconciled_exactly_once() {
    let fixture = fixture(WorkerStatus::Inactive);
    seed_intent(&fixture, "w-1", WorkerStatus::Inactive);
    // Server keeps reporting the opposite value on both fields.
    fixture
        .fleet
        .respond(HttpMethod::Get, "/workers/w-1", worker_payload("active", "active"));
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1/status", Ok(Value::Null));

    let mut events = fixture.controller.subscribe();
    fixture.controller.monitor_tick().await.expect("first tick");
    fixture.controller.monitor_tick().await.expect("second tick");
    fixture.controller.monitor_tick().await.expect("third tick");

    assert_eq!(
        fixture
            .fleet
            .calls_to(HttpMethod::Patch, "/workers/w-1/status"),
        1
    );
    assert_eq!(fixture.fleet.calls_to(HttpMethod::Patch, "/workers/w-1"), 0);
    assert_eq!(fixture.fleet.calls_to(HttpMethod::Get, "/workers/w-1"), 3);

    assert_eq!(
        events.try_recv().expect("forced event"),
        StatusEvent::ReconcileForced {
            worker_id: WorkerId::new("w-1"),
            status: WorkerStatus::Inactive,
        }
    );
    assert!(events.try_recv().is_err(), "no second forced reconcile");
}

#[tokio::test]
async fn toggle_falls_back_to_the_generic_endpoint_and_verifies_convergence() {
    let fixture = fixture(WorkerStatus::Active);
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1/status", server_error());
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1", Ok(Value::Null));
    fixture
        .fleet
        .respond(HttpMethod::Get, "/workers/w-1", worker_payload("inactive", "inactive"));

    let mut events = fixture.controller.subscribe();
    let desired = fixture.controller.toggle().await.expect("toggle");
    assert_eq!(desired, WorkerStatus::Inactive);
    // Optimistic: visible before the network round trips finish.
    assert_eq!(fixture.controller.displayed_status(), WorkerStatus::Inactive);

    fixture.controller.wait_for_sync().await;

    assert_eq!(
        fixture.fleet.call_paths(),
        vec!["/workers/w-1/status", "/workers/w-1", "/workers/w-1"]
    );
    // Confirmed convergence clears the stored intent.
    assert_eq!(fixture.store.get(KEY_WORKER_STATUS).expect("read"), None);

    assert_eq!(
        events.try_recv().expect("optimistic event"),
        StatusEvent::StatusChanged {
            worker_id: WorkerId::new("w-1"),
            status: WorkerStatus::Inactive,
        }
    );
    assert_eq!(
        events.try_recv().expect("confirmation event"),
        StatusEvent::SyncConfirmed {
            worker_id: WorkerId::new("w-1"),
            status: WorkerStatus::Inactive,
        }
    );
    assert!(events.try_recv().is_err(), "no forced reconciliation");
}

#[tokio::test]
async fn exhausted_retries_degrade_to_a_warning_and_keep_the_local_value() {
    let fixture = fixture(WorkerStatus::Active);
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1/status", server_error());
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1", server_error());

    let mut events = fixture.controller.subscribe();
    fixture.controller.toggle().await.expect("toggle");
    fixture.controller.wait_for_sync().await;

    // One dedicated attempt, then the generic fallback up to the retry cap.
    assert_eq!(
        fixture
            .fleet
            .calls_to(HttpMethod::Patch, "/workers/w-1/status"),
        1
    );
    assert_eq!(fixture.fleet.calls_to(HttpMethod::Patch, "/workers/w-1"), 3);
    assert_eq!(fixture.fleet.calls_to(HttpMethod::Get, "/workers/w-1"), 0);

    // The display never flickers back and the intent stays persisted.
    assert_eq!(fixture.controller.displayed_status(), WorkerStatus::Inactive);
    assert_eq!(
        fixture.store.get(KEY_WORKER_STATUS).expect("read"),
        Some("inactive".to_owned())
    );

    assert!(matches!(
        events.try_recv().expect("optimistic event"),
        StatusEvent::StatusChanged { .. }
    ));
    match events.try_recv().expect("warning event") {
        StatusEvent::SyncWarning {
            status, message, ..
        } => {
            assert_eq!(status, WorkerStatus::Inactive);
            assert!(message.contains("not confirmed"));
        }
        other => panic!("expected sync warning, got {other:?}"),
    }
}

#[tokio::test]
async fn a_pending_verification_targets_the_latest_stored_intent() {
    let fixture = fixture(WorkerStatus::Inactive);
    // A newer toggle re-targeted the intent to Active while a verification
    // scheduled for the older value was still pending.
    seed_intent(&fixture, "w-1", WorkerStatus::Active);
    fixture
        .fleet
        .respond(HttpMethod::Get, "/workers/w-1", worker_payload("active", "active"));

    let mut events = fixture.controller.subscribe();
    fixture.controller.verify_convergence().await;

    assert_eq!(
        events.try_recv().expect("confirmation event"),
        StatusEvent::SyncConfirmed {
            worker_id: WorkerId::new("w-1"),
            status: WorkerStatus::Active,
        }
    );
    assert_eq!(fixture.store.get(KEY_WORKER_STATUS).expect("read"), None);
}

#[tokio::test]
async fn partial_divergence_on_either_field_triggers_reconciliation() {
    let fixture = fixture(WorkerStatus::Inactive);
    seed_intent(&fixture, "w-1", WorkerStatus::Inactive);
    // The dedicated key converged but the generic one drifted.
    fixture
        .fleet
        .respond(HttpMethod::Get, "/workers/w-1", worker_payload("inactive", "active"));
    fixture
        .fleet
        .respond(HttpMethod::Patch, "/workers/w-1/status", Ok(Value::Null));

    fixture.controller.monitor_tick().await.expect("tick");

    assert_eq!(
        fixture
            .fleet
            .calls_to(HttpMethod::Patch, "/workers/w-1/status"),
        1
    );
}

#[tokio::test]
async fn the_monitor_task_confirms_convergence_and_stops_cleanly() {
    let fixture = fixture(WorkerStatus::Inactive);
    seed_intent(&fixture, "w-1", WorkerStatus::Inactive);
    fixture
        .fleet
        .respond(HttpMethod::Get, "/workers/w-1", worker_payload("inactive", "inactive"));

    fixture.controller.start_monitor().await;
    // Starting twice is a no-op rather than a second task.
    fixture.controller.start_monitor().await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    fixture.controller.stop_monitor().await.expect("stop monitor");
    fixture
        .controller
        .stop_monitor()
        .await
        .expect("stop is idempotent");

    assert!(fixture.fleet.calls_to(HttpMethod::Get, "/workers/w-1") >= 1);
    assert_eq!(fixture.store.get(KEY_WORKER_STATUS).expect("read"), None);
}

#[tokio::test]
async fn restore_applies_a_recent_intent_for_this_worker() {
    let fixture = fixture(WorkerStatus::Active);
    seed_intent(&fixture, "w-1", WorkerStatus::Inactive);

    let restored = fixture.controller.restore().expect("restore");
    assert_eq!(restored, Some(WorkerStatus::Inactive));
    assert_eq!(fixture.controller.displayed_status(), WorkerStatus::Inactive);
}
