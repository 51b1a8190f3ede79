use std::sync::{Arc, RwLock};
use std::time::Duration;

use curbsync_api::FleetClient;
use curbsync_core::{Clock, CoreError, KeyValueStore, SystemClock, WorkerId, WorkerStatus};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backoff::{BackoffPolicy, RetryState};
use crate::error::SyncError;
use crate::events::{StatusEvent, StatusEventFeed};
use crate::intent::{IntentStore, StatusIntent};

const DEFAULT_VERIFY_DELAY_MS: u64 = 5_000;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 60;
const DEFAULT_AUTHORITY_WINDOW_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSyncConfig {
    /// Delay between a confirmed update and the convergence re-check.
    pub verify_delay: Duration,
    /// Cadence of the background drift monitor.
    pub monitor_interval: Duration,
    /// How long a stored intent outranks server-reported state.
    pub authority_window: Duration,
    pub retry: BackoffPolicy,
}

impl Default for StatusSyncConfig {
    fn default() -> Self {
        Self {
            verify_delay: Duration::from_millis(DEFAULT_VERIFY_DELAY_MS),
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            authority_window: Duration::from_secs(DEFAULT_AUTHORITY_WINDOW_SECS),
            retry: BackoffPolicy::default(),
        }
    }
}

impl StatusSyncConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("CURBSYNC_VERIFY_DELAY_MS") {
            config.verify_delay =
                Duration::from_millis(parse_positive_u64("CURBSYNC_VERIFY_DELAY_MS", &raw)?);
        }
        if let Ok(raw) = std::env::var("CURBSYNC_MONITOR_INTERVAL_SECS") {
            config.monitor_interval =
                Duration::from_secs(parse_positive_u64("CURBSYNC_MONITOR_INTERVAL_SECS", &raw)?);
        }
        if let Ok(raw) = std::env::var("CURBSYNC_AUTHORITY_WINDOW_SECS") {
            config.authority_window =
                Duration::from_secs(parse_positive_u64("CURBSYNC_AUTHORITY_WINDOW_SECS", &raw)?);
        }
        if let Ok(raw) = std::env::var("CURBSYNC_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay =
                Duration::from_millis(parse_positive_u64("CURBSYNC_RETRY_BASE_DELAY_MS", &raw)?);
        }
        if let Ok(raw) = std::env::var("CURBSYNC_RETRY_MAX_ATTEMPTS") {
            let attempts = parse_positive_u64("CURBSYNC_RETRY_MAX_ATTEMPTS", &raw)?;
            config.retry.max_attempts = u32::try_from(attempts).map_err(|_| {
                CoreError::Configuration(
                    "CURBSYNC_RETRY_MAX_ATTEMPTS is too large.".to_owned(),
                )
            })?;
        }
        Ok(config)
    }
}

fn parse_positive_u64(name: &str, value: &str) -> Result<u64, CoreError> {
    let parsed = value.trim().parse::<u64>().map_err(|_| {
        CoreError::Configuration(format!("{name} must be an unsigned integer."))
    })?;
    if parsed == 0 {
        return Err(CoreError::Configuration(format!(
            "{name} must be greater than zero."
        )));
    }
    Ok(parsed)
}

#[derive(Debug)]
struct MonitorState {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Keeps one worker's displayed operational status consistent with both the
/// user's intent and backend truth, against a backend known to store the
/// field in two places that drift.
///
/// The displayed value changes optimistically and never flickers back on
/// network failure; divergence is corrected at most once per desired value.
#[derive(Clone)]
pub struct StatusController {
    worker_id: WorkerId,
    client: FleetClient,
    intents: IntentStore,
    clock: Arc<dyn Clock>,
    config: StatusSyncConfig,
    displayed: Arc<RwLock<WorkerStatus>>,
    feed: StatusEventFeed,
    sync_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    monitor: Arc<Mutex<Option<MonitorState>>>,
}

impl StatusController {
    pub fn new(
        worker_id: WorkerId,
        initial_status: WorkerStatus,
        client: FleetClient,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_parts(
            worker_id,
            initial_status,
            client,
            store,
            Arc::new(SystemClock),
            StatusSyncConfig::default(),
        )
    }

    pub fn with_parts(
        worker_id: WorkerId,
        initial_status: WorkerStatus,
        client: FleetClient,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: StatusSyncConfig,
    ) -> Self {
        Self {
            worker_id,
            client,
            intents: IntentStore::new(store),
            clock,
            config,
            displayed: Arc::new(RwLock::new(initial_status)),
            feed: StatusEventFeed::default(),
            sync_task: Arc::new(Mutex::new(None)),
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn displayed_status(&self) -> WorkerStatus {
        *self.displayed.read().expect("status display lock poisoned")
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StatusEvent> {
        self.feed.subscribe()
    }

    /// Applies a stored intent left over from an earlier session, if it
    /// belongs to this worker and is still inside its authority window.
    /// Foreign intents are ignored; expired ones are dropped.
    pub fn restore(&self) -> Result<Option<WorkerStatus>, SyncError> {
        let Some(intent) = self.intents.load()? else {
            return Ok(None);
        };
        if !intent.matches(&self.worker_id) {
            debug!("stored status intent belongs to a different worker; ignoring");
            return Ok(None);
        }
        if intent.is_expired(self.clock.now(), self.config.authority_window) {
            self.intents.clear()?;
            self.feed.publish(StatusEvent::IntentExpired {
                worker_id: self.worker_id.clone(),
            });
            return Ok(None);
        }

        *self.displayed.write().expect("status display lock poisoned") = intent.desired;
        Ok(Some(intent.desired))
    }

    /// Flips the displayed status, persists the new intent and kicks off a
    /// background server update plus delayed convergence check. The display
    /// update is visible before any network traffic starts.
    pub async fn toggle(&self) -> Result<WorkerStatus, SyncError> {
        let desired = {
            let mut displayed = self.displayed.write().expect("status display lock poisoned");
            let next = displayed.toggled();
            *displayed = next;
            next
        };

        let intent = StatusIntent::new(self.worker_id.clone(), desired, self.clock.as_ref());
        self.intents.save(&intent)?;
        self.feed.publish(StatusEvent::StatusChanged {
            worker_id: self.worker_id.clone(),
            status: desired,
        });

        let controller = self.clone();
        let task = tokio::spawn(async move { controller.run_sync(desired).await });
        // The previous sync task is superseded, not cancelled; a newer
        // desired value simply becomes the reconciliation target.
        *self.sync_task.lock().await = Some(task);

        Ok(desired)
    }

    /// Awaits the most recently spawned sync task. Test and shutdown hook.
    pub async fn wait_for_sync(&self) {
        let task = self.sync_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn run_sync(&self, desired: WorkerStatus) {
        if !self.push_status(desired).await {
            warn!(
                worker_id = self.worker_id.as_str(),
                "status update not confirmed by server; keeping local value"
            );
            self.feed.publish(StatusEvent::SyncWarning {
                worker_id: self.worker_id.clone(),
                status: desired,
                message: "status set locally but not confirmed by server".to_owned(),
            });
            return;
        }

        tokio::time::sleep(self.config.verify_delay).await;
        self.verify_convergence().await;
    }

    /// Pushes `desired` to the server: the dedicated status endpoint first,
    /// then the generic record update retried with exponential backoff.
    /// Attempts are strictly sequential. Returns true iff any attempt was
    /// accepted.
    pub async fn push_status(&self, desired: WorkerStatus) -> bool {
        match self.client.update_worker_status(&self.worker_id, desired).await {
            Ok(()) => return true,
            Err(error) => {
                debug!(
                    error = %error,
                    "dedicated status update failed; falling back to generic record update"
                );
            }
        }

        let policy = self.config.retry;
        let mut state = RetryState::first();
        while let RetryState::Attempting(attempt) = state {
            match self.client.update_worker_record(&self.worker_id, desired).await {
                Ok(()) => {
                    state = state.advance(&policy, true);
                }
                Err(error) => {
                    debug!(error = %error, attempt, "generic status update attempt failed");
                    state = state.advance(&policy, false);
                    if !state.is_terminal() {
                        tokio::time::sleep(policy.delay_for(attempt)).await;
                    }
                }
            }
        }

        state == RetryState::Succeeded
    }

    /// Re-fetches the worker record and compares both status fields against
    /// the currently stored desired value. The stored intent is re-read at
    /// fire time, so a toggle issued while the check was pending supersedes
    /// the original target.
    pub async fn verify_convergence(&self) {
        let Some(intent) = self.active_intent() else {
            return;
        };
        let record = match self.client.get_worker(&self.worker_id).await {
            Ok(record) => record,
            Err(error) => {
                debug!(error = %error, "convergence check could not fetch the worker record");
                return;
            }
        };

        if record.converged_on(intent.desired) {
            self.confirm_converged(intent.desired);
            return;
        }
        self.force_reconcile(intent.desired).await;
    }

    /// Re-issues the update without consulting server state, then spends the
    /// one-shot guard so the same desired value is never force-written twice.
    pub async fn force_reconcile(&self, desired: WorkerStatus) {
        match self.intents.load() {
            Ok(Some(intent)) if intent.desired == desired && intent.reconciled_once => {
                debug!(
                    "forced reconciliation already spent for this status; leaving divergence unresolved"
                );
                return;
            }
            Ok(_) => {}
            Err(error) => {
                warn!(error = %error, "cannot guard forced reconciliation; skipping");
                return;
            }
        }

        if let Err(error) = self.intents.mark_reconciled() {
            warn!(error = %error, "failed to persist forced-reconciliation guard");
        }

        if self
            .client
            .update_worker_status(&self.worker_id, desired)
            .await
            .is_err()
        {
            if let Err(error) = self.client.update_worker_record(&self.worker_id, desired).await {
                warn!(error = %error, "forced reconciliation did not reach the server");
            }
        }

        self.feed.publish(StatusEvent::ReconcileForced {
            worker_id: self.worker_id.clone(),
            status: desired,
        });
    }

    /// One pass of the drift monitor. Exposed so tests can drive the
    /// schedule synchronously; [`Self::start_monitor`] runs it on an
    /// interval.
    pub async fn monitor_tick(&self) -> Result<(), SyncError> {
        let Some(intent) = self.intents.load()? else {
            return Ok(());
        };
        if !intent.matches(&self.worker_id) {
            debug!("stored status intent belongs to a different worker; ignoring");
            return Ok(());
        }
        if intent.is_expired(self.clock.now(), self.config.authority_window) {
            self.intents.clear()?;
            self.feed.publish(StatusEvent::IntentExpired {
                worker_id: self.worker_id.clone(),
            });
            return Ok(());
        }

        let record = self.client.get_worker(&self.worker_id).await?;
        if record.converged_on(intent.desired) {
            self.confirm_converged(intent.desired);
            return Ok(());
        }
        self.force_reconcile(intent.desired).await;
        Ok(())
    }

    pub async fn start_monitor(&self) {
        let mut guard = self.monitor.lock().await;
        if guard.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let controller = self.clone();
        let interval_duration = self.config.monitor_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if let Err(error) = controller.monitor_tick().await {
                            warn!(error = %error, "status monitor tick failed");
                        }
                    }
                }
            }
        });

        *guard = Some(MonitorState {
            stop_tx: Some(stop_tx),
            task,
        });
    }

    pub async fn stop_monitor(&self) -> Result<(), SyncError> {
        let state = {
            let mut guard = self.monitor.lock().await;
            guard.take()
        };

        if let Some(mut state) = state {
            if let Some(stop_tx) = state.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            state
                .task
                .await
                .map_err(|error| SyncError::Monitor(format!("monitor task join failed: {error}")))?;
        }

        Ok(())
    }

    fn active_intent(&self) -> Option<StatusIntent> {
        let intent = match self.intents.load() {
            Ok(intent) => intent?,
            Err(error) => {
                warn!(error = %error, "failed to read stored status intent");
                return None;
            }
        };
        if !intent.matches(&self.worker_id) {
            return None;
        }
        if intent.is_expired(self.clock.now(), self.config.authority_window) {
            return None;
        }
        Some(intent)
    }

    fn confirm_converged(&self, status: WorkerStatus) {
        if let Err(error) = self.intents.clear() {
            warn!(error = %error, "failed to clear confirmed status intent");
        }
        self.feed.publish(StatusEvent::SyncConfirmed {
            worker_id: self.worker_id.clone(),
            status,
        });
    }
}
