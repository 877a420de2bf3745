//! # Sync Coordinator
//!
//! Decides when drain passes run and runs them, one at a time.
//!
//! ## Event Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Coordinator select! loop                           │
//! │                                                                         │
//! │  commands.recv()       Enqueued ──► schedule.on_enqueue (debounce)      │
//! │                        Trigger  ──► start now if online and idle        │
//! │                        ClearErrors / Shutdown                           │
//! │                                                                         │
//! │  online_rx.changed()   online  ──► schedule.on_online                   │
//! │                        offline ──► schedule.on_offline (cancel)         │
//! │                                                                         │
//! │  sleep_until(deadline) ──► schedule.fire_if_due ──► spawn DrainPass     │
//! │                                                                         │
//! │  periodic.tick()       ──► online && pending > 0 && !syncing            │
//! │                                                                         │
//! │  running pass joined   ──► schedule.finish, is_syncing = false,         │
//! │                            broadcast PassCompleted                      │
//! │                                                                         │
//! │  every turn            ──► watch<SyncPhase> = schedule.phase()          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Drain Pass
//! ```text
//! list(user)  (FIFO)
//!   │
//!   ├── retry_count >= cap ──► skip, "Too many retry attempts"
//!   │
//!   ├── send(kind.method(), endpoint, payload)
//!   │     ├── Ok  ──► remove(id), OperationSynced { response }
//!   │     └── Err ──► increment_retry(id), OperationFailed
//!   │
//!   └── lastSyncTime, pending_count, sync_errors = this pass's errors
//! ```
//!
//! The pass is a spawned task; the loop keeps serving commands while it
//! runs, so a manual trigger during a pass is answered `AlreadySyncing`
//! rather than queued behind it.

use std::future::pending;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use harbor_core::{
    PassReport, QueuedOperation, SyncErrorEntry, SyncPhase, SyncSchedule, LAST_SYNC_TIME_KEY,
};
use harbor_db::SettingsRepository;

use crate::error::SyncError;
use crate::monitor::NetworkMonitor;
use crate::notify::SyncNotifier;
use crate::queue::QueueManager;
use crate::remote::RemoteApi;
use crate::state::SharedSyncState;

// =============================================================================
// Messages
// =============================================================================

/// Requests sent to the coordinator task.
#[derive(Debug)]
pub(crate) enum Command {
    /// An operation was queued.
    Enqueued,
    /// Start a pass now. `done` receives the report if it started.
    Trigger {
        reply: oneshot::Sender<PassStart>,
        done: Option<oneshot::Sender<PassReport>>,
    },
    ClearErrors,
    Shutdown,
}

/// Answer to a manual sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStart {
    Started,
    AlreadySyncing,
    Offline,
}

/// Progress published while passes run.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The server confirmed a queued operation; `response` is its body.
    OperationSynced {
        operation: QueuedOperation,
        response: Value,
    },
    /// A replay failed and the operation stays queued.
    OperationFailed {
        operation_id: String,
        message: String,
        retry_count: u32,
    },
    /// A pass ended and `is_syncing` is false again.
    PassCompleted(PassReport),
}

// =============================================================================
// Drain Pass
// =============================================================================

/// Everything one replay pass needs.
#[derive(Clone)]
pub(crate) struct DrainPass {
    pub(crate) queue: QueueManager,
    pub(crate) remote: Arc<dyn RemoteApi>,
    pub(crate) settings: SettingsRepository,
    pub(crate) state: SharedSyncState,
    pub(crate) notifier: Arc<dyn SyncNotifier>,
    pub(crate) events: broadcast::Sender<SyncEvent>,
    pub(crate) max_retries: u32,
}

impl DrainPass {
    /// Replays the user's queue once, in order.
    pub(crate) async fn run(self) -> PassReport {
        let operations = match self.queue.list().await {
            Ok(operations) => operations,
            Err(err) => return self.abort(err),
        };

        info!(
            user_id = %self.queue.user(),
            count = operations.len(),
            "Starting drain pass"
        );

        let mut report = PassReport {
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            finished_at: Utc::now(),
        };

        for operation in operations {
            if operation.is_exhausted(self.max_retries) {
                let skipped = SyncError::RetryExhausted {
                    operation_id: operation.id().to_string(),
                    attempts: operation.retry_count(),
                };
                warn!(
                    operation_id = %operation.id(),
                    attempts = operation.retry_count(),
                    "Skipping operation at retry cap"
                );
                report.skipped += 1;
                report
                    .errors
                    .push(SyncErrorEntry::new(operation.id(), skipped.to_string(), Utc::now()));
                continue;
            }

            let result = self
                .remote
                .send(
                    operation.kind().method(),
                    operation.endpoint(),
                    operation.payload(),
                )
                .await;

            match result {
                Ok(response) => self.confirm(operation, response, &mut report).await,
                Err(err) => self.record_failure(&operation, err, &mut report).await,
            }
        }

        self.complete(report).await
    }

    async fn confirm(&self, operation: QueuedOperation, response: Value, report: &mut PassReport) {
        match self.queue.remove(operation.id()).await {
            Ok(_) => {
                debug!(
                    operation_id = %operation.id(),
                    endpoint = %operation.endpoint(),
                    "Synced operation"
                );
                report.succeeded += 1;
            }
            Err(err) => {
                // Row stays queued and is replayed on the next pass.
                error!(
                    operation_id = %operation.id(),
                    error = %err,
                    "Replayed operation could not be removed from the queue"
                );
                report.failed += 1;
                report
                    .errors
                    .push(SyncErrorEntry::new(operation.id(), err.to_string(), Utc::now()));
            }
        }

        let _ = self
            .events
            .send(SyncEvent::OperationSynced { operation, response });
    }

    async fn record_failure(
        &self,
        operation: &QueuedOperation,
        err: SyncError,
        report: &mut PassReport,
    ) {
        let retryable = err.is_retryable();
        let message = err.to_string();
        let retry_count = match self.queue.increment_retry(operation.id(), &message).await {
            Ok(count) => count,
            Err(store_err) => {
                error!(
                    operation_id = %operation.id(),
                    error = %store_err,
                    "Failed to record retry"
                );
                operation.retry_count()
            }
        };

        let failure = SyncError::TransientSync {
            operation_id: operation.id().to_string(),
            message: message.clone(),
        };
        warn!(
            endpoint = %operation.endpoint(),
            retry_count,
            retryable,
            error = %failure,
            "Failed to sync operation"
        );

        report.failed += 1;
        report
            .errors
            .push(SyncErrorEntry::new(operation.id(), message.clone(), Utc::now()));

        let _ = self.events.send(SyncEvent::OperationFailed {
            operation_id: operation.id().to_string(),
            message,
            retry_count,
        });
    }

    async fn complete(self, mut report: PassReport) -> PassReport {
        let finished_at = Utc::now();
        report.finished_at = finished_at;

        let stamp = Value::String(finished_at.to_rfc3339());
        if let Err(err) = self
            .settings
            .put(self.queue.user(), LAST_SYNC_TIME_KEY, &stamp)
            .await
        {
            error!(error = %err, "Failed to persist last sync time");
        }

        if let Err(err) = self.queue.refresh_pending_count().await {
            error!(error = %err, "Failed to refresh pending count");
        }

        let errors = report.errors.clone();
        self.state.update(|s| {
            s.last_sync_time = Some(finished_at);
            s.sync_errors = errors;
        });

        if report.succeeded > 0 {
            self.notifier.sync_completed(report.succeeded);
        }
        if report.failed > 0 {
            self.notifier.sync_issues(report.failed);
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Drain pass finished"
        );
        report
    }

    /// The queue could not be read; nothing was attempted and the last sync
    /// time is left alone.
    fn abort(&self, err: SyncError) -> PassReport {
        error!(error = %err, "Drain pass failed before replay");
        self.notifier.sync_failed(&err.to_string());
        failure_report(&self.state, err.to_string())
    }
}

fn failure_report(state: &SharedSyncState, message: String) -> PassReport {
    let now = Utc::now();
    let entry = SyncErrorEntry::pass_failure(message, now);
    let errors = vec![entry];
    let published = errors.clone();
    state.update(|s| s.sync_errors = published);

    PassReport {
        succeeded: 0,
        failed: 0,
        skipped: 0,
        errors,
        finished_at: now,
    }
}

// =============================================================================
// Coordinator Task
// =============================================================================

pub(crate) struct Coordinator {
    schedule: SyncSchedule,
    /// Mirrors `schedule.phase()` after every loop turn.
    phase: watch::Sender<SyncPhase>,
    monitor: NetworkMonitor,
    state: SharedSyncState,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SyncEvent>,
    pass: DrainPass,
    periodic_interval: Duration,
    waiters: Vec<oneshot::Sender<PassReport>>,
}

impl Coordinator {
    pub(crate) fn new(
        schedule: SyncSchedule,
        phase: watch::Sender<SyncPhase>,
        monitor: NetworkMonitor,
        commands: mpsc::Receiver<Command>,
        pass: DrainPass,
        periodic_interval: Duration,
    ) -> Self {
        Coordinator {
            schedule,
            phase,
            monitor,
            state: pass.state.clone(),
            commands,
            events: pass.events.clone(),
            pass,
            periodic_interval,
            waiters: Vec::new(),
        }
    }

    /// Runs until `Shutdown` arrives or every command sender is dropped.
    pub(crate) async fn run(mut self) {
        let mut online_rx: watch::Receiver<bool> = self.monitor.subscribe();
        let mut periodic = interval_at(
            Instant::now() + self.periodic_interval,
            self.periodic_interval,
        );
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut running: Option<JoinHandle<PassReport>> = None;

        let online = *online_rx.borrow_and_update();
        self.state.update(|s| s.is_online = online);
        if online && self.state.snapshot().pending_count > 0 {
            self.schedule.on_online(StdInstant::now());
        }

        info!(
            online,
            periodic_secs = self.periodic_interval.as_secs(),
            "Sync coordinator started"
        );

        loop {
            self.publish_phase();
            let deadline = self.schedule.deadline();
            let wake = deadline.map(Instant::from_std).unwrap_or_else(Instant::now);

            tokio::select! {
                result = join_pass(&mut running) => {
                    running = None;
                    self.on_pass_finished(result);
                }

                _ = sleep_until(wake), if deadline.is_some() => {
                    if self.schedule.fire_if_due(StdInstant::now()) {
                        debug!("Debounce elapsed");
                        running = Some(self.spawn_pass());
                    }
                }

                _ = periodic.tick() => {
                    let pending_count = self.state.snapshot().pending_count;
                    if self.schedule.on_periodic(self.monitor.is_online(), pending_count) {
                        debug!(pending_count, "Recovery timer starting pass");
                        running = Some(self.spawn_pass());
                    }
                }

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    self.on_connectivity(online);
                }

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Enqueued) => {
                            self.schedule
                                .on_enqueue(StdInstant::now(), self.monitor.is_online());
                        }
                        Some(Command::Trigger { reply, done }) => {
                            let outcome = if !self.monitor.is_online() {
                                PassStart::Offline
                            } else if self.schedule.try_begin() {
                                running = Some(self.spawn_pass());
                                self.waiters.extend(done);
                                PassStart::Started
                            } else {
                                PassStart::AlreadySyncing
                            };
                            let _ = reply.send(outcome);
                        }
                        Some(Command::ClearErrors) => {
                            self.schedule.clear_errors();
                            self.state.update(|s| s.sync_errors.clear());
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }
            }
        }

        if let Some(handle) = running.take() {
            info!("Waiting for in-flight pass before stopping");
            let result = handle.await;
            self.on_pass_finished(result);
        }
        self.publish_phase();
        info!("Sync coordinator stopped");
    }

    fn publish_phase(&self) {
        let next = self.schedule.phase();
        self.phase.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn spawn_pass(&self) -> JoinHandle<PassReport> {
        self.state.update(|s| s.is_syncing = true);
        tokio::spawn(self.pass.clone().run())
    }

    fn on_pass_finished(&mut self, result: Result<PassReport, JoinError>) {
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                error!(error = %err, "Drain pass task failed");
                self.pass.notifier.sync_failed(&err.to_string());
                failure_report(&self.state, err.to_string())
            }
        };

        self.schedule
            .finish(StdInstant::now(), self.monitor.is_online(), report.had_errors());
        self.state.update(|s| s.is_syncing = false);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(report.clone());
        }
        let _ = self.events.send(SyncEvent::PassCompleted(report));
    }

    fn on_connectivity(&mut self, online: bool) {
        self.state.update(|s| s.is_online = online);
        if online {
            self.schedule.on_online(StdInstant::now());
        } else {
            self.schedule.on_offline();
        }
    }
}

async fn join_pass(running: &mut Option<JoinHandle<PassReport>>) -> Result<PassReport, JoinError> {
    match running.as_mut() {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, user, RecordingNotifier, ScriptedRemote};
    use harbor_core::{Endpoint, OperationKind, TOO_MANY_RETRIES_MESSAGE};
    use harbor_db::Database;
    use serde_json::json;

    struct Fixture {
        db: Database,
        queue: QueueManager,
        state: SharedSyncState,
        notifier: Arc<RecordingNotifier>,
        events: broadcast::Sender<SyncEvent>,
    }

    async fn fixture() -> Fixture {
        let db = memory_db().await;
        let state = SharedSyncState::default();
        let notifier = Arc::new(RecordingNotifier::default());
        let queue = QueueManager::new(&db, user(), state.clone(), notifier.clone());
        let (events, _) = broadcast::channel(64);
        Fixture {
            db,
            queue,
            state,
            notifier,
            events,
        }
    }

    fn pass(fx: &Fixture, remote: Arc<ScriptedRemote>) -> DrainPass {
        DrainPass {
            queue: fx.queue.clone(),
            remote,
            settings: fx.db.settings(),
            state: fx.state.clone(),
            notifier: fx.notifier.clone(),
            events: fx.events.clone(),
            max_retries: 3,
        }
    }

    async fn create(queue: &QueueManager, n: u32) -> QueuedOperation {
        queue
            .enqueue(
                OperationKind::Create,
                Endpoint::parse("/api/messages").unwrap(),
                Some(json!({ "n": n })),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pass_replays_in_fifo_order_and_removes() {
        let fx = fixture().await;
        let remote = ScriptedRemote::echo();
        let first = create(&fx.queue, 1).await;
        create(&fx.queue, 2).await;
        create(&fx.queue, 3).await;

        let mut rx = fx.events.subscribe();
        let report = pass(&fx, remote.clone()).run().await;

        assert_eq!(report.succeeded, 3);
        assert!(!report.had_errors());
        let sent: Vec<Value> = remote
            .calls()
            .into_iter()
            .map(|call| call.payload.unwrap()["n"].clone())
            .collect();
        assert_eq!(sent, vec![json!(1), json!(2), json!(3)]);

        let snapshot = fx.state.snapshot();
        assert_eq!(snapshot.pending_count, 0);
        assert!(snapshot.last_sync_time.is_some());
        assert!(fx.queue.list().await.unwrap().is_empty());

        match rx.recv().await.unwrap() {
            SyncEvent::OperationSynced { operation, .. } => assert_eq!(operation.id(), first.id()),
            other => panic!("unexpected event {:?}", other),
        }
        let notes = fx.notifier.events();
        assert_eq!(notes.iter().filter(|e| e.starts_with("queued:")).count(), 3);
        assert_eq!(notes.last().map(String::as_str), Some("completed:3"));

        let stored = fx.db.settings().get(&user(), LAST_SYNC_TIME_KEY).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_replay_is_idempotent_once_confirmed() {
        let fx = fixture().await;
        let remote = ScriptedRemote::echo();
        create(&fx.queue, 1).await;

        pass(&fx, remote.clone()).run().await;
        let second = pass(&fx, remote.clone()).run().await;

        assert_eq!(second.succeeded, 0);
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_order_and_records_error() {
        let fx = fixture().await;
        let remote = ScriptedRemote::new(|_, _, payload| {
            if payload.and_then(|p| p.get("n")) == Some(&json!(2)) {
                Err(SyncError::Remote {
                    status: 500,
                    message: "Internal Server Error".into(),
                })
            } else {
                Ok(json!({}))
            }
        });
        create(&fx.queue, 1).await;
        let failing = create(&fx.queue, 2).await;
        create(&fx.queue, 3).await;

        let report = pass(&fx, remote.clone()).run().await;

        assert_eq!((report.succeeded, report.failed, report.skipped), (2, 1, 0));
        assert_eq!(remote.calls().len(), 3);

        let left = fx.queue.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), failing.id());
        assert_eq!(left[0].retry_count(), 1);

        let snapshot = fx.state.snapshot();
        assert_eq!(snapshot.pending_count, 1);
        assert_eq!(snapshot.sync_errors.len(), 1);
        assert_eq!(snapshot.sync_errors[0].operation_id, failing.id());
        assert_eq!(snapshot.sync_errors[0].message, "HTTP 500: Internal Server Error");
        assert!(fx.notifier.events().contains(&"issues:1".to_string()));
    }

    #[tokio::test]
    async fn test_retry_cap_skips_but_keeps_operation() {
        let fx = fixture().await;
        let remote = ScriptedRemote::failing();
        let op = create(&fx.queue, 1).await;

        for attempt in 1..=3 {
            let report = pass(&fx, remote.clone()).run().await;
            assert_eq!(report.failed, 1, "attempt {attempt}");
        }
        assert_eq!(remote.calls().len(), 3);

        let report = pass(&fx, remote.clone()).run().await;
        assert_eq!((report.failed, report.skipped), (0, 1));
        assert_eq!(remote.calls().len(), 3);
        assert_eq!(report.errors[0].message, TOO_MANY_RETRIES_MESSAGE);

        let left = fx.queue.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), op.id());
        assert_eq!(fx.state.snapshot().pending_count, 1);
        assert_eq!(fx.state.snapshot().sync_errors[0].operation_id, op.id());
    }

    #[tokio::test]
    async fn test_unreadable_queue_aborts_pass() {
        let fx = fixture().await;
        fx.db.close().await;

        let report = pass(&fx, ScriptedRemote::echo()).run().await;

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].operation_id, harbor_core::PASS_ERROR_ID);
        let snapshot = fx.state.snapshot();
        assert!(snapshot.last_sync_time.is_none());
        assert_eq!(snapshot.sync_errors.len(), 1);
        assert!(fx.notifier.events().iter().any(|e| e.starts_with("failed:")));
    }
}
