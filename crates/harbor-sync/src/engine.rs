//! # Sync Engine
//!
//! Owns the shared state and the coordinator task, and hands out the
//! gateway and queue that domain code uses.
//!
//! ## Component Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SyncEngine                                    │
//! │                                                                         │
//! │   NetworkMonitor ────────────┐                                          │
//! │        │ watch<bool>         │                                          │
//! │        ▼                     ▼                                          │
//! │   ┌──────────────┐    ┌──────────────┐   mpsc<Command>   ┌───────────┐  │
//! │   │ Coordinator  │◄───│ QueueManager │◄──────────────────│  Gateway  │  │
//! │   │   (task)     │    └──────────────┘      enqueue      └───────────┘  │
//! │   └──────┬───────┘                                                      │
//! │          │ spawns                                                       │
//! │          ▼                                                              │
//! │   ┌──────────────┐    watch<SyncState>   ┌──────────────────────────┐   │
//! │   │  DrainPass   │──────────────────────►│ subscribers (UI, hooks)  │   │
//! │   └──────────────┘    broadcast<Event>   └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let engine = SyncEngineBuilder::new(db, remote, user)
//!     .monitor(monitor.clone())
//!     .notifier(Arc::new(TracingNotifier))
//!     .start()
//!     .await?;
//!
//! let gateway = engine.gateway();
//! gateway.post("/api/messages", body).await?;
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use harbor_core::{
    PassReport, StorageStats, SyncPhase, SyncSchedule, SyncState, UserScope, DEFAULT_DEBOUNCE_MS,
    DEFAULT_PERIODIC_INTERVAL_SECS, LAST_SYNC_TIME_KEY, MAX_RETRY_ATTEMPTS,
};
use harbor_db::Database;

use crate::config::SyncConfig;
use crate::coordinator::{Command, Coordinator, DrainPass, PassStart, SyncEvent};
use crate::error::{SyncError, SyncResult};
use crate::gateway::OfflineGateway;
use crate::monitor::NetworkMonitor;
use crate::notify::{NoOpNotifier, SyncNotifier};
use crate::queue::QueueManager;
use crate::remote::RemoteApi;
use crate::state::SharedSyncState;

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    db: Database,
    remote: Arc<dyn RemoteApi>,
    user: UserScope,
    monitor: Option<NetworkMonitor>,
    notifier: Arc<dyn SyncNotifier>,
    debounce: Duration,
    periodic_interval: Duration,
    max_retries: u32,
}

impl SyncEngineBuilder {
    pub fn new(db: Database, remote: Arc<dyn RemoteApi>, user: UserScope) -> Self {
        SyncEngineBuilder {
            db,
            remote,
            user,
            monitor: None,
            notifier: Arc::new(NoOpNotifier),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            periodic_interval: Duration::from_secs(DEFAULT_PERIODIC_INTERVAL_SECS),
            max_retries: MAX_RETRY_ATTEMPTS,
        }
    }

    /// Shares connectivity with whoever feeds the platform signal.
    /// Without one the engine assumes it is online.
    pub fn monitor(mut self, monitor: NetworkMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn SyncNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = interval;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Takes the timing settings from a loaded config.
    pub fn from_config(self, config: &SyncConfig) -> Self {
        self.debounce(config.debounce())
            .periodic_interval(config.periodic_interval())
            .max_retries(config.sync.max_retries)
    }

    /// Loads the persisted state and spawns the coordinator.
    ///
    /// ## Errors
    /// A store failure while reading the queue size.
    pub async fn start(self) -> SyncResult<SyncEngine> {
        if self.periodic_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "periodic interval must be greater than 0".into(),
            ));
        }

        let monitor = self.monitor.unwrap_or_default();
        let state = SharedSyncState::new(SyncState {
            is_online: monitor.is_online(),
            ..SyncState::default()
        });

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        let queue = QueueManager::new(
            &self.db,
            self.user.clone(),
            state.clone(),
            self.notifier.clone(),
        )
        .with_trigger(commands.clone());

        queue.refresh_pending_count().await?;
        let last_sync_time = load_last_sync_time(&self.db, &self.user).await;
        state.update(|s| s.last_sync_time = last_sync_time);

        let pass = DrainPass {
            queue: queue.clone(),
            remote: self.remote.clone(),
            settings: self.db.settings(),
            state: state.clone(),
            notifier: self.notifier.clone(),
            events: events.clone(),
            max_retries: self.max_retries,
        };

        let (phase_tx, phase) = watch::channel(SyncPhase::Idle);
        let coordinator = Coordinator::new(
            SyncSchedule::new(self.debounce),
            phase_tx,
            monitor.clone(),
            command_rx,
            pass,
            self.periodic_interval,
        );
        let task = tokio::spawn(coordinator.run());

        let snapshot = state.snapshot();
        info!(
            user_id = %self.user,
            pending_count = snapshot.pending_count,
            online = snapshot.is_online,
            "Sync engine started"
        );

        Ok(SyncEngine {
            db: self.db,
            user: self.user,
            remote: self.remote,
            monitor,
            state,
            phase,
            queue,
            notifier: self.notifier,
            events,
            commands,
            task: Mutex::new(Some(task)),
        })
    }
}

async fn load_last_sync_time(db: &Database, user: &UserScope) -> Option<DateTime<Utc>> {
    match db.settings().get(user, LAST_SYNC_TIME_KEY).await {
        Ok(Some(Value::String(text))) => DateTime::parse_from_rfc3339(&text)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| warn!(value = %text, error = %e, "Ignoring unreadable last sync time"))
            .ok(),
        Ok(Some(Value::Number(millis))) => millis.as_i64().and_then(DateTime::from_timestamp_millis),
        Ok(Some(other)) => {
            warn!(value = %other, "Ignoring unreadable last sync time");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Failed to read last sync time");
            None
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// A running sync engine for one user.
pub struct SyncEngine {
    db: Database,
    user: UserScope,
    remote: Arc<dyn RemoteApi>,
    monitor: NetworkMonitor,
    state: SharedSyncState,
    phase: watch::Receiver<SyncPhase>,
    queue: QueueManager,
    notifier: Arc<dyn SyncNotifier>,
    events: broadcast::Sender<SyncEvent>,
    commands: mpsc::Sender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn user(&self) -> &UserScope {
        &self.user
    }

    pub fn state(&self) -> SyncState {
        self.state.snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Follows the scheduler: idle, debounce pending, or mid-pass.
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Request gateway bound to this engine's queue.
    pub fn gateway(&self) -> OfflineGateway {
        OfflineGateway::new(self.remote.clone(), self.monitor.clone(), self.queue.clone())
    }

    // =========================================================================
    // Manual Control
    // =========================================================================

    /// Starts a pass now, skipping the debounce.
    pub async fn force_sync(&self) -> SyncResult<PassStart> {
        self.trigger(None).await
    }

    /// Starts a pass and waits for its report.
    ///
    /// ## Returns
    /// `None` if no pass started (offline or one already running).
    pub async fn sync_now(&self) -> SyncResult<Option<PassReport>> {
        let (done, report) = oneshot::channel();
        match self.trigger(Some(done)).await? {
            PassStart::Started => report.await.map(Some).map_err(|_| SyncError::ShuttingDown),
            PassStart::AlreadySyncing | PassStart::Offline => Ok(None),
        }
    }

    async fn trigger(&self, done: Option<oneshot::Sender<PassReport>>) -> SyncResult<PassStart> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Trigger { reply, done })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        outcome.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Empties the published error list.
    pub async fn clear_sync_errors(&self) -> SyncResult<()> {
        self.state.update(|s| s.sync_errors.clear());
        self.commands
            .send(Command::ClearErrors)
            .await
            .map_err(|e| SyncError::ChannelError(e.to_string()))
    }

    // =========================================================================
    // Local Data
    // =========================================================================

    /// Deletes the user's cached entities and queued operations.
    pub async fn clear_offline_data(&self) -> SyncResult<()> {
        self.db.clear_user_data(&self.user).await.map_err(|e| {
            error!(user_id = %self.user, error = %e, "Failed to clear offline data");
            SyncError::from(e)
        })?;

        self.queue.refresh_pending_count().await?;
        self.clear_sync_errors().await?;
        self.notifier.data_cleared();
        Ok(())
    }

    pub async fn storage_stats(&self) -> SyncResult<StorageStats> {
        Ok(self.db.storage_stats(&self.user).await?)
    }

    /// Drops this user's synced cache entries not written for `days` days.
    pub async fn cleanup_stale_data(&self, days: u32) -> SyncResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        Ok(self.db.entities().cleanup_older_than(&self.user, cutoff).await?)
    }

    /// Stops the coordinator, letting an in-flight pass finish first.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let task = self
            .task
            .lock()
            .map_err(|e| SyncError::ChannelError(e.to_string()))?
            .take();

        let Some(task) = task else {
            return Ok(());
        };

        // The coordinator may already be gone; joining is what matters.
        let _ = self.commands.send(Command::Shutdown).await;
        task.await
            .map_err(|e| SyncError::ChannelError(e.to_string()))?;

        info!(user_id = %self.user, "Sync engine stopped");
        Ok(())
    }
}
