//! Shared doubles for engine tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Semaphore};

use harbor_core::{
    Endpoint, Method, PassReport, QueuedOperation, SyncPhase, SyncState, UserScope,
};
use harbor_db::{Database, DbConfig};

use crate::coordinator::SyncEvent;
use crate::engine::{SyncEngine, SyncEngineBuilder};
use crate::error::{SyncError, SyncResult};
use crate::monitor::NetworkMonitor;
use crate::notify::SyncNotifier;
use crate::remote::RemoteApi;

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub(crate) fn user() -> UserScope {
    UserScope::new("staff-1").unwrap()
}

/// Engine with no periodic timer and the given debounce.
pub(crate) async fn start_engine(
    db: Database,
    remote: Arc<ScriptedRemote>,
    online: bool,
    debounce: Duration,
) -> SyncEngine {
    SyncEngineBuilder::new(db, remote, user())
        .monitor(NetworkMonitor::new(online))
        .debounce(debounce)
        .periodic_interval(Duration::from_secs(3600))
        .start()
        .await
        .unwrap()
}

// =============================================================================
// Notifier
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl SyncNotifier for RecordingNotifier {
    fn operation_queued(&self, operation: &QueuedOperation) {
        self.push(format!("queued:{}", operation.id()));
    }
    fn sync_completed(&self, count: u32) {
        self.push(format!("completed:{count}"));
    }
    fn sync_issues(&self, count: u32) {
        self.push(format!("issues:{count}"));
    }
    fn sync_failed(&self, reason: &str) {
        self.push(format!("failed:{reason}"));
    }
    fn data_cleared(&self) {
        self.push("cleared".into());
    }
}

// =============================================================================
// Remote
// =============================================================================

type Responder = Box<dyn Fn(Method, &Endpoint, Option<&Value>) -> SyncResult<Value> + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub method: Method,
    pub endpoint: String,
    pub payload: Option<Value>,
}

/// In-process [`RemoteApi`] answering from a swappable closure.
pub(crate) struct ScriptedRemote {
    responder: Mutex<Responder>,
    calls: Mutex<Vec<Call>>,
    call_count: watch::Sender<usize>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedRemote {
    pub(crate) fn new(
        responder: impl Fn(Method, &Endpoint, Option<&Value>) -> SyncResult<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(ScriptedRemote {
            responder: Mutex::new(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
            call_count: watch::channel(0).0,
            gate: None,
        })
    }

    /// Every request is held until the returned semaphore hands out a permit.
    pub(crate) fn gated(
        responder: impl Fn(Method, &Endpoint, Option<&Value>) -> SyncResult<Value> + Send + Sync + 'static,
    ) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let remote = Arc::new(ScriptedRemote {
            responder: Mutex::new(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
            call_count: watch::channel(0).0,
            gate: Some(gate.clone()),
        });
        (remote, gate)
    }

    /// Server that accepts everything. Creates come back wrapped in
    /// `{"message": ...}` with a server id.
    pub(crate) fn echo() -> Arc<Self> {
        Self::new(echo_responder())
    }

    /// Server that is never reachable.
    pub(crate) fn failing() -> Arc<Self> {
        Self::new(|_, _, _| Err(SyncError::Network("connection refused".into())))
    }

    pub(crate) fn set_responder(
        &self,
        responder: impl Fn(Method, &Endpoint, Option<&Value>) -> SyncResult<Value> + Send + Sync + 'static,
    ) {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Resolves once `n` requests have arrived, gated or not.
    pub(crate) async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.call_count.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for requests")
            .unwrap();
    }
}

pub(crate) fn echo_responder(
) -> impl Fn(Method, &Endpoint, Option<&Value>) -> SyncResult<Value> + Send + Sync + 'static {
    let next_id = AtomicUsize::new(1);
    move |method: Method, _endpoint: &Endpoint, payload: Option<&Value>| {
        let mut body = payload.cloned().unwrap_or_else(|| json!({}));
        if method == Method::Post {
            let id = next_id.fetch_add(1, Ordering::SeqCst);
            body["id"] = json!(format!("srv-{id}"));
            Ok(json!({ "message": body }))
        } else {
            Ok(body)
        }
    }
}

#[async_trait]
impl RemoteApi for ScriptedRemote {
    async fn send(
        &self,
        method: Method,
        endpoint: &Endpoint,
        payload: Option<&Value>,
    ) -> SyncResult<Value> {
        self.calls.lock().unwrap().push(Call {
            method,
            endpoint: endpoint.as_str().to_string(),
            payload: payload.cloned(),
        });
        self.call_count.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let responder = self.responder.lock().unwrap();
        (*responder)(method, endpoint, payload)
    }
}

// =============================================================================
// Waiting
// =============================================================================

pub(crate) async fn wait_for_state(
    rx: &mut watch::Receiver<SyncState>,
    pred: impl FnMut(&SyncState) -> bool,
) -> SyncState {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for sync state")
        .unwrap()
        .clone()
}

pub(crate) async fn wait_for_phase(
    rx: &mut watch::Receiver<SyncPhase>,
    pred: impl Fn(SyncPhase) -> bool,
) -> SyncPhase {
    *tokio::time::timeout(WAIT, rx.wait_for(|phase| pred(*phase)))
        .await
        .expect("timed out waiting for sync phase")
        .unwrap()
}

pub(crate) async fn next_pass(rx: &mut broadcast::Receiver<SyncEvent>) -> PassReport {
    tokio::time::timeout(WAIT, async {
        loop {
            if let SyncEvent::PassCompleted(report) = rx.recv().await.unwrap() {
                return report;
            }
        }
    })
    .await
    .expect("timed out waiting for a pass")
}
