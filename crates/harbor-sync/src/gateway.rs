//! # Offline-Aware Request Gateway
//!
//! The single path domain code uses to talk to the API.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request(method, endpoint, payload)                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  remote.send()   (always tried, even when believed offline)            │
//! │       │                                                                 │
//! │       ├── Ok(body) ─────────────────────────────► Remote(body)          │
//! │       │                                                                 │
//! │       └── Err(e)                                                        │
//! │            ├── Unauthorized ────────────────────► Err(e)  never queued  │
//! │            ├── mutating verb && monitor offline                         │
//! │            │   && Network or Remote status error                        │
//! │            │        └── queue.enqueue ──────────► Queued { operation }  │
//! │            │                  └── store failed ─► Err(Persistence)      │
//! │            └── otherwise ───────────────────────► Err(e)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use harbor_core::{Endpoint, Method, QueuedOperation};

use crate::error::SyncResult;
use crate::monitor::NetworkMonitor;
use crate::queue::QueueManager;
use crate::remote::RemoteApi;

/// Message attached to the synthetic success of a queued write.
pub const QUEUED_MESSAGE: &str = "Operation queued for sync when online";

/// What a gateway request produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse {
    /// The server answered.
    Remote(Value),
    /// The write was stored for replay.
    Queued { operation: QueuedOperation },
}

impl GatewayResponse {
    pub fn is_queued(&self) -> bool {
        matches!(self, GatewayResponse::Queued { .. })
    }

    /// The response body, or the synthetic body of a queued write.
    pub fn into_json(self) -> Value {
        match self {
            GatewayResponse::Remote(body) => body,
            GatewayResponse::Queued { operation } => json!({
                "success": true,
                "offline": true,
                "queued": true,
                "operationId": operation.id(),
                "message": QUEUED_MESSAGE,
            }),
        }
    }
}

/// Network-first client that falls back to the queue.
#[derive(Clone)]
pub struct OfflineGateway {
    remote: Arc<dyn RemoteApi>,
    monitor: NetworkMonitor,
    queue: QueueManager,
}

impl OfflineGateway {
    pub fn new(remote: Arc<dyn RemoteApi>, monitor: NetworkMonitor, queue: QueueManager) -> Self {
        OfflineGateway {
            remote,
            monitor,
            queue,
        }
    }

    /// Issues a request, queuing mutating ones that fail while offline.
    ///
    /// Only failures that left the server untouched are queued. A 2xx with
    /// an unreadable body was applied already and is returned as an error.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<Value>,
    ) -> SyncResult<GatewayResponse> {
        let endpoint = Endpoint::parse(endpoint)?;

        let err = match self.remote.send(method, &endpoint, payload.as_ref()).await {
            Ok(body) => return Ok(GatewayResponse::Remote(body)),
            Err(err) => err,
        };

        if err.is_auth_error() {
            return Err(err);
        }

        match method.operation_kind() {
            Some(kind) if !self.monitor.is_online() && err.is_replayable_write_failure() => {
                info!(
                    %method,
                    endpoint = %endpoint,
                    error = %err,
                    "Request failed offline, queuing for sync"
                );
                let operation = self.queue.enqueue(kind, endpoint, payload).await?;
                Ok(GatewayResponse::Queued { operation })
            }
            _ => {
                debug!(%method, endpoint = %endpoint, error = %err, "Request failed");
                Err(err)
            }
        }
    }

    pub async fn get(&self, endpoint: &str) -> SyncResult<Value> {
        Ok(self.request(Method::Get, endpoint, None).await?.into_json())
    }

    pub async fn post(&self, endpoint: &str, payload: Value) -> SyncResult<GatewayResponse> {
        self.request(Method::Post, endpoint, Some(payload)).await
    }

    pub async fn put(&self, endpoint: &str, payload: Value) -> SyncResult<GatewayResponse> {
        self.request(Method::Put, endpoint, Some(payload)).await
    }

    pub async fn delete(&self, endpoint: &str) -> SyncResult<GatewayResponse> {
        self.request(Method::Delete, endpoint, None).await
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }
}
