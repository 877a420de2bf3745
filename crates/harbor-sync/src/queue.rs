//! # Operation Queue Manager
//!
//! The engine's view of the durable queue for one user. Every mutation
//! keeps `SyncState::pending_count` in step with the store, and every
//! successful enqueue nudges the coordinator.
//!
//! ```text
//! enqueue(kind, endpoint, payload)
//!    │
//!    ├── validate ──────────────► Err(InvalidOperation)
//!    ├── store.queue ───────────► Err(Persistence)   nothing written
//!    ├── refresh pending_count
//!    ├── notifier.operation_queued
//!    └── coordinator ◄── Command::Enqueued (debounced pass if online)
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use harbor_core::{Endpoint, OperationKind, OperationRequest, QueuedOperation, UserScope};
use harbor_db::{Database, OperationRepository};

use crate::coordinator::Command;
use crate::error::{SyncError, SyncResult};
use crate::notify::SyncNotifier;
use crate::state::SharedSyncState;

/// Queue access scoped to the session's user.
#[derive(Clone)]
pub struct QueueManager {
    operations: OperationRepository,
    user: UserScope,
    state: SharedSyncState,
    notifier: Arc<dyn SyncNotifier>,
    trigger: Option<mpsc::Sender<Command>>,
}

impl QueueManager {
    pub fn new(
        db: &Database,
        user: UserScope,
        state: SharedSyncState,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Self {
        QueueManager {
            operations: db.operations(),
            user,
            state,
            notifier,
            trigger: None,
        }
    }

    /// Connects enqueues to a running coordinator.
    pub(crate) fn with_trigger(mut self, trigger: mpsc::Sender<Command>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn user(&self) -> &UserScope {
        &self.user
    }

    /// Validates and persists a write intent.
    ///
    /// ## Returns
    /// The stored operation. The result says nothing about the remote
    /// outcome, only whether the intent is now durable.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        endpoint: Endpoint,
        payload: Option<Value>,
    ) -> SyncResult<QueuedOperation> {
        let request = OperationRequest::from_parts(kind, endpoint, payload)?;
        self.enqueue_request(request).await
    }

    pub async fn enqueue_request(&self, request: OperationRequest) -> SyncResult<QueuedOperation> {
        let operation = self
            .operations
            .queue(&self.user, &request)
            .await
            .map_err(|e| {
                error!(
                    user_id = %self.user,
                    endpoint = %request.endpoint(),
                    error = %e,
                    "Failed to queue operation"
                );
                SyncError::Persistence(e.to_string())
            })?;

        if let Err(e) = self.refresh_pending_count().await {
            warn!(error = %e, "Queued operation but could not refresh pending count");
        }

        self.notifier.operation_queued(&operation);
        debug!(
            operation_id = %operation.id(),
            kind = %operation.kind(),
            "Operation queued for sync"
        );

        if let Some(trigger) = &self.trigger {
            // A full channel already holds a wake-up for the coordinator.
            if let Err(mpsc::error::TrySendError::Closed(_)) = trigger.try_send(Command::Enqueued) {
                debug!("Coordinator stopped; queued operation waits for the next start");
            }
        }

        Ok(operation)
    }

    /// Pending operations, oldest first.
    pub async fn list(&self) -> SyncResult<Vec<QueuedOperation>> {
        Ok(self.operations.pending_for_user(&self.user).await?)
    }

    /// Deletes an operation. Returns `true` if it existed.
    pub async fn remove(&self, id: &str) -> SyncResult<bool> {
        let removed = self.operations.remove(id).await?;
        if removed {
            self.refresh_pending_count().await?;
        }
        Ok(removed)
    }

    /// Records a failed replay. Returns the new retry count.
    pub async fn increment_retry(&self, id: &str, error: &str) -> SyncResult<u32> {
        Ok(self.operations.increment_retry(id, error).await?)
    }

    /// Re-reads the queue size into the published state.
    pub async fn refresh_pending_count(&self) -> SyncResult<u32> {
        let count = self.operations.count_for_user(&self.user).await?;
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.state.update(|s| s.pending_count = count);
        Ok(count)
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("user", &self.user)
            .field("connected", &self.trigger.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_db, user, RecordingNotifier};
    use serde_json::json;

    async fn manager() -> (QueueManager, Arc<RecordingNotifier>, SharedSyncState) {
        let db = memory_db().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let state = SharedSyncState::default();
        let queue = QueueManager::new(&db, user(), state.clone(), notifier.clone());
        (queue, notifier, state)
    }

    #[tokio::test]
    async fn test_enqueue_updates_count_and_notifies() {
        let (queue, notifier, state) = manager().await;
        let (tx, mut rx) = mpsc::channel(4);
        let queue = queue.with_trigger(tx);

        let op = queue
            .enqueue(
                OperationKind::Create,
                Endpoint::parse("/api/messages").unwrap(),
                Some(json!({ "subject": "Hello" })),
            )
            .await
            .unwrap();

        assert_eq!(op.retry_count(), 0);
        assert_eq!(state.snapshot().pending_count, 1);
        assert_eq!(notifier.events(), vec![format!("queued:{}", op.id())]);
        assert!(matches!(rx.try_recv(), Ok(Command::Enqueued)));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_payload() {
        let (queue, notifier, state) = manager().await;

        let err = queue
            .enqueue(
                OperationKind::Update,
                Endpoint::parse("/api/goals/1").unwrap(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidOperation(_)));
        assert_eq!(state.snapshot().pending_count, 0);
        assert!(notifier.events().is_empty());
        assert!(queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_surfaces_store_failure() {
        let db = memory_db().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let queue = QueueManager::new(&db, user(), SharedSyncState::default(), notifier.clone());
        db.close().await;

        let err = queue
            .enqueue(
                OperationKind::Delete,
                Endpoint::parse("/api/goals/1").unwrap(),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Persistence(_)));
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_retry() {
        let (queue, _notifier, state) = manager().await;
        let op = queue
            .enqueue(
                OperationKind::Delete,
                Endpoint::parse("/api/goals/7").unwrap(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(queue.increment_retry(op.id(), "HTTP 500: Internal Server Error").await.unwrap(), 1);
        assert_eq!(queue.list().await.unwrap()[0].retry_count(), 1);

        assert!(queue.remove(op.id()).await.unwrap());
        assert_eq!(state.snapshot().pending_count, 0);
        assert!(!queue.remove(op.id()).await.unwrap());
    }
}
