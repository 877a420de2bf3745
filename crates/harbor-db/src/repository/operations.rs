//! # Operation Queue Repository
//!
//! Persists write intents that could not reach the network.
//!
//! ## Queue Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Queued Operation Lifecycle                           │
//! │                                                                         │
//! │  Gateway write fails while offline                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  queue(user, request)                                                  │
//! │    INSERT INTO queued_operations (id, user_id, kind, endpoint,         │
//! │                                   payload, enqueued_at)                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 DRAIN PASS (harbor-sync)                        │   │
//! │  │                                                                 │   │
//! │  │  1. pending_for_user(user)  ORDER BY seq  (FIFO)               │   │
//! │  │                                                                 │   │
//! │  │  2. For each entry:                                            │   │
//! │  │     a. retry_count >= cap?  skip, report, keep the row         │   │
//! │  │     b. Replay to the remote API                                │   │
//! │  │     c. On success: remove(id)  (DELETE)                        │   │
//! │  │     d. On failure: increment_retry(id, error)                  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • The endpoint and payload columns are never updated                  │
//! │  • retry_count only ever goes up                                       │
//! │  • A row leaves the table only through remove() or a user wipe         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use harbor_core::{Endpoint, OperationKind, OperationRequest, QueuedOperation, UserScope};

use super::{from_millis, to_millis};
use crate::error::{DbError, DbResult};

const ENTITY: &str = "operation";

/// A `queued_operations` row as stored.
#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: String,
    user_id: String,
    kind: OperationKind,
    endpoint: String,
    payload: Option<String>,
    retry_count: i64,
    enqueued_at: i64,
}

impl OperationRow {
    fn into_operation(self) -> DbResult<QueuedOperation> {
        let id = self.id;
        let invalid = |reason: &dyn ToString| DbError::invalid_row(ENTITY, id.as_str(), reason.to_string());

        let user = UserScope::new(self.user_id).map_err(|e| invalid(&e))?;
        let endpoint = Endpoint::parse(self.endpoint).map_err(|e| invalid(&e))?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| invalid(&e))?;
        let request =
            OperationRequest::from_parts(self.kind, endpoint, payload).map_err(|e| invalid(&e))?;
        let retry_count = u32::try_from(self.retry_count).map_err(|e| invalid(&e))?;
        let enqueued_at = from_millis(ENTITY, &id, self.enqueued_at)?;

        Ok(QueuedOperation::new(id, user, request, enqueued_at, retry_count))
    }
}

/// Repository for the pending-operation queue.
#[derive(Debug, Clone)]
pub struct OperationRepository {
    pool: SqlitePool,
}

impl OperationRepository {
    /// Creates a new OperationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OperationRepository { pool }
    }

    /// Persists a new operation with a fresh id and a zero retry count.
    ///
    /// ## Returns
    /// The stored operation. An `Err` means nothing was written.
    pub async fn queue(
        &self,
        user: &UserScope,
        request: &OperationRequest,
    ) -> DbResult<QueuedOperation> {
        let id = Uuid::new_v4().to_string();
        let enqueued_at = Utc::now();

        let payload = request
            .payload()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DbError::invalid_row(ENTITY, &id, e))?;

        debug!(
            operation_id = %id,
            user_id = %user,
            kind = %request.kind(),
            endpoint = %request.endpoint(),
            "Queuing operation"
        );

        sqlx::query(
            r#"
            INSERT INTO queued_operations (
                id, user_id, kind, endpoint, payload, retry_count, enqueued_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            "#,
        )
        .bind(&id)
        .bind(user.as_str())
        .bind(request.kind())
        .bind(request.endpoint().as_str())
        .bind(payload)
        .bind(to_millis(enqueued_at))
        .execute(&self.pool)
        .await?;

        Ok(QueuedOperation::new(
            id,
            user.clone(),
            request.clone(),
            enqueued_at,
            0,
        ))
    }

    /// Gets a user's pending operations, oldest first.
    ///
    /// This order is the replay order.
    pub async fn pending_for_user(&self, user: &UserScope) -> DbResult<Vec<QueuedOperation>> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, kind, endpoint, payload, retry_count, enqueued_at
            FROM queued_operations
            WHERE user_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OperationRow::into_operation).collect()
    }

    /// Gets a single operation by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueuedOperation>> {
        let row: Option<OperationRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, kind, endpoint, payload, retry_count, enqueued_at
            FROM queued_operations
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OperationRow::into_operation).transpose()
    }

    /// Deletes an operation after its replay was confirmed.
    ///
    /// ## Returns
    /// `true` if a row was deleted.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM queued_operations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed replay.
    ///
    /// ## Returns
    /// The new retry count.
    pub async fn increment_retry(&self, id: &str, error: &str) -> DbResult<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE queued_operations SET
                retry_count = retry_count + 1,
                last_error = ?2
            WHERE id = ?1
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        let count = count.ok_or_else(|| DbError::not_found(ENTITY, id))?;
        u32::try_from(count).map_err(|e| DbError::invalid_row(ENTITY, id, e))
    }

    /// Last replay error recorded for an operation, if any.
    pub async fn last_error(&self, id: &str) -> DbResult<Option<String>> {
        let error: Option<Option<String>> =
            sqlx::query_scalar("SELECT last_error FROM queued_operations WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(error.flatten())
    }

    /// Counts a user's pending operations.
    pub async fn count_for_user(&self, user: &UserScope) -> DbResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queued_operations WHERE user_id = ?1")
                .bind(user.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    fn user(id: &str) -> UserScope {
        UserScope::new(id).unwrap()
    }

    fn create(path: &str, body: serde_json::Value) -> OperationRequest {
        OperationRequest::create(Endpoint::parse(path).unwrap(), body).unwrap()
    }

    async fn repo() -> OperationRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().operations()
    }

    #[tokio::test]
    async fn test_queue_and_list_in_fifo_order() {
        let repo = repo().await;
        let owner = user("user-1");

        let first = repo.queue(&owner, &create("/api/messages", json!({ "n": 1 }))).await.unwrap();
        let second = repo
            .queue(
                &owner,
                &OperationRequest::update(
                    Endpoint::parse("/api/messages/1/read").unwrap(),
                    json!({ "readAt": "2024-01-01T00:00:00Z" }),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let third = repo
            .queue(
                &owner,
                &OperationRequest::delete(Endpoint::parse("/api/goals/9").unwrap(), None).unwrap(),
            )
            .await
            .unwrap();

        let pending = repo.pending_for_user(&owner).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|op| op.id()).collect();
        assert_eq!(ids, vec![first.id(), second.id(), third.id()]);

        assert_eq!(pending[1].kind(), OperationKind::Update);
        assert_eq!(pending[2].payload(), None);
        assert_eq!(pending[0].retry_count(), 0);
    }

    #[tokio::test]
    async fn test_users_are_partitioned() {
        let repo = repo().await;
        let alice = user("alice");
        let bob = user("bob");

        repo.queue(&alice, &create("/api/messages", json!({}))).await.unwrap();

        assert_eq!(repo.count_for_user(&alice).await.unwrap(), 1);
        assert_eq!(repo.count_for_user(&bob).await.unwrap(), 0);
        assert!(repo.pending_for_user(&bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_increment_retry_is_monotonic() {
        let repo = repo().await;
        let owner = user("user-1");
        let op = repo.queue(&owner, &create("/api/messages", json!({}))).await.unwrap();

        assert_eq!(repo.increment_retry(op.id(), "HTTP 500").await.unwrap(), 1);
        assert_eq!(repo.increment_retry(op.id(), "HTTP 502").await.unwrap(), 2);

        let stored = repo.get(op.id()).await.unwrap().unwrap();
        assert_eq!(stored.retry_count(), 2);
        assert_eq!(stored.payload(), op.payload());
        assert_eq!(repo.last_error(op.id()).await.unwrap().as_deref(), Some("HTTP 502"));
    }

    #[tokio::test]
    async fn test_increment_retry_on_missing_operation() {
        let repo = repo().await;
        let err = repo.increment_retry("nope", "boom").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove() {
        let repo = repo().await;
        let owner = user("user-1");
        let op = repo.queue(&owner, &create("/api/messages", json!({}))).await.unwrap();

        assert!(repo.remove(op.id()).await.unwrap());
        assert!(!repo.remove(op.id()).await.unwrap());
        assert!(repo.get(op.id()).await.unwrap().is_none());
    }
}
