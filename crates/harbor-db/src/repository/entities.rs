//! # Entity Cache Repository
//!
//! Last known copy of each domain object, per user and kind.
//!
//! Rows are upserted on `(user_id, kind, id)`, so writing an entity twice
//! never duplicates it. Replacing a temporary id with the server's id is a
//! remove plus a put, done by the domain hook.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use harbor_core::{CachedEntity, EntityKind, EntitySyncStatus, UserScope};

use super::{from_millis, to_millis};
use crate::error::{DbError, DbResult};

const ENTITY: &str = "cached entity";

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    id: String,
    kind: EntityKind,
    user_id: String,
    data: String,
    sync_status: EntitySyncStatus,
    updated_at: i64,
}

impl EntityRow {
    fn into_entity(self) -> DbResult<CachedEntity> {
        let data = serde_json::from_str(&self.data)
            .map_err(|e| DbError::invalid_row(ENTITY, &self.id, e))?;
        let updated_at = from_millis(ENTITY, &self.id, self.updated_at)?;

        Ok(CachedEntity {
            id: self.id,
            kind: self.kind,
            user_id: self.user_id,
            data,
            sync_status: self.sync_status,
            updated_at,
        })
    }
}

/// Repository for cached domain entities.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    /// Creates a new EntityRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Inserts or overwrites an entity.
    pub async fn put(&self, entity: &CachedEntity) -> DbResult<()> {
        let data = serde_json::to_string(&entity.data)
            .map_err(|e| DbError::invalid_row(ENTITY, &entity.id, e))?;

        sqlx::query(
            r#"
            INSERT INTO cached_entities (user_id, kind, id, data, sync_status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id, kind, id) DO UPDATE SET
                data = excluded.data,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.user_id)
        .bind(entity.kind)
        .bind(&entity.id)
        .bind(data)
        .bind(entity.sync_status)
        .bind(to_millis(entity.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(kind = %entity.kind, id = %entity.id, "Cached entity");
        Ok(())
    }

    /// Gets one entity.
    pub async fn get(
        &self,
        user: &UserScope,
        kind: EntityKind,
        id: &str,
    ) -> DbResult<Option<CachedEntity>> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, kind, user_id, data, sync_status, updated_at
            FROM cached_entities
            WHERE user_id = ?1 AND kind = ?2 AND id = ?3
            "#,
        )
        .bind(user.as_str())
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    /// Lists a user's entities of one kind, oldest write first.
    pub async fn list(&self, user: &UserScope, kind: EntityKind) -> DbResult<Vec<CachedEntity>> {
        let rows: Vec<EntityRow> = sqlx::query_as(
            r#"
            SELECT id, kind, user_id, data, sync_status, updated_at
            FROM cached_entities
            WHERE user_id = ?1 AND kind = ?2
            ORDER BY updated_at ASC, rowid ASC
            "#,
        )
        .bind(user.as_str())
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntityRow::into_entity).collect()
    }

    /// Removes one entity. Returns `true` if it existed.
    pub async fn remove(&self, user: &UserScope, kind: EntityKind, id: &str) -> DbResult<bool> {
        let result =
            sqlx::query("DELETE FROM cached_entities WHERE user_id = ?1 AND kind = ?2 AND id = ?3")
                .bind(user.as_str())
                .bind(kind)
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Swaps a user's whole set of one kind for `entities`, atomically.
    pub async fn replace_all(
        &self,
        user: &UserScope,
        kind: EntityKind,
        entities: &[CachedEntity],
    ) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        sqlx::query("DELETE FROM cached_entities WHERE user_id = ?1 AND kind = ?2")
            .bind(user.as_str())
            .bind(kind)
            .execute(&mut *tx)
            .await?;

        for entity in entities {
            let data = serde_json::to_string(&entity.data)
                .map_err(|e| DbError::invalid_row(ENTITY, &entity.id, e))?;

            sqlx::query(
                r#"
                INSERT OR REPLACE INTO cached_entities
                    (user_id, kind, id, data, sync_status, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(user.as_str())
            .bind(kind)
            .bind(&entity.id)
            .bind(data)
            .bind(entity.sync_status)
            .bind(to_millis(entity.updated_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(user_id = %user, kind = %kind, count = entities.len(), "Replaced cached set");
        Ok(())
    }

    /// Deletes a user's synced entities last written before `cutoff`.
    ///
    /// Entities still pending or in error are kept; they describe writes the
    /// server has not seen.
    ///
    /// ## Returns
    /// Number of deleted rows.
    pub async fn cleanup_older_than(
        &self,
        user: &UserScope,
        cutoff: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM cached_entities
            WHERE user_id = ?1
            AND updated_at < ?2
            AND sync_status = 'synced'
            "#,
        )
        .bind(user.as_str())
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(user_id = %user, deleted, "Cleaned up stale cached entities");
        }
        Ok(deleted)
    }

    /// Serialized byte size and row count of a user's cache.
    pub async fn usage(&self, user: &UserScope) -> DbResult<(u64, u64)> {
        let (size, count): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(LENGTH(CAST(data AS BLOB))), 0), COUNT(*)
            FROM cached_entities
            WHERE user_id = ?1
            "#,
        )
        .bind(user.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok((size.max(0) as u64, count.max(0) as u64))
    }
}
