//! # Settings Repository
//!
//! Per-user key/value pairs with JSON values. The engine keeps
//! `lastSyncTime` here.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use harbor_core::UserScope;

use super::to_millis;
use crate::error::{DbError, DbResult};

/// Repository for per-user settings.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Creates a new SettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Stores a value, replacing any previous one.
    pub async fn put(&self, user: &UserScope, key: &str, value: &Value) -> DbResult<()> {
        let text =
            serde_json::to_string(value).map_err(|e| DbError::invalid_row("setting", key, e))?;

        sqlx::query(
            r#"
            INSERT INTO settings (user_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user.as_str())
        .bind(key)
        .bind(text)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reads a value.
    pub async fn get(&self, user: &UserScope, key: &str) -> DbResult<Option<Value>> {
        let text: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE user_id = ?1 AND key = ?2")
                .bind(user.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        text.map(|text| {
            serde_json::from_str(&text).map_err(|e| DbError::invalid_row("setting", key, e))
        })
        .transpose()
    }

    /// Deletes a value. Returns `true` if it existed.
    pub async fn remove(&self, user: &UserScope, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE user_id = ?1 AND key = ?2")
            .bind(user.as_str())
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_remove() {
        let settings = Database::new(DbConfig::in_memory()).await.unwrap().settings();
        let alice = UserScope::new("alice").unwrap();
        let bob = UserScope::new("bob").unwrap();

        assert!(settings.get(&alice, "lastSyncTime").await.unwrap().is_none());

        settings
            .put(&alice, "lastSyncTime", &json!("2024-05-01T10:00:00Z"))
            .await
            .unwrap();
        settings
            .put(&alice, "lastSyncTime", &json!("2024-05-02T10:00:00Z"))
            .await
            .unwrap();

        assert_eq!(
            settings.get(&alice, "lastSyncTime").await.unwrap(),
            Some(json!("2024-05-02T10:00:00Z"))
        );
        assert!(settings.get(&bob, "lastSyncTime").await.unwrap().is_none());

        assert!(settings.remove(&alice, "lastSyncTime").await.unwrap());
        assert!(settings.get(&alice, "lastSyncTime").await.unwrap().is_none());
    }
}
