//! Runtime tunables stored in the queue.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::{DbError, DbResult};

#[async_trait]
pub trait SettingsRepo: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<String>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: &str) -> DbResult<()>;

    /// Every stored key/value pair.
    async fn all(&self) -> DbResult<BTreeMap<String, String>>;
}

pub struct SqliteSettingsRepo {
    pool: SqlitePool,
}

impl SqliteSettingsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepo for SqliteSettingsRepo {
    async fn get(&self, key: &str) -> DbResult<String> {
        sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("config key {}", key)))
    }

    #[tracing::instrument(skip(self))]
    async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all(&self) -> DbResult<BTreeMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }
}
