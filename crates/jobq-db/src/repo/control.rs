//! Global control flags.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::DbResult;

const SHUTDOWN_KEY: &str = "shutdown";

#[async_trait]
pub trait ControlRepo: Send + Sync {
    /// Whether a queue-wide shutdown has been requested.
    async fn shutdown_requested(&self) -> DbResult<bool>;

    async fn set_shutdown(&self, requested: bool) -> DbResult<()>;
}

pub struct SqliteControlRepo {
    pool: SqlitePool,
}

impl SqliteControlRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ControlRepo for SqliteControlRepo {
    async fn shutdown_requested(&self) -> DbResult<bool> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM control WHERE key = ?")
            .bind(SHUTDOWN_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.as_deref() == Some("1"))
    }

    #[tracing::instrument(skip(self))]
    async fn set_shutdown(&self, requested: bool) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO control (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(SHUTDOWN_KEY)
        .bind(if requested { "1" } else { "0" })
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
