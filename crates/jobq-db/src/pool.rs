//! Connection pool setup.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::{DbError, DbResult, ensure_schema};

/// Accept either a `sqlite:` URL or a bare filesystem path.
pub fn normalize_url(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{}", raw)
    }
}

/// Create a pool with WAL mode and a bounded wait for the write lock.
///
/// `busy_timeout` bounds how long a connection waits for another writer
/// before the operation fails as [`DbError::Unavailable`].
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, busy_timeout: Duration) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&normalize_url(database_url))
        .map_err(DbError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(busy_timeout)
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(busy_timeout)
        .connect_with(options)
        .await?;

    tracing::debug!("database pool created");
    Ok(pool)
}

/// Create a pool and make sure the schema exists.
pub async fn open_store(database_url: &str, busy_timeout: Duration) -> DbResult<SqlitePool> {
    let pool = create_pool(database_url, busy_timeout).await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("queue.db"), "sqlite://queue.db");
        assert_eq!(normalize_url("/tmp/q.db"), "sqlite:///tmp/q.db");
        assert_eq!(normalize_url("sqlite://queue.db"), "sqlite://queue.db");
        assert_eq!(normalize_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[tokio::test]
    async fn test_open_store_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let pool = open_store(path.to_str().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
