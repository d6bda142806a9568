//! Test helpers: throwaway stores backed by real SQLite files.

use sqlx::SqlitePool;
use std::time::Duration;
use tempfile::TempDir;

use crate::open_store;

pub(crate) struct TestStore {
    _dir: TempDir,
    pub url: String,
    pub pool: SqlitePool,
}

impl TestStore {
    pub(crate) async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let pool = open_store(&url, Duration::from_secs(10)).await.unwrap();
        Self {
            _dir: dir,
            url,
            pool,
        }
    }

    /// An independent pool on the same file, standing in for another process.
    pub(crate) async fn another_process(&self) -> SqlitePool {
        open_store(&self.url, Duration::from_secs(10)).await.unwrap()
    }
}
