//! Test helpers.

use jobq_db::Store;
use std::time::Duration;
use tempfile::TempDir;

pub(crate) struct TestQueue {
    _dir: TempDir,
    pub url: String,
    pub store: Store,
}

impl TestQueue {
    pub(crate) async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let pool = jobq_db::open_store(&url, Duration::from_secs(10)).await.unwrap();
        Self {
            _dir: dir,
            url,
            store: Store::sqlite(pool),
        }
    }

    /// A store on the same file with its own pool and write-lock wait.
    pub(crate) async fn connect(&self, busy_timeout: Duration) -> Store {
        let pool = jobq_db::open_store(&self.url, busy_timeout).await.unwrap();
        Store::sqlite(pool)
    }
}
