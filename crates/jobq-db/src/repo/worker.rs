//! Worker repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobq_core::{JobId, WorkerId, WorkerRecord, WorkerStatus};
use sqlx::SqlitePool;

use crate::{DbError, DbResult, time};

#[derive(Debug, sqlx::FromRow)]
struct WorkerRow {
    worker_id: String,
    status: String,
    current_job_id: Option<String>,
    pid: Option<i64>,
    started_at: String,
    last_seen_at: String,
}

impl TryFrom<WorkerRow> for WorkerRecord {
    type Error = DbError;

    fn try_from(row: WorkerRow) -> DbResult<Self> {
        let corrupt = |e: jobq_core::Error| DbError::Corrupt(e.to_string());
        Ok(WorkerRecord {
            worker_id: row.worker_id.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            current_job_id: row.current_job_id.map(JobId::parse).transpose().map_err(corrupt)?,
            pid: row.pid.and_then(|pid| u32::try_from(pid).ok()),
            started_at: time::decode(&row.started_at)?,
            last_seen_at: time::decode(&row.last_seen_at)?,
        })
    }
}

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    /// Create (or reset) the record for a worker that is starting up.
    async fn register(
        &self,
        worker_id: &WorkerId,
        pid: Option<u32>,
        now: DateTime<Utc>,
    ) -> DbResult<WorkerRecord>;

    async fn get(&self, worker_id: &WorkerId) -> DbResult<WorkerRecord>;

    /// Current status of a worker.
    async fn status(&self, worker_id: &WorkerId) -> DbResult<WorkerStatus>;

    /// Record that the worker is `idle` or `busy` with `current_job`.
    ///
    /// A pending stop request is never overwritten: if the worker is already
    /// `stopping` only the job and liveness columns change. Returns the status
    /// the record holds afterwards.
    async fn set_activity(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        current_job: Option<&JobId>,
        now: DateTime<Utc>,
    ) -> DbResult<WorkerStatus>;

    /// Refresh `last_seen_at` only.
    async fn touch(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<()>;

    /// Ask a worker to exit once its current job is finished.
    async fn request_stop(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<()>;

    /// Record that the worker has exited.
    async fn mark_stopped(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<()>;

    async fn list(&self) -> DbResult<Vec<WorkerRecord>>;
}

pub struct SqliteWorkerRepo {
    pool: SqlitePool,
}

impl SqliteWorkerRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn not_found(worker_id: &WorkerId) -> DbError {
    DbError::NotFound(format!("worker {}", worker_id))
}

#[async_trait]
impl WorkerRepo for SqliteWorkerRepo {
    #[tracing::instrument(skip(self), fields(worker_id = %worker_id))]
    async fn register(
        &self,
        worker_id: &WorkerId,
        pid: Option<u32>,
        now: DateTime<Utc>,
    ) -> DbResult<WorkerRecord> {
        let now = time::encode(&now);
        sqlx::query_as::<_, WorkerRow>(
            r#"
            INSERT OR REPLACE INTO workers (worker_id, status, current_job_id, pid, started_at, last_seen_at)
            VALUES (?, 'starting', NULL, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(worker_id.as_str())
        .bind(pid.map(i64::from))
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    async fn get(&self, worker_id: &WorkerId) -> DbResult<WorkerRecord> {
        sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE worker_id = ?")
            .bind(worker_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(worker_id))?
            .try_into()
    }

    async fn status(&self, worker_id: &WorkerId) -> DbResult<WorkerStatus> {
        let status: String = sqlx::query_scalar("SELECT status FROM workers WHERE worker_id = ?")
            .bind(worker_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| not_found(worker_id))?;
        status
            .parse()
            .map_err(|e: jobq_core::Error| DbError::Corrupt(e.to_string()))
    }

    #[tracing::instrument(skip(self, current_job), fields(worker_id = %worker_id, status = %status))]
    async fn set_activity(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        current_job: Option<&JobId>,
        now: DateTime<Utc>,
    ) -> DbResult<WorkerStatus> {
        let recorded: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE workers
            SET status = CASE WHEN status = 'stopping' THEN status ELSE ? END,
                current_job_id = ?,
                last_seen_at = ?
            WHERE worker_id = ?
            RETURNING status
            "#,
        )
        .bind(status.as_str())
        .bind(current_job.map(JobId::as_str))
        .bind(time::encode(&now))
        .bind(worker_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        recorded
            .ok_or_else(|| not_found(worker_id))?
            .parse()
            .map_err(|e: jobq_core::Error| DbError::Corrupt(e.to_string()))
    }

    async fn touch(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE workers SET last_seen_at = ? WHERE worker_id = ?")
            .bind(time::encode(&now))
            .bind(worker_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(worker_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(worker_id = %worker_id))]
    async fn request_stop(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            "UPDATE workers SET status = 'stopping', last_seen_at = ? WHERE worker_id = ? AND status != 'stopped'",
        )
        .bind(time::encode(&now))
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(worker_id = %worker_id))]
    async fn mark_stopped(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE workers SET status = 'stopped', current_job_id = NULL, last_seen_at = ? WHERE worker_id = ?",
        )
        .bind(time::encode(&now))
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(worker_id));
        }
        Ok(())
    }

    async fn list(&self) -> DbResult<Vec<WorkerRecord>> {
        let rows = sqlx::query_as::<_, WorkerRow>(
            "SELECT * FROM workers ORDER BY started_at, worker_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(WorkerRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestStore;

    fn worker(name: &str) -> WorkerId {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_starts_in_starting() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());

        let record = repo.register(&worker("w1"), Some(4242), Utc::now()).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Starting);
        assert_eq!(record.pid, Some(4242));
        assert!(record.current_job_id.is_none());

        assert_eq!(repo.get(&worker("w1")).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_activity_updates_status_and_job() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());
        let w = worker("w1");
        repo.register(&w, None, Utc::now()).await.unwrap();

        let job = JobId::parse("job-7").unwrap();
        let status = repo
            .set_activity(&w, WorkerStatus::Busy, Some(&job), Utc::now())
            .await
            .unwrap();
        assert_eq!(status, WorkerStatus::Busy);
        assert_eq!(repo.get(&w).await.unwrap().current_job_id, Some(job));

        let status = repo
            .set_activity(&w, WorkerStatus::Idle, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(status, WorkerStatus::Idle);
        assert!(repo.get(&w).await.unwrap().current_job_id.is_none());
    }

    #[tokio::test]
    async fn test_stop_request_survives_activity_updates() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());
        let w = worker("w1");
        repo.register(&w, None, Utc::now()).await.unwrap();
        let job = JobId::parse("job-1").unwrap();
        repo.set_activity(&w, WorkerStatus::Busy, Some(&job), Utc::now())
            .await
            .unwrap();

        repo.request_stop(&w, Utc::now()).await.unwrap();

        let status = repo
            .set_activity(&w, WorkerStatus::Idle, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(status, WorkerStatus::Stopping);
        let record = repo.get(&w).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Stopping);
        assert!(record.current_job_id.is_none());
    }

    #[tokio::test]
    async fn test_stopped_worker_ignores_stop_request() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());
        let w = worker("w1");
        repo.register(&w, None, Utc::now()).await.unwrap();
        repo.mark_stopped(&w, Utc::now()).await.unwrap();

        repo.request_stop(&w, Utc::now()).await.unwrap();
        assert_eq!(repo.status(&w).await.unwrap(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_touch_moves_last_seen_only() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());
        let w = worker("w1");
        let started = Utc::now();
        repo.register(&w, None, started).await.unwrap();

        let later = started + chrono::TimeDelta::seconds(30);
        repo.touch(&w, later).await.unwrap();

        let record = repo.get(&w).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Starting);
        assert!(record.last_seen_at > record.started_at);
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());
        let ghost = worker("ghost");

        assert!(matches!(repo.status(&ghost).await, Err(DbError::NotFound(_))));
        assert!(matches!(repo.touch(&ghost, Utc::now()).await, Err(DbError::NotFound(_))));
        assert!(matches!(
            repo.set_activity(&ghost, WorkerStatus::Idle, None, Utc::now()).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_keeps_stopped_workers() {
        let store = TestStore::new().await;
        let repo = SqliteWorkerRepo::new(store.pool.clone());
        let t0 = Utc::now();
        repo.register(&worker("a"), None, t0).await.unwrap();
        repo.register(&worker("b"), None, t0 + chrono::TimeDelta::seconds(1))
            .await
            .unwrap();
        repo.mark_stopped(&worker("a"), Utc::now()).await.unwrap();

        let workers = repo.list().await.unwrap();
        let ids: Vec<_> = workers.iter().map(|w| w.worker_id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(workers[0].status, WorkerStatus::Stopped);
    }
}
