//! Job repository.
//!
//! Besides plain submission and queries this holds the two writes that move a
//! job through its lifecycle: the atomic claim and the atomic completion. Both
//! run in an exclusive-write transaction and re-check the state they depend on
//! in the `WHERE` clause of their update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobq_core::executor::ExecutionResult;
use jobq_core::lifecycle::{self, Transition};
use jobq_core::{Job, JobCounts, JobId, JobState, WorkerId};
use sqlx::SqlitePool;

use crate::tx::ImmediateTx;
use crate::{DbError, DbResult, time};

/// A job row as stored.
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    priority: i64,
    next_run_at: Option<String>,
    locked_by: Option<String>,
    locked_at: Option<String>,
    last_error: Option<String>,
    return_code: Option<i64>,
    stdout: Option<String>,
    stderr: Option<String>,
    duration_ms: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        Ok(Job {
            id: JobId::parse(row.id).map_err(corrupt)?,
            command: row.command,
            state: row.state.parse().map_err(corrupt)?,
            attempts: to_u32("attempts", row.attempts)?,
            max_retries: to_u32("max_retries", row.max_retries)?,
            priority: row.priority,
            next_run_at: time::decode_opt(row.next_run_at.as_deref())?,
            locked_by: row
                .locked_by
                .map(|w| w.parse::<WorkerId>())
                .transpose()
                .map_err(corrupt)?,
            locked_at: time::decode_opt(row.locked_at.as_deref())?,
            last_error: row.last_error,
            return_code: row
                .return_code
                .map(|code| {
                    i32::try_from(code)
                        .map_err(|_| DbError::Corrupt(format!("return_code {code} out of range")))
                })
                .transpose()?,
            stdout: row.stdout,
            stderr: row.stderr,
            duration_ms: row.duration_ms,
            created_at: time::decode(&row.created_at)?,
            updated_at: time::decode(&row.updated_at)?,
        })
    }
}

fn corrupt(err: jobq_core::Error) -> DbError {
    DbError::Corrupt(err.to_string())
}

fn to_u32(field: &str, value: i64) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::Corrupt(format!("{field} {value} out of range")))
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a new `pending` job.
    async fn insert(
        &self,
        id: &JobId,
        command: &str,
        priority: i64,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> DbResult<Job>;

    async fn get(&self, id: &JobId) -> DbResult<Job>;

    /// Jobs in creation order, optionally filtered by state.
    async fn list(&self, state: Option<JobState>, limit: u32) -> DbResult<Vec<Job>>;

    /// Dead-lettered jobs, most recently updated first.
    async fn list_dead(&self, limit: u32) -> DbResult<Vec<Job>>;

    async fn counts(&self) -> DbResult<JobCounts>;

    /// Atomically claim the next eligible job for `worker_id`.
    ///
    /// Eligible means `pending` or `failed` with `next_run_at` unset or not
    /// after `now`. Highest priority wins, then oldest. Returns `None` when
    /// nothing is eligible or another worker won the race.
    async fn claim(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<Option<Job>>;

    /// Record the result of an attempt on a job held by `worker_id` and apply
    /// the resulting transition. Fails with [`DbError::Conflict`] if the job is
    /// no longer `processing` under that worker.
    async fn complete(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        result: &ExecutionResult,
        backoff_base: u64,
        now: DateTime<Utc>,
    ) -> DbResult<Transition>;

    /// Move a `dead` job back to `pending` with a fresh retry budget.
    async fn requeue_dead(&self, id: &JobId, now: DateTime<Utc>) -> DbResult<Job>;
}

/// SQLite implementation of JobRepo.
pub struct SqliteJobRepo {
    pool: SqlitePool,
}

impl SqliteJobRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepo for SqliteJobRepo {
    #[tracing::instrument(skip(self, command), fields(job_id = %id))]
    async fn insert(
        &self,
        id: &JobId,
        command: &str,
        priority: i64,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> DbResult<Job> {
        let now = time::encode(&now);
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, priority, created_at, updated_at)
            VALUES (?, ?, 'pending', 0, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(command)
        .bind(i64::from(max_retries))
        .bind(priority)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::Duplicate(_) => DbError::Duplicate(format!("job {}", id)),
            other => other,
        })?;
        row.try_into()
    }

    #[tracing::instrument(skip(self), fields(job_id = %id))]
    async fn get(&self, id: &JobId) -> DbResult<Job> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?
            .try_into()
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self, state: Option<JobState>, limit: u32) -> DbResult<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state = ? ORDER BY created_at, rowid LIMIT ?",
                )
                .bind(state.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY created_at, rowid LIMIT ?")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Job::try_from).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn list_dead(&self, limit: u32) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE state = 'dead' ORDER BY updated_at DESC, rowid DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn counts(&self) -> DbResult<JobCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (state, count) in rows {
            let state: JobState = state.parse().map_err(corrupt)?;
            counts.set(state, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    #[tracing::instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> DbResult<Option<Job>> {
        let now = time::encode(&now);
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let candidate: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE state IN ('pending', 'failed')
              AND (next_run_at IS NULL OR next_run_at <= ?)
            ORDER BY priority DESC, created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(&now)
        .fetch_optional(tx.conn())
        .await?;

        let Some(job_id) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        // The state check repeats the SELECT's filter so the update can never
        // take a job that is already held.
        let claimed = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'processing', locked_by = ?, locked_at = ?, updated_at = ?
            WHERE id = ? AND state IN ('pending', 'failed')
            "#,
        )
        .bind(worker_id.as_str())
        .bind(&now)
        .bind(&now)
        .bind(&job_id)
        .execute(tx.conn())
        .await?;

        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            tracing::debug!(job_id = %job_id, "claim lost, job no longer claimable");
            return Ok(None);
        }

        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(&job_id)
            .fetch_one(tx.conn())
            .await?;
        tx.commit().await?;

        Ok(Some(row.try_into()?))
    }

    #[tracing::instrument(skip(self, result), fields(job_id = %job_id, worker_id = %worker_id, return_code = result.return_code))]
    async fn complete(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        result: &ExecutionResult,
        backoff_base: u64,
        now: DateTime<Utc>,
    ) -> DbResult<Transition> {
        let mut tx = ImmediateTx::begin(&self.pool).await?;

        let held: Option<(i64, i64)> = sqlx::query_as(
            "SELECT attempts, max_retries FROM jobs WHERE id = ? AND state = 'processing' AND locked_by = ?",
        )
        .bind(job_id.as_str())
        .bind(worker_id.as_str())
        .fetch_optional(tx.conn())
        .await?;

        let Some((attempts, max_retries)) = held else {
            tx.rollback().await?;
            return Err(DbError::Conflict(format!(
                "job {} is not held by worker {}",
                job_id, worker_id
            )));
        };

        let transition = lifecycle::resolve(
            to_u32("attempts", attempts)?,
            to_u32("max_retries", max_retries)?,
            result.return_code,
            backoff_base,
            now,
        );
        let next_run_at = transition.next_run_at().map(|at| time::encode(&at));

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempts = ?, next_run_at = ?, last_error = ?,
                return_code = ?, stdout = ?, stderr = ?, duration_ms = ?,
                locked_by = NULL, locked_at = NULL, updated_at = ?
            WHERE id = ? AND state = 'processing' AND locked_by = ?
            "#,
        )
        .bind(transition.state().as_str())
        .bind(i64::from(transition.attempts()))
        .bind(next_run_at)
        .bind(transition.last_error())
        .bind(result.return_code)
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(result.duration_ms)
        .bind(time::encode(&now))
        .bind(job_id.as_str())
        .bind(worker_id.as_str())
        .execute(tx.conn())
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(DbError::Conflict(format!("job {} changed during completion", job_id)));
        }

        tx.commit().await?;
        Ok(transition)
    }

    #[tracing::instrument(skip(self), fields(job_id = %id))]
    async fn requeue_dead(&self, id: &JobId, now: DateTime<Utc>) -> DbResult<Job> {
        sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'pending', attempts = 0, next_run_at = NULL, last_error = NULL, updated_at = ?
            WHERE id = ? AND state = 'dead'
            RETURNING *
            "#,
        )
        .bind(time::encode(&now))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {} in dead-letter queue", id)))?
        .try_into()
    }
}
