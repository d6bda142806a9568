//! Job queue facade over the store.
//!
//! Runtime tunables are re-read from the store at the start of each operation
//! that depends on them, so operator changes apply to the next job processed.

use chrono::Utc;
use jobq_config::RuntimeConfig;
use jobq_core::executor::ExecutionResult;
use jobq_core::lifecycle::Transition;
use jobq_core::{Job, JobCounts, JobId, JobState, NewJob, WorkerId};
use jobq_db::{DbError, Store};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::{QueueError, QueueResult};

/// Job queue backed by the shared store.
pub struct JobQueue {
    store: Store,
}

impl JobQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current tunables, with defaults for anything missing or malformed.
    pub async fn runtime_config(&self) -> QueueResult<RuntimeConfig> {
        let entries = self.store.settings.all().await?;
        Ok(RuntimeConfig::from_entries(&entries))
    }

    /// Submit a new job.
    #[tracing::instrument(skip(self, new_job))]
    pub async fn submit(&self, new_job: NewJob) -> QueueResult<Job> {
        new_job.validate()?;
        let id = new_job.resolve_id()?;
        let max_retries = match new_job.max_retries {
            Some(max_retries) => max_retries,
            None => self.runtime_config().await?.max_retries_default,
        };
        let priority = new_job.priority.unwrap_or(0);

        let job = self
            .store
            .jobs
            .insert(&id, &new_job.command, priority, max_retries, Utc::now())
            .await?;
        info!(job_id = %job.id, priority, max_retries, "Job enqueued");
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> QueueResult<Job> {
        Ok(self.store.jobs.get(id).await?)
    }

    pub async fn list(&self, state: Option<JobState>, limit: u32) -> QueueResult<Vec<Job>> {
        Ok(self.store.jobs.list(state, limit).await?)
    }

    /// Dead-lettered jobs, most recently failed first.
    pub async fn dlq_list(&self, limit: u32) -> QueueResult<Vec<Job>> {
        Ok(self.store.jobs.list_dead(limit).await?)
    }

    pub async fn counts(&self) -> QueueResult<JobCounts> {
        Ok(self.store.jobs.counts().await?)
    }

    /// Claim the next eligible job for `worker_id`, if any.
    pub async fn claim(&self, worker_id: &WorkerId) -> QueueResult<Option<Job>> {
        let job = self.store.jobs.claim(worker_id, Utc::now()).await?;
        match &job {
            Some(job) => info!(
                worker_id = %worker_id,
                job_id = %job.id,
                attempts = job.attempts,
                "Claimed job"
            ),
            None => debug!(worker_id = %worker_id, "No job available"),
        }
        Ok(job)
    }

    /// Record an attempt's result and move the job to its next state.
    #[tracing::instrument(skip(self, result), fields(job_id = %job_id, worker_id = %worker_id))]
    pub async fn complete(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        result: &ExecutionResult,
    ) -> QueueResult<Transition> {
        let config = self.runtime_config().await?;
        let transition = self
            .store
            .jobs
            .complete(job_id, worker_id, result, config.backoff_base, Utc::now())
            .await?;

        match &transition {
            Transition::Completed { .. } => {
                info!(duration_ms = result.duration_ms, "Job completed")
            }
            Transition::Retry {
                attempts,
                next_run_at,
                last_error,
            } => warn!(
                attempts,
                next_run_at = %next_run_at,
                error = %last_error,
                "Job failed, retry scheduled"
            ),
            Transition::Dead {
                attempts,
                last_error,
            } => warn!(attempts, error = %last_error, "Job moved to dead-letter queue"),
        }
        Ok(transition)
    }

    /// Move a dead-lettered job back to `pending` with a fresh retry budget.
    #[tracing::instrument(skip(self), fields(job_id = %id))]
    pub async fn requeue(&self, id: &JobId) -> QueueResult<Job> {
        let job = self.store.jobs.requeue_dead(id, Utc::now()).await?;
        info!("Job requeued from dead-letter queue");
        Ok(job)
    }

    /// Value of a single config key, `None` when unset.
    pub async fn config_get(&self, key: &str) -> QueueResult<Option<String>> {
        match self.store.settings.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every config key and value, sorted by key.
    pub async fn config_all(&self) -> QueueResult<BTreeMap<String, String>> {
        Ok(self.store.settings.all().await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn config_set(&self, key: &str, value: &str) -> QueueResult<()> {
        if key.trim().is_empty() {
            return Err(QueueError::InvalidInput(
                "config key must not be empty".to_string(),
            ));
        }
        if jobq_config::ConfigKey::from_name(key).is_none() {
            warn!(key, "Setting unknown config key");
        }
        self.store.settings.set(key, value).await?;
        Ok(())
    }
}
