//! Worker that processes jobs from the queue.
//!
//! A worker loops over: drain check, heartbeat, claim, execute, complete. The
//! drain check only happens between jobs, so a stop request never interrupts a
//! running command.

use chrono::Utc;
use jobq_config::SystemConfig;
use jobq_core::executor::{ExecutionResult, ExecutionSpec, Executor};
use jobq_core::lifecycle::Transition;
use jobq_core::{Job, WorkerId, WorkerStatus};
use jobq_db::{DbError, Store, WorkerRepo};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{debug, error, info, warn};

use crate::queue::JobQueue;
use crate::{QueueError, QueueResult};

/// Timing and fault tolerance of a worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Sleep between polls when nothing is claimable.
    pub poll_interval: Duration,
    /// How often `last_seen_at` is refreshed while a job runs.
    pub heartbeat_interval: Duration,
    /// Consecutive ticks with the store unavailable tolerated before the
    /// worker gives up.
    pub store_retry_budget: u32,
    /// How long a worker that gave up keeps trying to record `stopped`.
    pub stop_retry_window: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&SystemConfig::default())
    }
}

impl From<&SystemConfig> for WorkerSettings {
    fn from(config: &SystemConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            heartbeat_interval: config.heartbeat_interval,
            store_retry_budget: config.store_retry_budget,
            stop_retry_window: config
                .poll_interval
                .saturating_mul(config.store_retry_budget.max(1)),
        }
    }
}

enum Tick {
    /// Nothing was claimable.
    Idle,
    /// A job was claimed and processed.
    Worked,
    /// Drain requested; leave the loop.
    Stop,
    /// The worker record was removed; nothing left to mark stopped.
    Gone,
}

/// A worker that claims and executes jobs.
pub struct Worker {
    id: WorkerId,
    pid: Option<u32>,
    queue: Arc<JobQueue>,
    executor: Arc<dyn Executor>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(id: WorkerId, queue: Arc<JobQueue>, executor: Arc<dyn Executor>) -> Self {
        Self {
            id,
            pid: None,
            queue,
            executor,
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Record the OS process id so the control plane can signal this worker.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    fn store(&self) -> &Store {
        self.queue.store()
    }

    /// Register the worker and run its loop until a stop is requested.
    ///
    /// Returns an error only when the store stayed unavailable for longer
    /// than the retry budget; the worker marks itself `stopped` first.
    pub async fn run(&self) -> QueueResult<()> {
        self.register().await?;
        self.run_registered().await
    }

    /// Record this worker as `starting`, replacing any previous record with
    /// the same id.
    pub async fn register(&self) -> QueueResult<()> {
        self.store()
            .workers
            .register(&self.id, self.pid, Utc::now())
            .await?;
        Ok(())
    }

    /// Run the loop of a worker that [`register`](Self::register) already
    /// recorded. A stop requested in between is honoured at the first check.
    pub async fn run_registered(&self) -> QueueResult<()> {
        info!(
            worker_id = %self.id,
            executor = self.executor.name(),
            "Starting worker"
        );

        let mut failures = 0u32;
        loop {
            match self.tick().await {
                Ok(Tick::Stop) => break,
                Ok(Tick::Gone) => {
                    warn!(worker_id = %self.id, "Worker record removed, exiting");
                    return Ok(());
                }
                Ok(Tick::Worked) => failures = 0,
                Ok(Tick::Idle) => {
                    failures = 0;
                    sleep(self.settings.poll_interval).await;
                }
                Err(e) if e.is_unavailable() => {
                    failures += 1;
                    if failures > self.settings.store_retry_budget {
                        error!(
                            worker_id = %self.id,
                            failures,
                            error = %e,
                            "Store retry budget exhausted, stopping worker"
                        );
                        self.mark_stopped().await;
                        return Err(e);
                    }
                    warn!(worker_id = %self.id, failures, error = %e, "Store unavailable");
                    sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Worker tick failed");
                    sleep(self.settings.poll_interval).await;
                }
            }
        }

        self.mark_stopped().await;
        info!(worker_id = %self.id, "Worker stopped");
        Ok(())
    }

    async fn tick(&self) -> QueueResult<Tick> {
        let store = self.store();

        let shutdown = store.control.shutdown_requested().await?;
        let status = match store.workers.status(&self.id).await {
            Ok(status) => status,
            Err(DbError::NotFound(_)) => return Ok(Tick::Gone),
            Err(e) => return Err(e.into()),
        };
        if shutdown || status.is_winding_down() {
            info!(worker_id = %self.id, shutdown, status = %status, "Draining worker");
            return Ok(Tick::Stop);
        }

        store
            .workers
            .set_activity(&self.id, WorkerStatus::Idle, None, Utc::now())
            .await?;

        match self.queue.claim(&self.id).await? {
            Some(job) => {
                self.process(job).await?;
                Ok(Tick::Worked)
            }
            None => Ok(Tick::Idle),
        }
    }

    /// Execute a claimed job and record its outcome. Never returns before the
    /// outcome is stored or the retry budget is spent.
    #[tracing::instrument(skip(self, job), fields(worker_id = %self.id, job_id = %job.id))]
    async fn process(&self, job: Job) -> QueueResult<()> {
        let store = self.store();

        if let Err(e) = store
            .workers
            .set_activity(&self.id, WorkerStatus::Busy, Some(&job.id), Utc::now())
            .await
        {
            warn!(error = %e, "Failed to record busy status");
        }

        let timeout = match self.queue.runtime_config().await {
            Ok(config) => config.job_timeout,
            Err(e) => {
                warn!(error = %e, "Failed to read job timeout, running without one");
                None
            }
        };

        let spec = ExecutionSpec::for_job(&job, timeout);
        let result = self.execute_with_heartbeat(&spec).await;
        debug!(
            return_code = result.return_code,
            duration_ms = result.duration_ms,
            timed_out = result.timed_out,
            "Execution finished"
        );

        self.complete_with_retry(&job, &result).await?;

        if let Err(e) = store
            .workers
            .set_activity(&self.id, WorkerStatus::Idle, None, Utc::now())
            .await
        {
            warn!(error = %e, "Failed to record idle status");
        }
        Ok(())
    }

    /// Run the executor, refreshing `last_seen_at` every heartbeat interval.
    async fn execute_with_heartbeat(&self, spec: &ExecutionSpec) -> ExecutionResult {
        let execution = self.executor.execute(spec);
        tokio::pin!(execution);

        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut execution => return result,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.store().workers.touch(&self.id, Utc::now()).await {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }

    async fn complete_with_retry(
        &self,
        job: &Job,
        result: &ExecutionResult,
    ) -> QueueResult<Option<Transition>> {
        let mut failures = 0u32;
        loop {
            match self.queue.complete(&job.id, &self.id, result).await {
                Ok(transition) => return Ok(Some(transition)),
                Err(QueueError::Conflict(msg)) => {
                    warn!(reason = %msg, "Completion rejected, job no longer held by this worker");
                    return Ok(None);
                }
                Err(e) if e.is_unavailable() && failures < self.settings.store_retry_budget => {
                    failures += 1;
                    warn!(failures, error = %e, "Store unavailable, retrying completion");
                    sleep(self.settings.poll_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record `stopped`, retrying while the store is unavailable for up to
    /// the stop retry window.
    async fn mark_stopped(&self) {
        let deadline = tokio::time::Instant::now() + self.settings.stop_retry_window;
        loop {
            match self.store().workers.mark_stopped(&self.id, Utc::now()).await {
                Ok(()) => return,
                Err(e) if e.is_unavailable() && tokio::time::Instant::now() < deadline => {
                    debug!(worker_id = %self.id, error = %e, "Store unavailable, retrying stop");
                    sleep(self.settings.poll_interval).await;
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to mark worker stopped");
                    return;
                }
            }
        }
    }
}

/// Wait for SIGTERM or Ctrl-C, then mark `worker_id` as `stopping` so its loop
/// drains at the next check.
pub async fn watch_stop_signals(workers: Arc<dyn WorkerRepo>, worker_id: WorkerId) {
    wait_for_stop_signal().await;
    info!(worker_id = %worker_id, "Stop signal received, draining");
    if let Err(e) = workers.request_stop(&worker_id, Utc::now()).await {
        warn!(worker_id = %worker_id, error = %e, "Failed to record stop request");
    }
}

async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestQueue;
    use async_trait::async_trait;
    use jobq_core::{JobId, JobState, NewJob};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, mpsc};

    /// Executor returning scripted exit codes, optionally blocking until released.
    struct MockExecutor {
        codes: Mutex<VecDeque<i32>>,
        calls: AtomicUsize,
        started: Option<mpsc::UnboundedSender<JobId>>,
        release: Option<Arc<Notify>>,
    }

    impl MockExecutor {
        fn with_codes(codes: &[i32]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().copied().collect()),
                calls: AtomicUsize::new(0),
                started: None,
                release: None,
            }
        }

        fn gated(started: mpsc::UnboundedSender<JobId>, release: Arc<Notify>) -> Self {
            Self {
                started: Some(started),
                release: Some(release),
                ..Self::with_codes(&[])
            }
        }
    }

    #[async_trait]
    impl Executor for MockExecutor {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn execute(&self, spec: &ExecutionSpec) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(started) = &self.started {
                started.send(spec.job_id.clone()).unwrap();
            }
            if let Some(release) = &self.release {
                release.notified().await;
            }
            let return_code = self.codes.lock().unwrap().pop_front().unwrap_or(0);
            ExecutionResult {
                return_code,
                stdout: format!("ran {}", spec.command),
                stderr: String::new(),
                duration_ms: 1,
                timed_out: false,
            }
        }
    }

    fn fast_settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(10),
            store_retry_budget: 2,
            stop_retry_window: Duration::from_millis(200),
        }
    }

    fn spawn_worker(
        store: Store,
        name: &str,
        executor: Arc<dyn Executor>,
    ) -> tokio::task::JoinHandle<QueueResult<()>> {
        let worker = Worker::new(name.parse().unwrap(), Arc::new(JobQueue::new(store)), executor)
            .with_settings(fast_settings());
        tokio::spawn(async move { worker.run().await })
    }

    async fn wait_for_job_state(queue: &JobQueue, id: &JobId, state: JobState) -> Job {
        for _ in 0..500 {
            let job = queue.get(id).await.unwrap();
            if job.state == state {
                return job;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {state}");
    }

    async fn wait_for_worker_status(store: &Store, id: &WorkerId, status: WorkerStatus) {
        for _ in 0..500 {
            if let Ok(current) = store.workers.status(id).await {
                if current == status {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("worker {id} never reached {status}");
    }

    async fn join(handle: tokio::task::JoinHandle<QueueResult<()>>) -> QueueResult<()> {
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("worker did not exit")
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let tq = TestQueue::new().await;
        let queue = JobQueue::new(tq.store.clone());
        let job = queue.submit(NewJob::new("exit 0")).await.unwrap();

        let executor = Arc::new(MockExecutor::with_codes(&[0]));
        let handle = spawn_worker(tq.store.clone(), "w1", executor.clone());

        let job = wait_for_job_state(&queue, &job.id, JobState::Completed).await;
        assert_eq!(job.return_code, Some(0));
        assert_eq!(job.stdout.as_deref(), Some("ran exit 0"));
        assert_eq!(job.attempts, 0);
        assert!(job.locked_by.is_none());

        tq.store.control.set_shutdown(true).await.unwrap();
        join(handle).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_job_retries_then_dies() {
        let tq = TestQueue::new().await;
        let queue = JobQueue::new(tq.store.clone());
        // Zero base makes every retry immediately eligible.
        queue.config_set("backoff_base", "0").await.unwrap();
        let job = queue
            .submit(NewJob::new("exit 1").with_max_retries(1))
            .await
            .unwrap();

        let executor = Arc::new(MockExecutor::with_codes(&[1, 1, 1]));
        let handle = spawn_worker(tq.store.clone(), "w1", executor.clone());

        let job = wait_for_job_state(&queue, &job.id, JobState::Dead).await;
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("exit code 1"));

        tq.store.control.set_shutdown(true).await.unwrap();
        join(handle).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_worker_stops_on_shutdown() {
        let tq = TestQueue::new().await;
        let executor = Arc::new(MockExecutor::with_codes(&[]));
        let id: WorkerId = "idle".parse().unwrap();
        let handle = spawn_worker(tq.store.clone(), "idle", executor.clone());

        wait_for_worker_status(&tq.store, &id, WorkerStatus::Idle).await;
        tq.store.control.set_shutdown(true).await.unwrap();

        join(handle).await.unwrap();
        let record = tq.store.workers.get(&id).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Stopped);
        assert!(record.current_job_id.is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_busy_worker_finishes_job_before_draining() {
        let tq = TestQueue::new().await;
        let queue = JobQueue::new(tq.store.clone());
        let first = queue.submit(NewJob::new("first")).await.unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let executor = Arc::new(MockExecutor::gated(started_tx, release.clone()));
        let id: WorkerId = "busy".parse().unwrap();
        let handle = spawn_worker(tq.store.clone(), "busy", executor.clone());

        assert_eq!(started_rx.recv().await.unwrap(), first.id);
        let record = tq.store.workers.get(&id).await.unwrap();
        assert_eq!(record.status, WorkerStatus::Busy);
        assert_eq!(record.current_job_id.as_ref(), Some(&first.id));

        // Stop arrives mid-job, along with more work that must not be taken.
        tq.store.workers.request_stop(&id, Utc::now()).await.unwrap();
        let second = queue.submit(NewJob::new("second")).await.unwrap();
        release.notify_one();

        join(handle).await.unwrap();
        assert_eq!(
            queue.get(&first.id).await.unwrap().state,
            JobState::Completed
        );
        assert_eq!(queue.get(&second.id).await.unwrap().state, JobState::Pending);
        assert_eq!(
            tq.store.workers.status(&id).await.unwrap(),
            WorkerStatus::Stopped
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_while_busy() {
        let tq = TestQueue::new().await;
        let queue = JobQueue::new(tq.store.clone());
        queue.submit(NewJob::new("slow")).await.unwrap();

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Notify::new());
        let executor = Arc::new(MockExecutor::gated(started_tx, release.clone()));
        let id: WorkerId = "beating".parse().unwrap();
        let handle = spawn_worker(tq.store.clone(), "beating", executor);

        started_rx.recv().await.unwrap();
        let before = tq.store.workers.get(&id).await.unwrap().last_seen_at;
        sleep(Duration::from_millis(100)).await;
        let after = tq.store.workers.get(&id).await.unwrap();
        assert!(after.last_seen_at > before);
        assert_eq!(after.status, WorkerStatus::Busy);

        tq.store.control.set_shutdown(true).await.unwrap();
        release.notify_one();
        join(handle).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_shell_commands() {
        let tq = TestQueue::new().await;
        let queue = JobQueue::new(tq.store.clone());
        queue.config_set("backoff_base", "0").await.unwrap();
        let ok = queue.submit(NewJob::new("echo done")).await.unwrap();
        let bad = queue
            .submit(NewJob::new("echo broken >&2; exit 1").with_max_retries(1))
            .await
            .unwrap();

        let executor = Arc::new(jobq_executor::ShellExecutor::new());
        let handle = spawn_worker(tq.store.clone(), "shell", executor);

        let ok = wait_for_job_state(&queue, &ok.id, JobState::Completed).await;
        assert_eq!(ok.return_code, Some(0));
        assert_eq!(ok.stdout.as_deref(), Some("done\n"));

        let bad = wait_for_job_state(&queue, &bad.id, JobState::Dead).await;
        assert_eq!(bad.attempts, 2);
        assert_eq!(bad.return_code, Some(1));
        assert_eq!(bad.stderr.as_deref(), Some("broken\n"));

        tq.store.control.set_shutdown(true).await.unwrap();
        join(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_exits_after_store_retry_budget() {
        let tq = TestQueue::new().await;
        let impatient = tq.connect(Duration::from_millis(50)).await;
        let id: WorkerId = "locked-out".parse().unwrap();
        let worker = Worker::new(
            id.clone(),
            Arc::new(JobQueue::new(impatient)),
            Arc::new(MockExecutor::with_codes(&[])),
        )
        .with_settings(WorkerSettings {
            stop_retry_window: Duration::from_secs(5),
            ..fast_settings()
        });
        let handle = tokio::spawn(async move { worker.run().await });
        wait_for_worker_status(&tq.store, &id, WorkerStatus::Idle).await;

        // Hold the write lock from another connection.
        let locker = jobq_db::open_store(&tq.url, Duration::from_secs(10)).await.unwrap();
        let mut conn = locker.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .unwrap();

        // The tick budget runs out well within a second; the stop is still
        // being retried when the lock goes away.
        sleep(Duration::from_secs(1)).await;
        assert!(!handle.is_finished());
        sqlx::query("ROLLBACK").execute(&mut *conn).await.unwrap();

        let err = join(handle).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(
            tq.store.workers.status(&id).await.unwrap(),
            WorkerStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_stop_before_loop_is_honoured() {
        let tq = TestQueue::new().await;
        let queue = JobQueue::new(tq.store.clone());
        let job = queue.submit(NewJob::new("never")).await.unwrap();
        let executor = Arc::new(MockExecutor::with_codes(&[]));
        let id: WorkerId = "early".parse().unwrap();
        let worker = Worker::new(
            id.clone(),
            Arc::new(JobQueue::new(tq.store.clone())),
            executor.clone(),
        )
        .with_settings(fast_settings());

        worker.register().await.unwrap();
        tq.store.workers.request_stop(&id, Utc::now()).await.unwrap();
        worker.run_registered().await.unwrap();

        assert_eq!(
            tq.store.workers.status(&id).await.unwrap(),
            WorkerStatus::Stopped
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.get(&job.id).await.unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn test_removed_worker_record_exits_cleanly() {
        let tq = TestQueue::new().await;
        let id: WorkerId = "removed".parse().unwrap();
        let executor = Arc::new(MockExecutor::with_codes(&[]));
        let handle = spawn_worker(tq.store.clone(), "removed", executor);
        wait_for_worker_status(&tq.store, &id, WorkerStatus::Idle).await;

        let pool = jobq_db::open_store(&tq.url, Duration::from_secs(10)).await.unwrap();
        sqlx::query("DELETE FROM workers WHERE worker_id = ?")
            .bind(id.as_str())
            .execute(&pool)
            .await
            .unwrap();

        join(handle).await.unwrap();
        assert!(tq.store.workers.list().await.unwrap().is_empty());
    }
}
