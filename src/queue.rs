// src/queue.rs
//! Durable job queue with at-least-once delivery, retry/backoff, idempotent
//! enqueue, and independent concurrency and rate caps. Workers coordinate
//! only through this queue and the article store's uniqueness constraint;
//! there is no other shared state between them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::{IngestJob, JobKind, JobStatus, QueueStats};
use crate::worker::{JobOutcome, WorkerError};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("queue_jobs_enqueued_total", "Jobs accepted by the queue.");
        describe_counter!(
            "queue_jobs_deduped_total",
            "Enqueue attempts collapsed onto a pending job by idempotency key."
        );
        describe_counter!("queue_jobs_completed_total", "Jobs finished successfully.");
        describe_counter!("queue_jobs_retried_total", "Job attempts rescheduled for retry.");
        describe_counter!("queue_jobs_failed_total", "Jobs that reached terminal failure.");
        describe_gauge!("queue_depth", "Jobs currently waiting or active.");
    });
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Total attempts per job, first delivery included.
    pub max_attempts: u32,
    /// Backoff before attempt n+1 is `backoff_base * 2^(n-1)`.
    pub backoff_base: Duration,
    /// Jobs in flight at once.
    pub concurrency: usize,
    /// Delivery rate cap, independent of concurrency.
    pub jobs_per_second: f64,
    /// Hard wall-clock bound on one job execution.
    pub job_timeout: Duration,
    /// How long terminal jobs are kept before `cleanup` prunes them.
    pub completed_retention: chrono::Duration,
    pub failed_retention: chrono::Duration,
    /// Count bounds applied on top of the age windows.
    pub max_completed: usize,
    pub max_failed: usize,
    /// Idle poll interval when no job is due.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(30),
            concurrency: 4,
            jobs_per_second: 2.0,
            job_timeout: Duration::from_secs(120),
            completed_retention: chrono::Duration::hours(24),
            failed_retention: chrono::Duration::days(7),
            max_completed: 1_000,
            max_failed: 5_000,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// What `enqueue` did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(Uuid),
    /// A job with the same idempotency key is already pending or running.
    AlreadyPending(Uuid),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::AlreadyPending(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EnqueueOutcome::Enqueued(_))
    }
}

/// Executes one job. Retryable errors go back through the queue's backoff
/// schedule; fatal errors fail the job immediately. The handler must not
/// run its own retry loop.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &IngestJob) -> Result<JobOutcome, WorkerError>;
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, IngestJob>,
    paused: bool,
}

pub struct JobQueue {
    cfg: QueueConfig,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(cfg: QueueConfig) -> Arc<Self> {
        ensure_metrics_described();
        Arc::new(Self {
            cfg,
            state: Mutex::new(QueueState::default()),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// Accept a job, unless a job with the same idempotency key is already in
    /// a non-terminal state; that case is a no-op returning the existing id,
    /// which is what prevents duplicate concurrent work for one
    /// source+kind+time-bucket.
    pub fn enqueue(
        &self,
        source_id: Uuid,
        kind: JobKind,
        url: String,
        idempotency_key: String,
        delay: Duration,
    ) -> EnqueueOutcome {
        let now = Utc::now();
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if let Some(existing) = state
            .jobs
            .values()
            .find(|j| j.idempotency_key == idempotency_key && !j.status.is_terminal())
        {
            counter!("queue_jobs_deduped_total").increment(1);
            return EnqueueOutcome::AlreadyPending(existing.id);
        }
        let job = IngestJob {
            id: Uuid::new_v4(),
            source_id,
            kind,
            url,
            idempotency_key,
            attempts: 0,
            status: JobStatus::Waiting,
            run_at: now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            created_at: now,
            finished_at: None,
            last_error: None,
        };
        let id = job.id;
        state.jobs.insert(id, job);
        counter!("queue_jobs_enqueued_total").increment(1);
        EnqueueOutcome::Enqueued(id)
    }

    pub fn pause(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.paused = true;
        tracing::info!(target: "queue", "delivery paused");
    }

    pub fn resume(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.paused = false;
        tracing::info!(target: "queue", "delivery resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").paused
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().expect("queue mutex poisoned");
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn get(&self, id: Uuid) -> Option<IngestJob> {
        let state = self.state.lock().expect("queue mutex poisoned");
        state.jobs.get(&id).cloned()
    }

    /// Prune terminal jobs past their retention window, then enforce the
    /// count bounds (oldest first). Returns the number of jobs removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        let before = state.jobs.len();

        let completed_cutoff = now - self.cfg.completed_retention;
        let failed_cutoff = now - self.cfg.failed_retention;
        state.jobs.retain(|_, j| match j.status {
            JobStatus::Completed => j.finished_at.map_or(true, |t| t > completed_cutoff),
            JobStatus::Failed => j.finished_at.map_or(true, |t| t > failed_cutoff),
            _ => true,
        });

        for (status, cap) in [
            (JobStatus::Completed, self.cfg.max_completed),
            (JobStatus::Failed, self.cfg.max_failed),
        ] {
            let mut terminal: Vec<(Uuid, DateTime<Utc>)> = state
                .jobs
                .values()
                .filter(|j| j.status == status)
                .map(|j| (j.id, j.finished_at.unwrap_or(j.created_at)))
                .collect();
            if terminal.len() > cap {
                terminal.sort_by_key(|(_, t)| *t);
                let excess = terminal.len() - cap;
                for (id, _) in terminal.into_iter().take(excess) {
                    state.jobs.remove(&id);
                }
            }
        }

        let removed = before - state.jobs.len();
        if removed > 0 {
            tracing::debug!(target: "queue", removed, "pruned terminal jobs");
        }
        removed
    }

    /// Pull the next due waiting job and mark it active, counting the
    /// delivery as an attempt.
    fn take_next_due(&self, now: DateTime<Utc>) -> Option<IngestJob> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.paused {
            return None;
        }
        let next = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Waiting && j.run_at <= now)
            .min_by_key(|j| j.run_at)
            .map(|j| j.id)?;
        let job = state.jobs.get_mut(&next)?;
        job.status = JobStatus::Active;
        job.attempts += 1;
        Some(job.clone())
    }

    fn mark_completed(&self, id: Uuid) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Completed;
            job.finished_at = Some(Utc::now());
            counter!("queue_jobs_completed_total").increment(1);
        }
    }

    fn mark_failed(&self, id: Uuid, error: String) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
            job.finished_at = Some(Utc::now());
            job.last_error = Some(error);
            counter!("queue_jobs_failed_total").increment(1);
        }
    }

    /// Reschedule after a retryable failure, or fail terminally once the
    /// attempt ceiling is reached. Backoff doubles per attempt.
    fn retry_or_fail(&self, id: Uuid, error: String) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        let Some(job) = state.jobs.get_mut(&id) else {
            return;
        };
        if job.attempts >= self.cfg.max_attempts {
            job.status = JobStatus::Failed;
            job.finished_at = Some(Utc::now());
            job.last_error = Some(error);
            counter!("queue_jobs_failed_total").increment(1);
            tracing::warn!(
                target: "queue",
                job_id = %job.id,
                attempts = job.attempts,
                "job failed terminally"
            );
            return;
        }
        let backoff = self.cfg.backoff_base * 2u32.saturating_pow(job.attempts - 1);
        job.status = JobStatus::Waiting;
        job.run_at =
            Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
        job.last_error = Some(error);
        counter!("queue_jobs_retried_total").increment(1);
        tracing::info!(
            target: "queue",
            job_id = %job.id,
            attempt = job.attempts,
            backoff_ms = backoff.as_millis() as u64,
            "job rescheduled"
        );
    }

    /// Delivery loop. Runs until the task is aborted; each delivered job is
    /// executed on its own task, bounded by the concurrency semaphore, while
    /// the rate interval spaces deliveries out independently.
    pub fn spawn_delivery(self: Arc<Self>, handler: Arc<dyn JobHandler>) -> JoinHandle<()> {
        let semaphore = Arc::new(Semaphore::new(self.cfg.concurrency));
        let tick = Duration::from_secs_f64(1.0 / self.cfg.jobs_per_second.max(0.01));
        tokio::spawn(async move {
            let mut rate = tokio::time::interval(tick);
            rate.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                rate.tick().await;
                let Some(job) = self.take_next_due(Utc::now()) else {
                    tokio::time::sleep(self.cfg.poll_interval).await;
                    continue;
                };
                let stats = self.stats();
                gauge!("queue_depth").set((stats.waiting + stats.active) as f64);

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("delivery semaphore closed");
                let queue = Arc::clone(&self);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let _permit = permit;
                    tracing::debug!(
                        target: "queue",
                        job_id = %job.id,
                        kind = %job.kind,
                        attempt = job.attempts,
                        "delivering job"
                    );
                    match tokio::time::timeout(queue.cfg.job_timeout, handler.handle(&job)).await {
                        Ok(Ok(outcome)) => {
                            tracing::info!(
                                target: "queue",
                                job_id = %job.id,
                                found = outcome.found,
                                added = outcome.added,
                                skipped = outcome.skipped,
                                "job completed"
                            );
                            queue.mark_completed(job.id);
                        }
                        Ok(Err(WorkerError::Retryable(e))) => {
                            queue.retry_or_fail(job.id, e.to_string());
                        }
                        Ok(Err(WorkerError::Fatal(e))) => {
                            tracing::error!(target: "queue", job_id = %job.id, error = %e, "fatal job error");
                            queue.mark_failed(job.id, e.to_string());
                        }
                        Err(_) => {
                            queue.retry_or_fail(job.id, "job execution timed out".to_string());
                        }
                    }
                });
            }
        })
    }

    /// Periodic retention sweep.
    pub fn spawn_cleanup(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                self.cleanup(Utc::now());
            }
        })
    }
}
