// src/scheduler.rs
//! Decides which sources are due and turns them into queue jobs. Scheduling
//! never touches source or article state directly; its only side effect is
//! job creation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::{idempotency_key, JobKind, Source};
use crate::queue::JobQueue;
use crate::store::SourceRegistry;

/// Configuration errors surfaced to the caller of a manual trigger. These
/// are never retried.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("source {0} not found")]
    NotFound(Uuid),
    #[error("source {0} is inactive")]
    Inactive(Uuid),
    #[error("source {0} has neither a feed URL nor scraping enabled")]
    NoIngestionMethod(Uuid),
    #[error(transparent)]
    Registry(#[from] anyhow::Error),
}

/// Result of a `trigger_all` pass. Per-source failures are collected, not
/// fatal to the batch.
#[derive(Debug, Default)]
pub struct TriggerAllReport {
    pub job_ids: Vec<Uuid>,
    pub failures: Vec<(Uuid, String)>,
}

pub struct Scheduler {
    registry: Arc<dyn SourceRegistry>,
    queue: Arc<JobQueue>,
    /// Delay added per emitted job within one pass, spreading load.
    stagger: Duration,
    /// Width of the idempotency time bucket.
    bucket_secs: i64,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn SourceRegistry>,
        queue: Arc<JobQueue>,
        stagger: Duration,
        bucket_secs: i64,
    ) -> Self {
        Self {
            registry,
            queue,
            stagger,
            bucket_secs,
        }
    }

    /// One scheduling pass: enqueue jobs for every due source, never-fetched
    /// sources first, each successive job staggered further out. Returns the
    /// ids of newly created jobs (idempotency no-ops are not repeated here).
    pub async fn schedule_due(&self) -> Result<Vec<Uuid>> {
        let now = Utc::now();
        let due = self.registry.due(now).await?;
        let mut job_ids = Vec::new();
        let mut emitted = 0u32;
        for source in &due {
            for outcome in self.enqueue_jobs_for(source, emitted) {
                emitted += 1;
                if outcome.is_new() {
                    job_ids.push(outcome.job_id());
                }
            }
        }
        tracing::info!(
            target: "scheduler",
            due = due.len(),
            enqueued = job_ids.len(),
            "scheduling pass"
        );
        Ok(job_ids)
    }

    /// Immediate enqueue for one source, bypassing the due-check but still
    /// honoring the active flag and capability checks.
    pub async fn trigger_source(&self, source_id: Uuid) -> Result<Vec<Uuid>, TriggerError> {
        let source = self
            .registry
            .get(source_id)
            .await?
            .ok_or(TriggerError::NotFound(source_id))?;
        if !source.active {
            return Err(TriggerError::Inactive(source_id));
        }
        if !source.has_ingestion_method() {
            return Err(TriggerError::NoIngestionMethod(source_id));
        }
        let ids = self
            .enqueue_jobs_for(&source, 0)
            .into_iter()
            .map(|o| o.job_id())
            .collect();
        Ok(ids)
    }

    /// Trigger every active source; a failure for one source is recorded and
    /// does not abort the rest.
    pub async fn trigger_all(&self) -> Result<TriggerAllReport> {
        let sources = self.registry.all_active().await?;
        let mut report = TriggerAllReport::default();
        for source in sources {
            match self.trigger_source(source.id).await {
                Ok(mut ids) => report.job_ids.append(&mut ids),
                Err(e) => {
                    tracing::warn!(
                        target: "scheduler",
                        source_id = %source.id,
                        error = %e,
                        "trigger failed for source"
                    );
                    report.failures.push((source.id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Emit a feed job and/or a scrape job for one source. `offset` is the
    /// number of jobs already emitted in this pass; the stagger delay is
    /// non-decreasing in it.
    fn enqueue_jobs_for(&self, source: &Source, offset: u32) -> Vec<crate::queue::EnqueueOutcome> {
        let now = Utc::now();
        let mut outcomes = Vec::new();
        let mut emitted = offset;
        if let Some(feed_url) = &source.feed_url {
            let key = idempotency_key(source.id, JobKind::Feed, now, self.bucket_secs);
            let delay = self.stagger * emitted;
            outcomes.push(
                self.queue
                    .enqueue(source.id, JobKind::Feed, feed_url.clone(), key, delay),
            );
            emitted += 1;
        }
        if source.scrape_enabled {
            let key = idempotency_key(source.id, JobKind::Scrape, now, self.bucket_secs);
            let delay = self.stagger * emitted;
            outcomes.push(
                self.queue
                    .enqueue(source.id, JobKind::Scrape, source.url.clone(), key, delay),
            );
        }
        outcomes
    }

    /// Recurring scheduling loop.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = self.schedule_due().await {
                    tracing::error!(target: "scheduler", error = %e, "scheduling pass failed");
                }
            }
        })
    }
}
