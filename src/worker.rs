// src/worker.rs
//! Executes one job end to end: extract, fingerprint, dedup, persist,
//! audit. The worker never retries on its own; a retryable error goes back
//! to the queue so its backoff policy applies.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;

use crate::dedup::{compute_fingerprint, DedupService};
use crate::extract::Extractor;
use crate::model::{Article, IngestJob, IngestLogEntry, JobKind, LogStatus};
use crate::store::{ArticleStore, IngestLogStore, InsertOutcome, SourceRegistry};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_articles_found_total", "Drafts produced by extractors.");
        describe_counter!("ingest_articles_added_total", "Articles persisted as new.");
        describe_counter!(
            "ingest_articles_skipped_total",
            "Drafts skipped as duplicates."
        );
        describe_counter!("ingest_job_errors_total", "Jobs that raised during processing.");
    });
}

/// Counts reported by one job execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub found: u32,
    pub added: u32,
    pub skipped: u32,
}

/// Split that drives the queue's retry decision: only `Retryable` goes back
/// through the backoff schedule.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("retryable: {0}")]
    Retryable(anyhow::Error),
    #[error("fatal: {0}")]
    Fatal(anyhow::Error),
}

pub struct IngestWorker {
    registry: Arc<dyn SourceRegistry>,
    articles: Arc<dyn ArticleStore>,
    log: Arc<dyn IngestLogStore>,
    dedup: DedupService,
    feed: Arc<dyn Extractor>,
    scrape: Arc<dyn Extractor>,
}

impl IngestWorker {
    pub fn new(
        registry: Arc<dyn SourceRegistry>,
        articles: Arc<dyn ArticleStore>,
        log: Arc<dyn IngestLogStore>,
        feed: Arc<dyn Extractor>,
        scrape: Arc<dyn Extractor>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            registry,
            articles: Arc::clone(&articles),
            log,
            dedup: DedupService::new(articles),
            feed,
            scrape,
        }
    }

    async fn run_job(&self, job: &IngestJob) -> Result<JobOutcome, WorkerError> {
        let mut entry = IngestLogEntry::start(job.source_id, job.kind);
        self.log
            .create(entry.clone())
            .await
            .map_err(WorkerError::Fatal)?;
        entry.status = LogStatus::Processing;
        self.log
            .update(entry.clone())
            .await
            .map_err(WorkerError::Fatal)?;

        let result = self.extract_and_persist(job, &mut entry).await;

        // Advance last_fetched_at no matter how the job went, so a broken
        // source does not get retry-stormed by the scheduler.
        self.registry
            .mark_fetched(job.source_id, Utc::now())
            .await
            .map_err(WorkerError::Fatal)?;

        entry.completed_at = Some(Utc::now());
        match result {
            Ok(outcome) => {
                entry.status = LogStatus::Completed;
                self.log
                    .update(entry)
                    .await
                    .map_err(WorkerError::Fatal)?;
                Ok(outcome)
            }
            Err(err) => {
                counter!("ingest_job_errors_total").increment(1);
                entry.status = LogStatus::Failed;
                entry.error = Some(err.to_string());
                self.log
                    .update(entry)
                    .await
                    .map_err(WorkerError::Fatal)?;
                tracing::warn!(
                    target: "worker",
                    job_id = %job.id,
                    source_id = %job.source_id,
                    kind = %job.kind,
                    error = %err,
                    "job processing failed"
                );
                Err(err)
            }
        }
    }

    async fn extract_and_persist(
        &self,
        job: &IngestJob,
        entry: &mut IngestLogEntry,
    ) -> Result<JobOutcome, WorkerError> {
        let extractor = match job.kind {
            JobKind::Feed => &self.feed,
            JobKind::Scrape => &self.scrape,
        };
        let drafts = extractor
            .extract(&job.url)
            .await
            .map_err(WorkerError::Retryable)?;
        if job.kind == JobKind::Scrape && drafts.len() != 1 {
            return Err(WorkerError::Retryable(anyhow!(
                "scrape extractor returned {} drafts, expected exactly one",
                drafts.len()
            )));
        }

        // Counts accumulate on the log entry directly, so a store error
        // partway through still leaves the progress so far auditable.
        entry.found = drafts.len() as u32;
        counter!("ingest_articles_found_total").increment(entry.found as u64);

        for draft in drafts {
            let fingerprint = compute_fingerprint(&draft.title, &draft.body);
            let duplicate = self
                .dedup
                .is_duplicate(&draft.url, &fingerprint)
                .await
                .map_err(WorkerError::Fatal)?;
            if duplicate {
                entry.skipped += 1;
                continue;
            }
            let article = Article::from_draft(draft, job.source_id, fingerprint);
            match self
                .articles
                .insert(article)
                .await
                .map_err(WorkerError::Fatal)?
            {
                InsertOutcome::Inserted(_) => entry.added += 1,
                // Lost a race with a concurrent worker; the store's
                // constraint is the authority and this is a benign skip.
                InsertOutcome::DuplicateFingerprint | InsertOutcome::DuplicateUrl => {
                    entry.skipped += 1
                }
            }
        }
        let outcome = JobOutcome {
            found: entry.found,
            added: entry.added,
            skipped: entry.skipped,
        };

        counter!("ingest_articles_added_total").increment(outcome.added as u64);
        counter!("ingest_articles_skipped_total").increment(outcome.skipped as u64);
        Ok(outcome)
    }
}

#[async_trait]
impl crate::queue::JobHandler for IngestWorker {
    async fn handle(&self, job: &IngestJob) -> Result<JobOutcome, WorkerError> {
        self.run_job(job).await
    }
}
