// src/model.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured origin of news content. Owned by the source registry; the
/// pipeline only reads it and advances `last_fetched_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub feed_url: Option<String>,
    pub scrape_enabled: bool,
    pub active: bool,
    pub fetch_frequency_minutes: i64,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl Source {
    /// A source with no feed URL and scraping disabled can never produce a job.
    pub fn has_ingestion_method(&self) -> bool {
        self.feed_url.is_some() || self.scrape_enabled
    }

    /// Due = active AND (never fetched OR interval elapsed).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.last_fetched_at {
            None => true,
            Some(last) => now - last >= Duration::minutes(self.fetch_frequency_minutes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Feed,
    Scrape,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Feed => write!(f, "feed"),
            JobKind::Scrape => write!(f, "scrape"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One unit of ingestion work for one source and one method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: Uuid,
    pub source_id: Uuid,
    pub kind: JobKind,
    pub url: String,
    pub idempotency_key: String,
    pub attempts: u32,
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Stable key for one source+kind within one time bucket. Two enqueues in the
/// same bucket collapse to a single pending job.
pub fn idempotency_key(
    source_id: Uuid,
    kind: JobKind,
    now: DateTime<Utc>,
    bucket_secs: i64,
) -> String {
    let bucket = now.timestamp() / bucket_secs.max(1);
    format!("{source_id}:{kind}:{bucket}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Politics,
    Business,
    Technology,
    Science,
    Health,
    Sports,
    Entertainment,
    World,
    Other,
}

impl Default for Category {
    fn default() -> Self {
        Category::Other
    }
}

/// Extractor output before dedup/persistence decisions are applied.
/// Lives only in worker memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDraft {
    pub title: String,
    pub body: String,
    pub url: String,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub category: Category,
}

/// Persisted article. Never updated by the pipeline once created; rewriting
/// and enrichment happen downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub source_id: Uuid,
    pub title: String,
    pub url: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub category: Category,
    pub image_url: Option<String>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl Article {
    pub fn from_draft(draft: ArticleDraft, source_id: Uuid, fingerprint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            title: draft.title,
            url: draft.url,
            body: draft.body,
            author: draft.author,
            published_at: draft.published_at,
            category: draft.category,
            image_url: draft.image_url,
            fingerprint,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Audit record for one job execution. Created at job start, finalized once
/// at completion, append-only otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestLogEntry {
    pub id: Uuid,
    pub source_id: Uuid,
    pub kind: JobKind,
    pub status: LogStatus,
    pub found: u32,
    pub added: u32,
    pub skipped: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestLogEntry {
    pub fn start(source_id: Uuid, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            kind,
            status: LogStatus::Pending,
            found: 0,
            added: 0,
            skipped: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}
