// src/store/mod.rs
// Seams to the external stores. The pipeline only ever talks to these
// traits; the binary and the tests plug in the in-memory implementation.
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::{Article, IngestLogEntry, Source};

pub use memory::MemoryStore;

/// Outcome of an article insert. The store enforces uniqueness on the
/// fingerprint and reports URL collisions as a cheaper first-pass signal;
/// a collision is a benign skip for the caller, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    DuplicateFingerprint,
    DuplicateUrl,
}

/// Read-only catalog of sources, plus the single field the pipeline is
/// allowed to write back: `last_fetched_at`.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Source>>;
    async fn all_active(&self) -> Result<Vec<Source>>;
    /// Sources eligible for scheduling at `now`, never-fetched first, then
    /// oldest-fetched first.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Source>>;
    async fn mark_fetched(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn insert(&self, article: Article) -> Result<InsertOutcome>;
    async fn exists_by_url(&self, url: &str) -> Result<bool>;
    async fn exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool>;
    async fn count(&self) -> Result<usize>;
}

/// One audit row joined with source identity for operator display.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRow {
    #[serde(flatten)]
    pub entry: IngestLogEntry,
    pub source_name: String,
    pub source_url: String,
}

#[async_trait]
pub trait IngestLogStore: Send + Sync {
    async fn create(&self, entry: IngestLogEntry) -> Result<()>;
    /// Replaces the stored entry with the same id.
    async fn update(&self, entry: IngestLogEntry) -> Result<()>;
    /// Most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<AuditRow>>;
}
