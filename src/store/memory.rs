// src/store/memory.rs
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Article, IngestLogEntry, Source};
use crate::store::{ArticleStore, AuditRow, IngestLogStore, InsertOutcome, SourceRegistry};

/// In-memory backing store implementing all three store seams. The article
/// side enforces the fingerprint uniqueness constraint under one lock, which
/// is what makes concurrent duplicate persists resolve to exactly one row.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sources: Mutex<HashMap<Uuid, Source>>,
    articles: Mutex<ArticleTable>,
    log: Mutex<Vec<IngestLogEntry>>,
}

#[derive(Debug, Default)]
struct ArticleTable {
    rows: Vec<Article>,
    by_fingerprint: HashSet<String>,
    by_url: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<Source>) -> Self {
        let store = Self::default();
        {
            let mut map = store.sources.lock().expect("sources mutex poisoned");
            for s in sources {
                map.insert(s.id, s);
            }
        }
        store
    }

    pub fn add_source(&self, source: Source) {
        let mut map = self.sources.lock().expect("sources mutex poisoned");
        map.insert(source.id, source);
    }

    pub fn articles_snapshot(&self) -> Vec<Article> {
        self.articles
            .lock()
            .expect("articles mutex poisoned")
            .rows
            .clone()
    }
}

#[async_trait]
impl SourceRegistry for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Source>> {
        let map = self.sources.lock().expect("sources mutex poisoned");
        Ok(map.get(&id).cloned())
    }

    async fn all_active(&self) -> Result<Vec<Source>> {
        let map = self.sources.lock().expect("sources mutex poisoned");
        let mut out: Vec<Source> = map.values().filter(|s| s.active).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Source>> {
        let map = self.sources.lock().expect("sources mutex poisoned");
        let mut out: Vec<Source> = map.values().filter(|s| s.is_due(now)).cloned().collect();
        // Never-fetched sources first (None sorts before Some), then oldest.
        out.sort_by_key(|s| (s.last_fetched_at.is_some(), s.last_fetched_at));
        Ok(out)
    }

    async fn mark_fetched(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut map = self.sources.lock().expect("sources mutex poisoned");
        if let Some(s) = map.get_mut(&id) {
            s.last_fetched_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn insert(&self, article: Article) -> Result<InsertOutcome> {
        let mut table = self.articles.lock().expect("articles mutex poisoned");
        if table.by_fingerprint.contains(&article.fingerprint) {
            return Ok(InsertOutcome::DuplicateFingerprint);
        }
        if table.by_url.contains(&article.url) {
            return Ok(InsertOutcome::DuplicateUrl);
        }
        let id = article.id;
        table.by_fingerprint.insert(article.fingerprint.clone());
        table.by_url.insert(article.url.clone());
        table.rows.push(article);
        Ok(InsertOutcome::Inserted(id))
    }

    async fn exists_by_url(&self, url: &str) -> Result<bool> {
        let table = self.articles.lock().expect("articles mutex poisoned");
        Ok(table.by_url.contains(url))
    }

    async fn exists_by_fingerprint(&self, fingerprint: &str) -> Result<bool> {
        let table = self.articles.lock().expect("articles mutex poisoned");
        Ok(table.by_fingerprint.contains(fingerprint))
    }

    async fn count(&self) -> Result<usize> {
        let table = self.articles.lock().expect("articles mutex poisoned");
        Ok(table.rows.len())
    }
}

#[async_trait]
impl IngestLogStore for MemoryStore {
    async fn create(&self, entry: IngestLogEntry) -> Result<()> {
        let mut log = self.log.lock().expect("log mutex poisoned");
        log.push(entry);
        Ok(())
    }

    async fn update(&self, entry: IngestLogEntry) -> Result<()> {
        let mut log = self.log.lock().expect("log mutex poisoned");
        if let Some(existing) = log.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            log.push(entry);
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRow>> {
        let sources = self.sources.lock().expect("sources mutex poisoned");
        let log = self.log.lock().expect("log mutex poisoned");
        let mut rows: Vec<&IngestLogEntry> = log.iter().collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|entry| {
                let (name, url) = sources
                    .get(&entry.source_id)
                    .map(|s| (s.name.clone(), s.url.clone()))
                    .unwrap_or_default();
                AuditRow {
                    entry: entry.clone(),
                    source_name: name,
                    source_url: url,
                }
            })
            .collect())
    }
}
