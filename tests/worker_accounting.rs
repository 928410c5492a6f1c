// tests/worker_accounting.rs
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use newswire_ingest::dedup::compute_fingerprint;
use newswire_ingest::extract::{Extractor, FeedExtractor};
use newswire_ingest::model::{
    Article, ArticleDraft, Category, IngestJob, JobKind, JobStatus, LogStatus, Source,
};
use newswire_ingest::queue::JobHandler;
use newswire_ingest::store::{
    ArticleStore, IngestLogStore, InsertOutcome, MemoryStore, SourceRegistry,
};
use newswire_ingest::worker::{IngestWorker, WorkerError};

const FEED_XML: &str = include_str!("fixtures/sample_feed.xml");

struct FixtureFeed(&'static str);

#[async_trait]
impl Extractor for FixtureFeed {
    async fn extract(&self, _url: &str) -> anyhow::Result<Vec<ArticleDraft>> {
        FeedExtractor::parse_feed(self.0)
    }
}

struct OneDraft;

#[async_trait]
impl Extractor for OneDraft {
    async fn extract(&self, url: &str) -> anyhow::Result<Vec<ArticleDraft>> {
        Ok(vec![ArticleDraft {
            title: "Scraped page".into(),
            body: "Scraped body text.".into(),
            url: url.to_string(),
            author: None,
            image_url: None,
            published_at: Utc::now(),
            category: Category::Other,
        }])
    }
}

struct Unreachable;

#[async_trait]
impl Extractor for Unreachable {
    async fn extract(&self, url: &str) -> anyhow::Result<Vec<ArticleDraft>> {
        Err(anyhow!("connection refused fetching {url}"))
    }
}

/// Article store whose first insert succeeds and every later one errors,
/// standing in for a connection dropped mid-batch.
struct InsertsThenFails {
    inner: Arc<MemoryStore>,
    calls: AtomicU32,
}

#[async_trait]
impl ArticleStore for InsertsThenFails {
    async fn insert(&self, article: Article) -> anyhow::Result<InsertOutcome> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
            return Err(anyhow!("article store connection lost"));
        }
        self.inner.insert(article).await
    }

    async fn exists_by_url(&self, url: &str) -> anyhow::Result<bool> {
        self.inner.exists_by_url(url).await
    }

    async fn exists_by_fingerprint(&self, fingerprint: &str) -> anyhow::Result<bool> {
        self.inner.exists_by_fingerprint(fingerprint).await
    }

    async fn count(&self) -> anyhow::Result<usize> {
        self.inner.count().await
    }
}

fn test_source() -> Source {
    Source {
        id: Uuid::new_v4(),
        name: "Sample Wire".into(),
        url: "https://wire.example".into(),
        feed_url: Some("https://wire.example/rss".into()),
        scrape_enabled: true,
        active: true,
        fetch_frequency_minutes: 60,
        last_fetched_at: None,
    }
}

fn job_for(source: &Source, kind: JobKind) -> IngestJob {
    IngestJob {
        id: Uuid::new_v4(),
        source_id: source.id,
        kind,
        url: source.url.clone(),
        idempotency_key: "test".into(),
        attempts: 1,
        status: JobStatus::Active,
        run_at: Utc::now(),
        created_at: Utc::now(),
        finished_at: None,
        last_error: None,
    }
}

fn worker_with(
    store: &Arc<MemoryStore>,
    feed: Arc<dyn Extractor>,
    scrape: Arc<dyn Extractor>,
) -> IngestWorker {
    IngestWorker::new(
        store.clone(),
        store.clone(),
        store.clone(),
        feed,
        scrape,
    )
}

/// Pre-seed an article whose fingerprint matches the feed entry with the
/// given title/description, under an unrelated URL so only the fingerprint
/// check can catch it.
async fn seed_duplicate(store: &Arc<MemoryStore>, source_id: Uuid, title: &str, body: &str) {
    let draft = ArticleDraft {
        title: title.into(),
        body: body.into(),
        url: format!("https://mirror.example/{}", Uuid::new_v4()),
        author: None,
        image_url: None,
        published_at: Utc::now(),
        category: Category::Other,
    };
    let fp = compute_fingerprint(&draft.title, &draft.body);
    let article = Article::from_draft(draft, source_id, fp);
    store.insert(article).await.unwrap();
}

#[tokio::test]
async fn partial_success_accounting_matches_counts() {
    // Feed has 10 entries, one missing a link (excluded at parse time) and
    // three whose fingerprints already exist -> found=9, added=6, skipped=3.
    let source = test_source();
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));

    seed_duplicate(
        &store,
        source.id,
        "Central bank holds rates steady",
        "The committee voted to keep rates unchanged this quarter.",
    )
    .await;
    seed_duplicate(
        &store,
        source.id,
        "Regional elections set for spring",
        "Officials confirmed the election calendar on Monday.",
    )
    .await;
    seed_duplicate(
        &store,
        source.id,
        "New hospital wing opens downtown",
        "The expanded wing doubles patient capacity.",
    )
    .await;
    let seeded = store.count().await.unwrap();
    assert_eq!(seeded, 3);

    let worker = worker_with(&store, Arc::new(FixtureFeed(FEED_XML)), Arc::new(OneDraft));
    let outcome = worker
        .handle(&job_for(&source, JobKind::Feed))
        .await
        .unwrap();

    assert_eq!(outcome.found, 9);
    assert_eq!(outcome.added, 6);
    assert_eq!(outcome.skipped, 3);
    assert_eq!(store.count().await.unwrap(), 9);

    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].entry.status, LogStatus::Completed);
    assert_eq!(rows[0].entry.found, 9);
    assert_eq!(rows[0].entry.added, 6);
    assert_eq!(rows[0].entry.skipped, 3);
    assert_eq!(rows[0].source_name, "Sample Wire");
}

#[tokio::test]
async fn running_the_same_feed_twice_adds_nothing_new() {
    let source = test_source();
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let worker = worker_with(&store, Arc::new(FixtureFeed(FEED_XML)), Arc::new(OneDraft));

    let first = worker
        .handle(&job_for(&source, JobKind::Feed))
        .await
        .unwrap();
    assert_eq!(first.added, 9);

    let second = worker
        .handle(&job_for(&source, JobKind::Feed))
        .await
        .unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.skipped, 9);
    assert_eq!(store.count().await.unwrap(), 9);
}

#[tokio::test]
async fn scrape_job_persists_exactly_one_article() {
    let source = test_source();
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let worker = worker_with(&store, Arc::new(FixtureFeed(FEED_XML)), Arc::new(OneDraft));

    let outcome = worker
        .handle(&job_for(&source, JobKind::Scrape))
        .await
        .unwrap();
    assert_eq!(outcome.found, 1);
    assert_eq!(outcome.added, 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn extraction_failure_is_retryable_and_still_advances_last_fetched() {
    let source = test_source();
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let worker = worker_with(&store, Arc::new(Unreachable), Arc::new(Unreachable));

    let before = Utc::now();
    let err = worker
        .handle(&job_for(&source, JobKind::Feed))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Retryable(_)));

    // The source must still be advanced so the scheduler does not storm it.
    let refreshed = store.get(source.id).await.unwrap().unwrap();
    let last = refreshed.last_fetched_at.expect("last_fetched_at set");
    assert!(last >= before);

    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows[0].entry.status, LogStatus::Failed);
    assert!(rows[0]
        .entry
        .error
        .as_deref()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn store_failure_mid_batch_keeps_partial_counts_in_log() {
    let source = test_source();
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let articles = Arc::new(InsertsThenFails {
        inner: store.clone(),
        calls: AtomicU32::new(0),
    });
    let worker = IngestWorker::new(
        store.clone(),
        articles,
        store.clone(),
        Arc::new(FixtureFeed(FEED_XML)),
        Arc::new(OneDraft),
    );

    let err = worker
        .handle(&job_for(&source, JobKind::Feed))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Fatal(_)));

    // The failed entry still reports the progress made before the error.
    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows[0].entry.status, LogStatus::Failed);
    assert_eq!(rows[0].entry.found, 9);
    assert_eq!(rows[0].entry.added, 1);
    assert_eq!(rows[0].entry.skipped, 0);
    assert!(rows[0]
        .entry
        .error
        .as_deref()
        .unwrap()
        .contains("connection lost"));
}

#[tokio::test]
async fn log_entry_is_written_for_every_job() {
    let source = test_source();
    let store = Arc::new(MemoryStore::with_sources(vec![source.clone()]));
    let worker = worker_with(&store, Arc::new(FixtureFeed(FEED_XML)), Arc::new(OneDraft));

    worker
        .handle(&job_for(&source, JobKind::Feed))
        .await
        .unwrap();
    worker
        .handle(&job_for(&source, JobKind::Scrape))
        .await
        .unwrap();

    let rows = store.recent(10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.entry.completed_at.is_some()));
}
