// tests/dedup_concurrent.rs
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use newswire_ingest::dedup::compute_fingerprint;
use newswire_ingest::model::{Article, ArticleDraft, Category};
use newswire_ingest::store::{ArticleStore, InsertOutcome, MemoryStore};

fn draft(n: usize) -> ArticleDraft {
    // Same text everywhere, different URL per mirror.
    ArticleDraft {
        title: "Syndicated headline".into(),
        body: "Identical body republished by several mirrors.".into(),
        url: format!("https://mirror-{n}.example/story"),
        author: None,
        image_url: None,
        published_at: Utc::now(),
        category: Category::Other,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_persists_of_one_fingerprint_store_exactly_one() {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let source_id = Uuid::new_v4();

    let mut handles = Vec::new();
    for n in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let d = draft(n);
            let fp = compute_fingerprint(&d.title, &d.body);
            let article = Article::from_draft(d, source_id, fp);
            store.insert(article).await.unwrap()
        }));
    }

    let mut inserted = 0;
    let mut skipped = 0;
    for h in handles {
        match h.await.unwrap() {
            InsertOutcome::Inserted(_) => inserted += 1,
            InsertOutcome::DuplicateFingerprint | InsertOutcome::DuplicateUrl => skipped += 1,
        }
    }

    assert_eq!(inserted, 1, "exactly one attempt wins the race");
    assert_eq!(skipped, 15, "the rest are reported as skips, not errors");
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn same_text_under_different_urls_shares_a_fingerprint() {
    let a = draft(1);
    let b = draft(2);
    assert_ne!(a.url, b.url);
    assert_eq!(
        compute_fingerprint(&a.title, &a.body),
        compute_fingerprint(&b.title, &b.body)
    );
}
