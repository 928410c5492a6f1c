// src/extract/mod.rs
pub mod feed;
pub mod scrape;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::ArticleDraft;

pub use feed::FeedExtractor;
pub use scrape::ScrapeExtractor;

/// Turns one target URL into zero or more article drafts. One implementation
/// per job kind; the worker only dispatches, it never looks inside.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<Vec<ArticleDraft>>;
}
