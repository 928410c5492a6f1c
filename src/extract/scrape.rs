// src/extract/scrape.rs
//! Single-page scrape extractor. Produces exactly one draft per URL or an
//! extraction error. Selector choices are deliberately generic; anything
//! smarter belongs in a dedicated per-site extractor behind the same trait.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};

use crate::extract::feed::guess_category;
use crate::extract::Extractor;
use crate::model::ArticleDraft;

pub struct ScrapeExtractor {
    client: reqwest::Client,
}

impl ScrapeExtractor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building scrape http client")?;
        Ok(Self { client })
    }

    /// Parse an HTML document into a single draft. Title comes from og:title
    /// falling back to <title> then <h1>; body from <article> paragraphs
    /// falling back to all <p> tags; image from og:image.
    pub fn parse_page(html: &str, url: &str) -> Result<ArticleDraft> {
        let doc = Html::parse_document(html);

        let sel_og_title = Selector::parse(r#"meta[property="og:title"]"#).unwrap();
        let sel_title = Selector::parse("title").unwrap();
        let sel_h1 = Selector::parse("h1").unwrap();
        let sel_article_p = Selector::parse("article p").unwrap();
        let sel_p = Selector::parse("p").unwrap();
        let sel_og_image = Selector::parse(r#"meta[property="og:image"]"#).unwrap();

        let title = doc
            .select(&sel_og_title)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string)
            .or_else(|| {
                doc.select(&sel_title)
                    .next()
                    .map(|el| el.text().collect::<String>())
            })
            .or_else(|| {
                doc.select(&sel_h1)
                    .next()
                    .map(|el| el.text().collect::<String>())
            })
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let Some(title) = title else {
            bail!("page at {url} has no usable title");
        };

        let mut paragraphs: Vec<String> = doc
            .select(&sel_article_p)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            paragraphs = doc
                .select(&sel_p)
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if paragraphs.is_empty() {
            bail!("page at {url} has no extractable body text");
        }
        let body = paragraphs.join("\n\n");

        let image_url = doc
            .select(&sel_og_image)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string);

        let category = guess_category(&title, &body);
        Ok(ArticleDraft {
            title,
            body,
            url: url.to_string(),
            author: None,
            image_url,
            published_at: Utc::now(),
            category,
        })
    }
}

#[async_trait]
impl Extractor for ScrapeExtractor {
    async fn extract(&self, url: &str) -> Result<Vec<ArticleDraft>> {
        let html = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching page {url}"))?
            .error_for_status()
            .context("page responded with error status")?
            .text()
            .await
            .context("reading page body")?;
        let draft = Self::parse_page(&html, url)?;
        Ok(vec![draft])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html>
  <head>
    <title>Fallback title</title>
    <meta property="og:title" content="Hospital expands vaccine program">
    <meta property="og:image" content="https://site.example/lead.jpg">
  </head>
  <body>
    <article>
      <p>The hospital said the vaccine rollout reached more patients.</p>
      <p>Doctors expect the program to continue.</p>
    </article>
    <p>Unrelated footer text.</p>
  </body>
</html>"#;

    #[test]
    fn og_title_wins_over_title_tag() {
        let draft = ScrapeExtractor::parse_page(PAGE, "https://site.example/a").unwrap();
        assert_eq!(draft.title, "Hospital expands vaccine program");
    }

    #[test]
    fn article_paragraphs_exclude_footer() {
        let draft = ScrapeExtractor::parse_page(PAGE, "https://site.example/a").unwrap();
        assert!(draft.body.contains("vaccine rollout"));
        assert!(!draft.body.contains("footer"));
    }

    #[test]
    fn og_image_is_resolved() {
        let draft = ScrapeExtractor::parse_page(PAGE, "https://site.example/a").unwrap();
        assert_eq!(
            draft.image_url.as_deref(),
            Some("https://site.example/lead.jpg")
        );
    }

    #[test]
    fn category_comes_from_page_text() {
        let draft = ScrapeExtractor::parse_page(PAGE, "https://site.example/a").unwrap();
        assert_eq!(draft.category, crate::model::Category::Health);
    }

    #[test]
    fn empty_page_is_an_error() {
        assert!(ScrapeExtractor::parse_page("<html></html>", "https://x.example").is_err());
    }
}
