// src/extract/feed.rs
//! RSS feed extractor. Parses a channel with quick-xml, keeps entries that
//! carry both a link and a title, and resolves content, image, and category
//! through fixed preference orders. A single malformed entry is dropped,
//! never fatal for the feed.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::extract::Extractor;
use crate::model::{ArticleDraft, Category};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize, Default)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    // quick-xml strips namespace prefixes, so `content:encoded` arrives as
    // `encoded`, `dc:creator` as `creator`, `media:thumbnail` as `thumbnail`.
    #[serde(rename = "encoded")]
    content_encoded: Option<String>,
    // Collects both plain RSS `<content>` and `<media:content url=.../>`,
    // which share the local name; text and @url tell them apart.
    #[serde(default)]
    content: Vec<ContentRef>,
    description: Option<String>,
    summary: Option<String>,
    creator: Option<String>,
    author: Option<String>,
    thumbnail: Option<MediaRef>,
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize, Default)]
struct ContentRef {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "$text")]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MediaRef {
    #[serde(rename = "@url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime_type: Option<String>,
}

/// Keyword table for coarse category guessing. The category with the most
/// hits wins; no hits or a tie falls back to `Other`.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Politics,
        &[
            "election", "senate", "congress", "parliament", "minister", "president", "policy",
            "vote", "campaign", "legislation",
        ],
    ),
    (
        Category::Business,
        &[
            "market", "stocks", "earnings", "economy", "inflation", "revenue", "merger",
            "startup", "investor", "trade",
        ],
    ),
    (
        Category::Technology,
        &[
            "software", "startup", "silicon", "chip", "internet", "cyber", "robot",
            "artificial intelligence", "smartphone", "app",
        ],
    ),
    (
        Category::Science,
        &[
            "research", "study", "scientists", "space", "nasa", "climate", "physics",
            "discovery", "experiment", "species",
        ],
    ),
    (
        Category::Health,
        &[
            "health", "hospital", "vaccine", "virus", "disease", "doctor", "patients",
            "medical", "drug", "outbreak",
        ],
    ),
    (
        Category::Sports,
        &[
            "game", "season", "coach", "league", "championship", "tournament", "player",
            "team", "olympic", "match",
        ],
    ),
    (
        Category::Entertainment,
        &[
            "film", "movie", "album", "celebrity", "festival", "actor", "premiere",
            "box office", "streaming", "concert",
        ],
    ),
    (
        Category::World,
        &[
            "united nations", "border", "conflict", "embassy", "refugee", "treaty",
            "sanctions", "diplomacy", "war", "ceasefire",
        ],
    ),
];

/// Count keyword hits per category over the lowercased title+body. Most hits
/// wins; zero hits or a tie for the top count falls back to `Other`.
pub fn guess_category(title: &str, body: &str) -> Category {
    let haystack = format!("{} {}", title, body).to_lowercase();
    let mut best = Category::Other;
    let mut best_hits = 0usize;
    let mut tied = false;
    for (category, keywords) in CATEGORY_KEYWORDS {
        let hits = keywords
            .iter()
            .filter(|k| haystack.contains(*k))
            .count();
        if hits > best_hits {
            best = *category;
            best_hits = hits;
            tied = false;
        } else if hits == best_hits && hits > 0 {
            tied = true;
        }
    }
    if best_hits == 0 || tied {
        Category::Other
    } else {
        best
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn first_img_src(html: &str) -> Option<String> {
    static RE_IMG: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        regex::Regex::new(r#"(?is)<img[^>]+src\s*=\s*["']([^"']+)["']"#).unwrap()
    });
    re.captures(html).map(|c| c[1].to_string())
}

fn strip_tags(html: &str) -> String {
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = html_escape::decode_html_entities(&re.replace_all(html, " ")).to_string();
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&out, " ").trim().to_string()
}

impl Item {
    /// Text body of a plain `<content>` element, ignoring the url-only
    /// `<media:content>` entries sharing its local name.
    fn inline_content(&self) -> Option<&str> {
        self.content
            .iter()
            .filter(|c| c.url.is_none())
            .find_map(|c| c.text.as_deref())
    }

    fn media_content_url(&self) -> Option<String> {
        self.content.iter().find_map(|c| c.url.clone())
    }

    /// Richest available content field wins.
    fn best_content(&self) -> Option<&str> {
        [
            self.content_encoded.as_deref(),
            self.inline_content(),
            self.description.as_deref(),
            self.summary.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
    }

    fn best_image(&self) -> Option<String> {
        if let Some(url) = self.media_content_url() {
            return Some(url);
        }
        if let Some(url) = self.thumbnail.as_ref().and_then(|m| m.url.clone()) {
            return Some(url);
        }
        if let Some(enc) = &self.enclosure {
            let is_image = enc
                .mime_type
                .as_deref()
                .map(|t| t.starts_with("image/"))
                .unwrap_or(false);
            if is_image {
                if let Some(url) = enc.url.clone() {
                    return Some(url);
                }
            }
        }
        self.best_content().and_then(first_img_src)
    }
}

pub struct FeedExtractor {
    client: reqwest::Client,
}

impl FeedExtractor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self { client })
    }

    /// Parse a raw RSS document into drafts. Entries missing a link or a
    /// title are excluded silently.
    pub fn parse_feed(xml: &str) -> Result<Vec<ArticleDraft>> {
        let t0 = std::time::Instant::now();
        let rss: Rss = from_str(xml).context("parsing rss xml")?;

        let mut out = Vec::with_capacity(rss.channel.items.len());
        for item in rss.channel.items {
            let (Some(link), Some(title)) = (item.link.as_deref(), item.title.as_deref()) else {
                continue;
            };
            let link = link.trim();
            let title = strip_tags(title);
            if link.is_empty() || title.is_empty() {
                continue;
            }

            let body_html = item.best_content().unwrap_or_default().to_string();
            let body = strip_tags(&body_html);
            let image_url = item.best_image();
            let author = item
                .creator
                .clone()
                .or_else(|| item.author.clone())
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty());
            let published_at = item
                .pub_date
                .as_deref()
                .and_then(parse_rfc2822)
                .unwrap_or_else(Utc::now);
            let category = guess_category(&title, &body);

            out.push(ArticleDraft {
                title,
                body,
                url: link.to_string(),
                author,
                image_url,
                published_at,
                category,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_feed_parse_ms").record(ms);
        counter!("ingest_feed_entries_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl Extractor for FeedExtractor {
    async fn extract(&self, url: &str) -> Result<Vec<ArticleDraft>> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching feed {url}"))?
            .error_for_status()
            .context("feed responded with error status")?
            .text()
            .await
            .context("reading feed body")?;
        Self::parse_feed(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:media="http://search.yahoo.com/mrss/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example Wire</title>
    <item>
      <title>Senate passes budget vote after long campaign</title>
      <link>https://wire.example/a</link>
      <pubDate>Mon, 01 Sep 2025 08:30:00 GMT</pubDate>
      <description>Short summary.</description>
      <content:encoded><![CDATA[<p>The <b>senate</b> vote closed the campaign season.</p><img src="https://wire.example/a.jpg">]]></content:encoded>
      <dc:creator>A. Reporter</dc:creator>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped at parse time.</description>
    </item>
    <item>
      <title>Quiet day</title>
      <link>https://wire.example/b</link>
      <description>Nothing notable happened anywhere.</description>
      <enclosure url="https://wire.example/b.png" type="image/png"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn entries_without_link_are_excluded_not_fatal() {
        let drafts = FeedExtractor::parse_feed(FEED).unwrap();
        assert_eq!(drafts.len(), 2);
    }

    #[test]
    fn content_encoded_is_preferred_over_description() {
        let drafts = FeedExtractor::parse_feed(FEED).unwrap();
        assert!(drafts[0].body.contains("senate vote closed"));
        assert!(!drafts[0].body.contains("Short summary"));
    }

    #[test]
    fn image_falls_back_through_preference_order() {
        let drafts = FeedExtractor::parse_feed(FEED).unwrap();
        // First item: no media fields, image pulled from embedded <img>.
        assert_eq!(
            drafts[0].image_url.as_deref(),
            Some("https://wire.example/a.jpg")
        );
        // Second kept item: enclosure with an image type.
        assert_eq!(
            drafts[1].image_url.as_deref(),
            Some("https://wire.example/b.png")
        );
    }

    #[test]
    fn pub_date_parses_and_falls_back_to_now() {
        let drafts = FeedExtractor::parse_feed(FEED).unwrap();
        assert_eq!(drafts[0].published_at.timestamp(), 1_756_715_400);
        // Second kept item has no pubDate; should be "now-ish".
        let age = Utc::now() - drafts[1].published_at;
        assert!(age.num_seconds() >= 0 && age.num_seconds() < 60);
    }

    #[test]
    fn category_is_guessed_from_keywords() {
        let drafts = FeedExtractor::parse_feed(FEED).unwrap();
        assert_eq!(drafts[0].category, Category::Politics);
        assert_eq!(drafts[1].category, Category::Other);
    }

    #[test]
    fn category_without_any_keyword_hits_is_other() {
        assert_eq!(guess_category("Plain headline", "plain words only"), Category::Other);
    }

    #[test]
    fn category_tie_favors_other() {
        // One politics hit ("election") and one sports hit ("coach").
        assert_eq!(
            guess_category("Election day", "the coach smiled"),
            Category::Other
        );
    }

    const MEDIA_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Media Wire</title>
    <item>
      <title>Gallery piece</title>
      <link>https://wire.example/m1</link>
      <description>Caption text for the gallery.</description>
      <media:content url="https://wire.example/m1-full.jpg" medium="image"/>
      <media:thumbnail url="https://wire.example/m1-thumb.jpg"/>
      <enclosure url="https://wire.example/m1-enc.png" type="image/png"/>
      <dc:creator>M. Shooter</dc:creator>
    </item>
    <item>
      <title>Thumbnail only</title>
      <link>https://wire.example/m2</link>
      <description>Body comes from the description.</description>
      <media:thumbnail url="https://wire.example/m2-thumb.jpg"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn media_content_outranks_thumbnail_and_enclosure() {
        let drafts = FeedExtractor::parse_feed(MEDIA_FEED).unwrap();
        assert_eq!(
            drafts[0].image_url.as_deref(),
            Some("https://wire.example/m1-full.jpg")
        );
        assert_eq!(drafts[0].author.as_deref(), Some("M. Shooter"));
    }

    #[test]
    fn thumbnail_is_used_when_no_media_content() {
        let drafts = FeedExtractor::parse_feed(MEDIA_FEED).unwrap();
        assert_eq!(
            drafts[1].image_url.as_deref(),
            Some("https://wire.example/m2-thumb.jpg")
        );
    }

    #[test]
    fn media_content_url_does_not_bleed_into_body() {
        let drafts = FeedExtractor::parse_feed(MEDIA_FEED).unwrap();
        assert_eq!(drafts[0].body, "Caption text for the gallery.");
        assert_eq!(drafts[1].body, "Body comes from the description.");
    }

    #[test]
    fn author_prefers_dc_creator() {
        let drafts = FeedExtractor::parse_feed(FEED).unwrap();
        assert_eq!(drafts[0].author.as_deref(), Some("A. Reporter"));
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(FeedExtractor::parse_feed("not xml at all").is_err());
    }
}
