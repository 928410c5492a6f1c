// src/dedup.rs
use std::sync::Arc;

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::store::ArticleStore;

/// Normalize article text for fingerprinting: decode HTML entities, strip
/// tags, lowercase, collapse whitespace, trim. Two renditions of the same
/// text that differ only in markup, case, or incidental whitespace must
/// normalize identically.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out.to_lowercase();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// Deterministic near-duplicate key for an article, independent of its URL.
pub fn compute_fingerprint(title: &str, body: &str) -> String {
    let normalized = format!("{}\n{}", normalize_text(title), normalize_text(body));
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Pre-persistence duplicate check. This is an optimization; the store's
/// uniqueness constraint on fingerprint remains the correctness boundary
/// under concurrent workers.
#[derive(Clone)]
pub struct DedupService {
    articles: Arc<dyn ArticleStore>,
}

impl DedupService {
    pub fn new(articles: Arc<dyn ArticleStore>) -> Self {
        Self { articles }
    }

    /// True if an existing article matches by canonical URL or by
    /// fingerprint. Both checks are authoritative and short-circuit: a URL
    /// match covers re-publication with minor edits, a fingerprint match
    /// covers the same text under a different URL.
    pub async fn is_duplicate(&self, url: &str, fingerprint: &str) -> Result<bool> {
        if self.articles.exists_by_url(url).await? {
            return Ok(true);
        }
        self.articles.exists_by_fingerprint(fingerprint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = compute_fingerprint("Title", "Body text.");
        let b = compute_fingerprint("Title", "Body text.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn markup_and_case_variants_fingerprint_identically() {
        let plain = compute_fingerprint("Rates hold steady", "The committee voted to hold.");
        let html = compute_fingerprint(
            "  Rates   HOLD steady ",
            "<p>The <b>committee</b> voted\n to hold.</p>",
        );
        assert_eq!(plain, html);
    }

    #[test]
    fn different_bodies_fingerprint_differently() {
        let a = compute_fingerprint("Title", "First body");
        let b = compute_fingerprint("Title", "Second body");
        assert_ne!(a, b);
    }

    #[test]
    fn normalize_strips_entities_and_tags() {
        let out = normalize_text("Fed&nbsp;holds <em>rates</em>   steady");
        assert_eq!(out, "fed holds rates steady");
    }
}
