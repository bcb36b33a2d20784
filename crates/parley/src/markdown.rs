//! Server-side markdown rendering for stored transcripts.
//!
//! Uses comrak for CommonMark parsing with raw HTML escaped, so model
//! output cannot inject markup into a rendered page. Results are
//! cached to avoid re-rendering the same content.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use comrak::{Options, markdown_to_html};
use once_cell::sync::Lazy;
use tokio::sync::RwLock;

/// Cache up to this many rendered entries.
const CACHE_MAX_ENTRIES: usize = 500;

static RENDER_CACHE: Lazy<Arc<RwLock<RenderCache>>> =
    Lazy::new(|| Arc::new(RwLock::new(RenderCache::new(CACHE_MAX_ENTRIES))));

struct RenderCache {
    entries: HashMap<u64, (String, std::time::Instant)>,
    max_entries: usize,
}

impl RenderCache {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    fn get(&self, hash: u64) -> Option<String> {
        self.entries.get(&hash).map(|(html, _)| html.clone())
    }

    fn insert(&mut self, hash: u64, html: String) {
        if self.entries.len() >= self.max_entries {
            // Drop the oldest quarter of the cache.
            let mut by_age: Vec<_> = self
                .entries
                .iter()
                .map(|(key, (_, at))| (*key, *at))
                .collect();
            by_age.sort_by(|a, b| a.1.cmp(&b.1));

            for (key, _) in by_age.into_iter().take(self.max_entries / 4) {
                self.entries.remove(&key);
            }
        }

        self.entries.insert(hash, (html, std::time::Instant::now()));
    }
}

fn hash_content(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Render markdown to sanitized HTML.
pub async fn render_html(content: &str) -> String {
    let hash = hash_content(content);

    {
        let cache = RENDER_CACHE.read().await;
        if let Some(html) = cache.get(hash) {
            return html;
        }
    }

    let mut options = Options::default();
    options.extension.strikethrough = true;
    options.extension.table = true;
    options.extension.autolink = true;
    let html = markdown_to_html(content, &options);

    let mut cache = RENDER_CACHE.write().await;
    cache.insert(hash, html.clone());
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_renders_fenced_code() {
        let html = render_html("```\nlet x = 1;\n```").await;
        assert!(html.contains("<pre>"));
        assert!(html.contains("let x = 1;"));
    }

    #[tokio::test]
    async fn test_raw_html_is_escaped() {
        let html = render_html("hello <script>alert(1)</script>").await;
        assert!(!html.contains("<script>"));
        assert!(html.contains("hello"));
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let first = render_html("**bold**").await;
        let second = render_html("**bold**").await;
        assert_eq!(first, second);
        assert!(first.contains("<strong>"));
    }
}
