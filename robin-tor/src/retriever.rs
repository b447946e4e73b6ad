//! Content retriever for dark web sites
//!
//! Fetches selected pages concurrently and reduces them to bounded plain
//! text. A page that cannot be fetched degrades to its known title.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{FetchRequest, SharedTransport, TorError};

static TITLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

pub const TRUNCATION_MARKER: &str = "...(truncated)";

/// A page to retrieve, with the title known from search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalTarget {
    pub url: String,
    pub title: String,
}

impl RetrievalTarget {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
        }
    }

    fn fallback_text(&self) -> String {
        if self.title.trim().is_empty() {
            self.url.clone()
        } else {
            self.title.clone()
        }
    }
}

/// Retrieved content from a dark web page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedPage {
    pub url: String,
    pub title: String,
    /// Visible text, or the title when retrieval failed
    pub content: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub max_workers: usize,
    pub per_item_timeout: Duration,
    /// Maximum characters of content kept per page
    pub max_chars: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            per_item_timeout: Duration::from_secs(45),
            max_chars: 2000,
        }
    }
}

/// Concurrent page retrieval
pub struct Retriever {
    transport: SharedTransport,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(transport: SharedTransport, config: RetrieverConfig) -> Self {
        Self { transport, config }
    }

    /// Retrieve every target; output order matches input order
    pub async fn retrieve(&self, targets: &[RetrievalTarget]) -> Vec<RetrievedPage> {
        use futures::stream::{self, StreamExt};

        let mut pages: Vec<(usize, RetrievedPage)> = stream::iter(targets.iter().enumerate())
            .map(|(idx, target)| async move { (idx, self.retrieve_one(target).await) })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        pages.sort_by_key(|(idx, _)| *idx);

        let failed = pages.iter().filter(|(_, p)| !p.succeeded).count();
        info!("Retrieved {} pages ({} fell back to title)", pages.len(), failed);

        pages.into_iter().map(|(_, page)| page).collect()
    }

    /// Retrieve a single target, never failing
    pub async fn retrieve_one(&self, target: &RetrievalTarget) -> RetrievedPage {
        match self.fetch_text(&target.url).await {
            Ok(Some(text)) => RetrievedPage {
                url: target.url.clone(),
                title: target.title.clone(),
                content: truncate_chars(&text, self.config.max_chars),
                succeeded: true,
            },
            Ok(None) => self.degraded(target),
            Err(e) => {
                warn!("Failed to retrieve {}: {}", target.url, e);
                self.degraded(target)
            }
        }
    }

    fn degraded(&self, target: &RetrievalTarget) -> RetrievedPage {
        RetrievedPage {
            url: target.url.clone(),
            title: target.title.clone(),
            content: truncate_chars(&target.fallback_text(), self.config.max_chars),
            succeeded: false,
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<Option<String>, TorError> {
        debug!("Retrieving: {}", url);

        let request = FetchRequest::get(url, self.config.per_item_timeout);
        let response = self.transport.fetch(request).await?;

        if !response.is_success() {
            warn!("Retrieval of {} returned status: {}", url, response.status);
            return Ok(None);
        }

        let (_, text) = extract_content(&response.body);
        Ok(Some(text))
    }
}

/// Cut `text` to at most `max_chars` characters, marker included.
///
/// A budget too small to hold the marker is filled with text alone.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_len {
        return text.chars().take(max_chars).collect();
    }
    let mut cut: String = text.chars().take(max_chars - marker_len).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

/// Extract title and text content from HTML
pub fn extract_content(html: &str) -> (Option<String>, String) {
    use scraper::node::Node;

    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let Some(body) = document.select(&BODY_SELECTOR).next() else {
        return (title, String::new());
    };

    let mut text_parts = Vec::new();

    // Walk all descendants, skip script/style/noscript subtrees
    for node_ref in body.descendants() {
        if let Node::Text(text_node) = node_ref.value() {
            let in_excluded = node_ref.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| matches!(el.name(), "script" | "style" | "noscript"))
            });

            if !in_excluded {
                let trimmed = text_node.trim();
                if !trimmed.is_empty() {
                    text_parts.push(trimmed);
                }
            }
        }
    }

    (title, normalize_whitespace(&text_parts.join(" ")))
}

/// Normalize whitespace in text
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::sync::Arc;

    fn retriever(transport: MockTransport, max_chars: usize) -> Retriever {
        Retriever::new(
            Arc::new(transport),
            RetrieverConfig {
                max_workers: 3,
                per_item_timeout: Duration::from_secs(2),
                max_chars,
            },
        )
    }

    #[test]
    fn test_extract_content() {
        let html = r#"
            <html>
            <head><title>Test Page</title></head>
            <body>
                <script>var x = 1;</script>
                <h1>Hello World</h1>
                <p>This is test content.</p>
                <style>.x { color: red; }</style>
                <noscript>Enable JS</noscript>
            </body>
            </html>
        "#;

        let (title, text) = extract_content(html);

        assert_eq!(title, Some("Test Page".to_string()));
        assert_eq!(text, "Hello World This is test content.");
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  hello   world  \n\t  test  ";
        let output = normalize_whitespace(input);
        assert_eq!(output, "hello world test");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let cut = truncate_chars(&"é".repeat(30), 20);
        assert_eq!(cut, format!("{}{}", "é".repeat(6), TRUNCATION_MARKER));
        assert_eq!(cut.chars().count(), 20);
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_budget_smaller_than_marker() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn test_retrieve_preserves_order_and_degrades() {
        let transport = MockTransport::default()
            .respond_after(
                "http://a.onion/",
                "<html><body><p>Alpha   page</p></body></html>",
                Duration::from_millis(60),
            )
            .time_out("http://b.onion/")
            .respond("http://c.onion/", 404, "missing")
            .respond("http://d.onion/", 200, "<html><body>Delta</body></html>");

        let targets = vec![
            RetrievalTarget::new("http://a.onion/", "Alpha"),
            RetrievalTarget::new("http://b.onion/", "Bravo"),
            RetrievalTarget::new("http://c.onion/", ""),
            RetrievalTarget::new("http://d.onion/", "Delta"),
        ];

        let pages = retriever(transport, 2000).retrieve(&targets).await;

        let urls: Vec<_> = pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a.onion/", "http://b.onion/", "http://c.onion/", "http://d.onion/"]);

        assert!(pages[0].succeeded);
        assert_eq!(pages[0].content, "Alpha page");
        assert!(!pages[1].succeeded);
        assert_eq!(pages[1].content, "Bravo");
        assert!(!pages[2].succeeded);
        assert_eq!(pages[2].content, "http://c.onion/");
        assert!(pages[3].succeeded);
    }

    #[tokio::test]
    async fn test_content_budget() {
        let body = format!("<html><body><p>{}</p></body></html>", "x".repeat(50));
        let transport = MockTransport::default().respond("http://long.onion/", 200, &body);

        let page = retriever(transport, 30)
            .retrieve_one(&RetrievalTarget::new("http://long.onion/", "Long"))
            .await;

        assert!(page.succeeded);
        assert_eq!(page.content, format!("{}...(truncated)", "x".repeat(16)));
        assert_eq!(page.content.chars().count(), 30);
    }
}
