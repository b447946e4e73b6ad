//! Search aggregator
//!
//! Fans a query out to every source endpoint concurrently and merges the
//! (title, link) pairs they return. Output order follows the source list,
//! never response latency.

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{FetchRequest, SharedTransport, TorError};
use robin_core::SearchEngine;

static ONION_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^/\s"'<>]*\.onion[^\s"'<>]*"#).unwrap());

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// A search result from a dark web search engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    /// Result URL (always .onion)
    pub link: String,
    /// Source that first reported this link
    pub engine: String,
}

/// A source that contributed nothing because it failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub engine: String,
    pub reason: String,
}

/// Merged results plus the sources that failed along the way
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchHit>,
    pub failed_sources: Vec<SourceFailure>,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Sources queried at once
    pub max_workers: usize,
    pub per_source_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            per_source_timeout: Duration::from_secs(30),
        }
    }
}

/// Concurrent multi-source search
pub struct Aggregator {
    transport: SharedTransport,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(transport: SharedTransport, config: AggregatorConfig) -> Self {
        Self { transport, config }
    }

    /// Query every source and return deduplicated hits in source order
    pub async fn search(&self, query: &str, engines: &[SearchEngine]) -> SearchOutcome {
        use futures::stream::{self, StreamExt};

        let mut contributions: Vec<(usize, String, Result<Vec<SearchHit>, TorError>)> =
            stream::iter(engines.iter().enumerate())
                .map(|(idx, engine)| async move {
                    let result = self.query_engine(engine, query).await;
                    (idx, engine.name.clone(), result)
                })
                .buffer_unordered(self.config.max_workers.max(1))
                .collect()
                .await;

        contributions.sort_by_key(|(idx, _, _)| *idx);

        let mut outcome = SearchOutcome::default();
        let mut per_source = Vec::with_capacity(contributions.len());
        for (_, name, result) in contributions {
            match result {
                Ok(hits) => per_source.push(hits),
                Err(e) => {
                    warn!("Engine {} failed: {}", name, e);
                    outcome.failed_sources.push(SourceFailure {
                        engine: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        outcome.results = dedup_by_link(per_source.into_iter().flatten());
        info!(
            "Aggregated {} unique results from {} sources ({} failed)",
            outcome.results.len(),
            engines.len(),
            outcome.failed_sources.len()
        );
        outcome
    }

    async fn query_engine(&self, engine: &SearchEngine, query: &str) -> Result<Vec<SearchHit>, TorError> {
        let url = engine.build_url(query);
        debug!("Crawling {} with query: {}", engine.name, query);

        let request = FetchRequest::get(&url, self.config.per_source_timeout);
        let response = tokio::time::timeout(self.config.per_source_timeout, self.transport.fetch(request))
            .await
            .map_err(|_| TorError::Timeout(url.clone()))??;

        if !response.is_success() {
            warn!("Engine {} returned status: {}", engine.name, response.status);
            return Ok(Vec::new());
        }

        let results = parse_search_results(&response.body, &engine.name, engine.host());
        debug!("Engine {} returned {} results", engine.name, results.len());
        Ok(results)
    }
}

/// Keep the first occurrence of each exact link
pub fn dedup_by_link(hits: impl IntoIterator<Item = SearchHit>) -> Vec<SearchHit> {
    let mut seen: HashSet<String> = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.link.clone()))
        .collect()
}

/// Parse (title, onion link) pairs out of a results page
pub fn parse_search_results(html: &str, engine_name: &str, engine_host: Option<&str>) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(m) = ONION_HREF.find(href) else {
            continue;
        };
        let link = m.as_str();

        // Pagination and self-links
        if engine_host.is_some_and(|host| link_host(link) == Some(host)) {
            continue;
        }

        let title = element.text().collect::<Vec<_>>().join(" ");
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            continue;
        }

        results.push(SearchHit {
            title,
            link: link.to_string(),
            engine: engine_name.to_string(),
        });
    }

    results
}

fn link_host(link: &str) -> Option<&str> {
    let rest = link.split_once("://")?.1;
    rest.split(['/', '?', '#']).next()
}
