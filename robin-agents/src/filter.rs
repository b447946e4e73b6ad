//! Relevance selector
//!
//! Narrows aggregated results to the top-K using an LLM judgment. Selection
//! never fails: a rate limit triggers one titles-only retry, and any other
//! failure falls back to the first K results in aggregator order.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use robin_tor::SearchHit;

use crate::{LlmError, SharedBackend};

/// System prompt for relevance filtering
const FILTER_SYSTEM_PROMPT: &str = r#"
You are a Cybercrime Threat Intelligence Expert. You are given a dark web search query and a list of search results in the form of index, link and title.

Your task is to select the Top {k} most relevant results for investigation.

Rules:
1. Output ONLY the indices of the top {k} most relevant results (comma-separated)
2. Order by relevance (most relevant first)
3. Skip results that appear to be spam, unrelated, or low-quality
4. If fewer than {k} are relevant, output only the relevant ones

Search Query: {query}

Search Results:
"#;

/// How a selection was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// LLM ranked the full payload
    Ranked,
    /// LLM ranked a titles-only payload after a rate limit
    TitlesOnly,
    /// First K results, no LLM judgment
    Fallback,
}

/// Chosen 0-based indices into the input results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub mode: SelectionMode,
}

impl Selection {
    pub fn is_degraded(&self) -> bool {
        self.mode != SelectionMode::Ranked
    }

    /// Resolve indices back to results
    pub fn pick<'a>(&self, results: &'a [SearchHit]) -> Vec<&'a SearchHit> {
        self.indices.iter().filter_map(|&i| results.get(i)).collect()
    }
}

/// LLM-backed top-K selector
pub struct Selector {
    backend: SharedBackend,
}

impl Selector {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    pub async fn select(&self, query: &str, results: &[SearchHit], k: usize) -> Selection {
        if results.is_empty() || k == 0 {
            return Selection {
                indices: Vec::new(),
                mode: SelectionMode::Ranked,
            };
        }

        let system = FILTER_SYSTEM_PROMPT
            .replace("{k}", &k.to_string())
            .replace("{query}", query);

        match self.rank(&system, &format_full(results), results.len(), k).await {
            Ok(indices) => {
                info!("Selector picked {} of {} results", indices.len(), results.len());
                return Selection {
                    indices,
                    mode: SelectionMode::Ranked,
                };
            }
            Err(LlmError::RateLimited(reason)) => {
                warn!("Selector rate limited ({}), retrying with titles only", reason);
                match self.rank(&system, &format_titles(results), results.len(), k).await {
                    Ok(indices) => {
                        info!("Selector picked {} results from titles", indices.len());
                        return Selection {
                            indices,
                            mode: SelectionMode::TitlesOnly,
                        };
                    }
                    Err(e) => warn!("Titles-only selection failed: {}", e),
                }
            }
            Err(e) => warn!("Selection failed: {}", e),
        }

        let selection = fallback_selection(results.len(), k);
        info!("Selector fell back to the first {} results", selection.indices.len());
        selection
    }

    async fn rank(&self, system: &str, payload: &str, len: usize, k: usize) -> Result<Vec<usize>, LlmError> {
        let response = self.backend.generate(system, payload).await?;
        debug!("Selector response: {}", response.trim());
        Ok(parse_indices(&response, len, k))
    }
}

/// First `k` indices in aggregator order
pub fn fallback_selection(len: usize, k: usize) -> Selection {
    Selection {
        indices: (0..len.min(k)).collect(),
        mode: SelectionMode::Fallback,
    }
}

/// Parse 1-based indices out of free text, returning 0-based ones.
/// Out-of-range and repeated indices are dropped; at most `k` are kept.
pub fn parse_indices(response: &str, len: usize, k: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    response
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse::<usize>().ok())
        .filter(|&idx| idx >= 1 && idx <= len)
        .map(|idx| idx - 1)
        .filter(|idx| seen.insert(*idx))
        .take(k)
        .collect()
}

fn format_full(results: &[SearchHit]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            // Truncate link at .onion for display
            let short_link = hit
                .link
                .find(".onion")
                .map(|pos| &hit.link[..pos + 6])
                .unwrap_or(&hit.link);
            format!("{}. {} - {}", i + 1, short_link, hit.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_titles(results: &[SearchHit]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {}", i + 1, hit.title))
        .collect::<Vec<_>>()
        .join("\n")
}
