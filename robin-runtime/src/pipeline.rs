//! Investigation pipeline
//!
//! One run: recall similar investigations, refine the query, aggregate
//! search results, select the most relevant, retrieve their content,
//! summarize, and save everything atomically. Stages that lose an item or
//! fall back to a default record a [`Degradation`] and the run carries on.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use robin_agents::{build_summary_input, generate_summary, refine_query, SelectionMode, Selector, SharedBackend};
use robin_core::{extract_indicators, Extraction, SearchEngine};
use robin_memory::{MemoryStore, NewInvestigation, NewSearchResult, SimilarInvestigation, StoreError};
use robin_tor::{
    Aggregator, RetrievalTarget, RetrievedPage, Retriever, SearchHit, SharedTransport, TorError, TorTransport,
};

use crate::RobinConfig;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No LLM backend configured")]
    BackendNotConfigured,

    #[error("Query is empty")]
    EmptyQuery,

    #[error("Transport setup failed: {0}")]
    Transport(#[from] TorError),

    #[error("Investigation memory unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Investigation memory task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

    #[error("Failed to write summary file: {0}")]
    SummaryFile(#[from] std::io::Error),
}

/// A stage that completed in a reduced form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    RefinementSkipped { reason: String },
    SourceFailed { engine: String, reason: String },
    SelectionTitlesOnly,
    SelectionFallback,
    RetrievalFallback { url: String },
    SummaryFallback { reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::RefinementSkipped { reason } => write!(f, "query refinement skipped ({})", reason),
            Degradation::SourceFailed { engine, reason } => write!(f, "source {} failed ({})", engine, reason),
            Degradation::SelectionTitlesOnly => f.write_str("results ranked from titles only"),
            Degradation::SelectionFallback => f.write_str("relevance ranking unavailable, kept first results"),
            Degradation::RetrievalFallback { url } => write!(f, "{} unreachable, used its title", url),
            Degradation::SummaryFallback { reason } => write!(f, "summary generation failed ({})", reason),
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub session_id: Option<String>,
    /// Directory to write the markdown summary into
    pub summary_dir: Option<PathBuf>,
    pub capture_count: u32,
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct InvestigationReport {
    pub investigation_id: i64,
    pub query: String,
    pub refined_query: String,
    pub similar: Vec<SimilarInvestigation>,
    pub results: Vec<SearchHit>,
    pub selected: Vec<SearchHit>,
    pub pages: Vec<RetrievedPage>,
    pub indicators: Extraction,
    pub summary: String,
    pub summary_file: Option<PathBuf>,
    pub degradations: Vec<Degradation>,
    pub duration: Duration,
}

impl InvestigationReport {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Builds a [`Pipeline`]; only the backend is mandatory
#[derive(Default)]
pub struct PipelineBuilder {
    config: RobinConfig,
    transport: Option<SharedTransport>,
    backend: Option<SharedBackend>,
    store: Option<Arc<MemoryStore>>,
}

impl PipelineBuilder {
    pub fn new(config: RobinConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn backend(mut self, backend: SharedBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let backend = self.backend.ok_or(PipelineError::BackendNotConfigured)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => TorTransport::shared(&self.config.tor)?,
        };
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::open(&self.config.store.path)?),
        };

        Ok(Pipeline {
            aggregator: Aggregator::new(transport.clone(), self.config.aggregator_config()),
            retriever: Retriever::new(transport, self.config.retriever_config()),
            selector: Selector::new(backend.clone()),
            engines: self.config.engines(),
            top_k: self.config.selector.top_k,
            backend,
            store,
        })
    }
}

/// The investigation pipeline
pub struct Pipeline {
    backend: SharedBackend,
    store: Arc<MemoryStore>,
    aggregator: Aggregator,
    retriever: Retriever,
    selector: Selector,
    engines: Vec<SearchEngine>,
    top_k: usize,
}

impl Pipeline {
    pub fn builder(config: RobinConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub async fn run(&self, query: &str, options: RunOptions) -> Result<InvestigationReport, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        let started = Instant::now();
        let mut degradations = Vec::new();
        info!("Starting investigation: {}", query);

        // SQLite calls block, so they run off the async workers
        let store = self.store.clone();
        let lookup = query.to_string();
        let context = tokio::task::spawn_blocking(move || store.get_context_for_query(&lookup)).await??;
        if !context.is_empty() {
            info!(
                "Found {} similar investigations and {} known indicators",
                context.similar_investigations.len(),
                context.related_entities.len()
            );
        }

        let refined_query = match refine_query(&self.backend, query, Some(context.to_prompt().as_str())).await {
            Ok(refined) => refined,
            Err(e) => {
                warn!("Refinement failed, searching with the original query: {}", e);
                degradations.push(Degradation::RefinementSkipped { reason: e.to_string() });
                query.to_string()
            }
        };

        let outcome = self.aggregator.search(&refined_query, &self.engines).await;
        degradations.extend(outcome.failed_sources.iter().map(|f| Degradation::SourceFailed {
            engine: f.engine.clone(),
            reason: f.reason.clone(),
        }));
        let results = outcome.results;

        let selection = self.selector.select(query, &results, self.top_k).await;
        match selection.mode {
            SelectionMode::Ranked => {}
            SelectionMode::TitlesOnly => degradations.push(Degradation::SelectionTitlesOnly),
            SelectionMode::Fallback => degradations.push(Degradation::SelectionFallback),
        }
        let selected: Vec<SearchHit> = selection.pick(&results).into_iter().cloned().collect();

        let targets: Vec<RetrievalTarget> = selected
            .iter()
            .map(|hit| RetrievalTarget::new(&hit.link, &hit.title))
            .collect();
        let pages = self.retriever.retrieve(&targets).await;
        degradations.extend(
            pages
                .iter()
                .filter(|p| !p.succeeded)
                .map(|p| Degradation::RetrievalFallback { url: p.url.clone() }),
        );

        let content_indicators = extract_indicators(
            &pages
                .iter()
                .map(|p| p.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );

        let summary = match generate_summary(&self.backend, query, &pages, &content_indicators).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summary generation failed: {}", e);
                degradations.push(Degradation::SummaryFallback { reason: e.to_string() });
                format!(
                    "# Investigation Summary\n\n## Input Query\n{}\n\n{}",
                    query,
                    build_summary_input(&pages, &content_indicators)
                )
            }
        };

        let summary_file = match &options.summary_dir {
            Some(dir) => Some(write_summary(dir, &summary)?),
            None => None,
        };

        // Indicators are recorded from the summary and the retrieved text
        let entity_text = format!(
            "{}\n{}",
            summary,
            pages
                .iter()
                .filter(|p| p.succeeded)
                .map(|p| p.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        );
        let indicators = extract_indicators(&entity_text);

        let retrieved: HashSet<&str> = pages.iter().filter(|p| p.succeeded).map(|p| p.url.as_str()).collect();
        let search_results: Vec<NewSearchResult> = results
            .iter()
            .map(|hit| NewSearchResult {
                url: hit.link.clone(),
                title: hit.title.clone(),
                was_scraped: retrieved.contains(hit.link.as_str()),
                relevance_score: None,
            })
            .collect();
        let selected_urls: Vec<String> = selected.iter().map(|hit| hit.link.clone()).collect();

        let duration = started.elapsed();
        let investigation = NewInvestigation {
            query: query.to_string(),
            refined_query: Some(refined_query.clone()),
            model: self.backend.model_name().to_string(),
            summary: summary.clone(),
            summary_file: summary_file.as_ref().map(|p| p.display().to_string()),
            result_count: results.len() as u32,
            filtered_count: selected.len() as u32,
            capture_count: options.capture_count,
            duration_seconds: duration.as_secs_f64(),
            session_id: options.session_id.clone(),
        };
        let store = self.store.clone();
        let investigation_id = tokio::task::spawn_blocking(move || {
            store.save_run(&investigation, &search_results, &selected_urls, &entity_text)
        })
        .await??;

        info!(
            "Investigation {} complete in {:.1}s ({} results, {} selected, {} degradations)",
            investigation_id,
            duration.as_secs_f64(),
            results.len(),
            selected.len(),
            degradations.len()
        );

        Ok(InvestigationReport {
            investigation_id,
            query: query.to_string(),
            refined_query,
            similar: context.similar_investigations,
            results,
            selected,
            pages,
            indicators,
            summary,
            summary_file,
            degradations,
            duration,
        })
    }
}

fn write_summary(dir: &std::path::Path, summary: &str) -> Result<PathBuf, std::io::Error> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("summary_{}.md", Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f")));
    std::fs::write(&path, summary)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockTransport};
    use robin_agents::LlmError;
    use robin_core::IndicatorType;

    const ONION_A: &str = "http://marketabcdefghijklmnop.onion/listing";
    const ONION_B: &str = "http://forumabcdefghijklmnopq.onion/thread";

    fn config() -> RobinConfig {
        let mut config = RobinConfig::default();
        config.sources = Some(vec![
            SearchEngine::new("Alpha", "http://alphasearchabcdefgh.onion/?q={query}"),
            SearchEngine::new("Beta", "http://betasearchabcdefghi.onion/?q={query}"),
        ]);
        config.aggregator.per_source_timeout_secs = 2;
        config.retriever.per_item_timeout_secs = 2;
        config
    }

    fn results_page() -> String {
        format!(
            r#"<html><body><a href="{}">Ransomware market</a><a href="{}">Payment forum</a></body></html>"#,
            ONION_A, ONION_B
        )
    }

    fn transport() -> MockTransport {
        MockTransport::default()
            .respond("http://alphasearchabcdefgh.onion/?q=ransomware+bitcoin", 200, &results_page())
            .fail("http://betasearchabcdefghi.onion/?q=ransomware+bitcoin")
            .respond(
                ONION_A,
                200,
                "<html><body>Send to 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa</body></html>",
            )
            .fail(ONION_B)
    }

    fn pipeline(backend: MockBackend, store: Arc<MemoryStore>) -> Pipeline {
        Pipeline::builder(config())
            .backend(Arc::new(backend))
            .transport(Arc::new(transport()))
            .store(store)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_backend() {
        let result = Pipeline::builder(config())
            .transport(Arc::new(transport()))
            .store(Arc::new(MemoryStore::open_in_memory().unwrap()))
            .build();
        assert!(matches!(result, Err(PipelineError::BackendNotConfigured)));
    }

    #[tokio::test]
    async fn test_full_run_saves_investigation() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let backend = MockBackend::new(vec![
            Ok("ransomware bitcoin".into()),
            Ok("1, 2".into()),
            Ok("# Investigation Summary\nWallet 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa, see CVE-2024-1234".into()),
        ]);
        let dir = tempfile::tempdir().unwrap();

        let report = pipeline(backend, store.clone())
            .run(
                "ransomware payments",
                RunOptions {
                    summary_dir: Some(dir.path().to_path_buf()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.refined_query, "ransomware bitcoin");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.selected.len(), 2);
        assert!(report.pages[0].succeeded);
        assert!(!report.pages[1].succeeded);
        assert_eq!(report.pages[1].content, "Payment forum");
        assert!(report.indicators.contains_key(&IndicatorType::Bitcoin));
        assert!(report.indicators.contains_key(&IndicatorType::Cve));
        assert!(report.summary_file.as_ref().unwrap().exists());

        assert!(report.degradations.contains(&Degradation::SourceFailed {
            engine: "Beta".into(),
            reason: "Connection failed: unreachable".into(),
        }));
        assert!(report
            .degradations
            .contains(&Degradation::RetrievalFallback { url: ONION_B.into() }));

        let saved = store.get_investigation(report.investigation_id).unwrap().unwrap();
        assert_eq!(saved.result_count, 2);
        assert_eq!(saved.filtered_count, 2);
        assert_eq!(saved.model, "mock");

        let rows = store.get_search_results(report.investigation_id).unwrap();
        assert!(rows.iter().all(|r| r.was_filtered));
        assert_eq!(rows.iter().filter(|r| r.was_scraped).count(), 1);

        let wallet = store.search_entity("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap().unwrap();
        assert_eq!(wallet.entity.frequency, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_runs_share_one_store() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let answers = || {
            MockBackend::new(vec![
                Ok("ransomware bitcoin".into()),
                Ok("1".into()),
                Ok("# Investigation Summary\nWallet 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into()),
            ])
        };
        let first = pipeline(answers(), store.clone());
        let second = pipeline(answers(), store.clone());

        let (a, b) = tokio::join!(
            first.run("ransomware payments", RunOptions::default()),
            second.run("bitcoin laundering", RunOptions::default()),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.investigation_id, b.investigation_id);
        assert_eq!(store.get_investigation_history(10).unwrap().len(), 2);
        let wallet = store.search_entity("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap().unwrap();
        assert_eq!(wallet.entity.frequency, 2);
    }

    #[tokio::test]
    async fn test_llm_outage_degrades_but_completes() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let backend = MockBackend::new(vec![
            Err(LlmError::Api("down".into())),
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::RateLimited("429".into())),
            Err(LlmError::Api("down".into())),
        ]);

        // Refinement fails, so the search runs with the original query
        let transport = MockTransport::default()
            .respond("http://alphasearchabcdefgh.onion/?q=ransomware+bitcoin", 200, &results_page())
            .respond("http://betasearchabcdefghi.onion/?q=ransomware+bitcoin", 200, "<html></html>")
            .respond(ONION_A, 200, "<html><body>listing</body></html>")
            .respond(ONION_B, 200, "<html><body>thread</body></html>");
        let pipeline = Pipeline::builder(config())
            .backend(Arc::new(backend))
            .transport(Arc::new(transport))
            .store(store.clone())
            .build()
            .unwrap();

        let report = pipeline.run("ransomware bitcoin", RunOptions::default()).await.unwrap();

        assert!(matches!(report.degradations[0], Degradation::RefinementSkipped { .. }));
        assert!(report.degradations.contains(&Degradation::SelectionFallback));
        assert!(matches!(report.degradations.last(), Some(Degradation::SummaryFallback { .. })));
        assert_eq!(report.selected.len(), 2);
        assert!(report.summary.contains("## Input Query\nransomware bitcoin"));
        assert!(store.get_investigation(report.investigation_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_session_is_recorded() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let session = store.start_session().unwrap();
        let backend = MockBackend::new(vec![Ok("ransomware bitcoin".into()), Ok("1".into()), Ok("summary".into())]);

        let report = pipeline(backend, store.clone())
            .run(
                "ransomware payments",
                RunOptions {
                    session_id: Some(session.clone()),
                    capture_count: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let saved = store.get_investigation(report.investigation_id).unwrap().unwrap();
        assert_eq!(saved.session_id.as_deref(), Some(session.as_str()));
        assert_eq!(saved.capture_count, 2);
        assert_eq!(store.end_session(&session).unwrap().investigation_count, 1);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let result = pipeline(MockBackend::new(vec![]), store).run("   ", RunOptions::default()).await;
        assert!(matches!(result, Err(PipelineError::EmptyQuery)));
    }
}
