//! Callable tool registry
//!
//! Exposes search, retrieval, extraction, fetch, address analysis and
//! reputation lookup as named tools with fixed JSON schemas, so a
//! tool-capable model (or any bridge) can invoke them by name.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use robin_core::{analyze_address, extract_indicators, indicator_count, ChainHint, SearchEngine};
use robin_memory::{MemoryStore, StoreError};
use robin_tor::{
    truncate_chars, Aggregator, AggregatorConfig, FetchRequest, HttpMethod, RetrievalTarget, Retriever,
    RetrieverConfig, SharedTransport, TorError, TRUNCATION_MARKER,
};

use crate::RobinConfig;

/// Characters of a raw fetch body returned to the caller
const FETCH_MAX_CHARS: usize = 5000;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Name, description and JSON-schema parameters of a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "dark_web_search",
            description: "Search the configured onion search engines concurrently and return deduplicated links with titles.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"},
                    "max_results": {"type": "integer", "description": "Maximum results to return", "default": 50},
                    "threads": {"type": "integer", "description": "Engines queried at once", "default": 5}
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: "scrape_onion_site",
            description: "Retrieve the text content of a .onion page.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "The .onion URL to retrieve"},
                    "max_chars": {"type": "integer", "description": "Maximum characters of content", "default": 2000}
                },
                "required": ["url"]
            }),
        },
        ToolSpec {
            name: "extract_entities",
            description: "Extract indicators (onion domains, emails, crypto addresses, IPv4, CVEs, hashes) from text.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to scan"}
                },
                "required": ["text"]
            }),
        },
        ToolSpec {
            name: "tor_web_fetch",
            description: "Fetch any URL through Tor and return status, headers and a truncated body.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to fetch"},
                    "method": {"type": "string", "enum": ["GET", "POST"], "default": "GET"},
                    "timeout": {"type": "integer", "description": "Timeout in seconds", "default": 45},
                    "headers": {"type": "object", "additionalProperties": {"type": "string"}}
                },
                "required": ["url"]
            }),
        },
        ToolSpec {
            name: "crypto_analysis",
            description: "Classify a Bitcoin or Ethereum address by format.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "address": {"type": "string", "description": "Address to analyze"},
                    "chain": {"type": "string", "enum": ["auto", "bitcoin", "ethereum"], "default": "auto"}
                },
                "required": ["address"]
            }),
        },
        ToolSpec {
            name: "onion_reputation",
            description: "Look up an onion domain in investigation memory and report how often it has been seen.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "domain": {"type": "string", "description": "Onion domain or URL"}
                },
                "required": ["domain"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
    #[serde(default = "default_threads")]
    threads: usize,
}

fn default_max_results() -> usize {
    50
}

fn default_threads() -> usize {
    5
}

#[derive(Debug, Deserialize)]
struct ScrapeArgs {
    url: String,
    #[serde(default = "default_max_chars")]
    max_chars: usize,
}

fn default_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize)]
struct ExtractArgs {
    text: String,
}

#[derive(Debug, Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    45
}

#[derive(Debug, Deserialize)]
struct CryptoArgs {
    address: String,
    #[serde(default)]
    chain: ChainHint,
}

#[derive(Debug, Deserialize)]
struct ReputationArgs {
    domain: String,
}

/// Routes tool calls to the core operations
pub struct ToolDispatcher {
    transport: SharedTransport,
    store: Arc<MemoryStore>,
    engines: Vec<SearchEngine>,
    aggregator: AggregatorConfig,
    retriever: RetrieverConfig,
}

impl ToolDispatcher {
    pub fn new(transport: SharedTransport, store: Arc<MemoryStore>, config: &RobinConfig) -> Self {
        Self {
            transport,
            store,
            engines: config.engines(),
            aggregator: config.aggregator_config(),
            retriever: config.retriever_config(),
        }
    }

    /// Invoke a tool, folding any error into a `success: false` result
    pub async fn call(&self, name: &str, args: Value) -> Value {
        match self.dispatch(name, args).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                json!({"success": false, "error": e.to_string()})
            }
        }
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        debug!("Dispatching tool {}", name);
        match name {
            "dark_web_search" => self.dark_web_search(parse_args(name, args)?).await,
            "scrape_onion_site" => self.scrape_onion_site(parse_args(name, args)?).await,
            "extract_entities" => Ok(extract_entities(parse_args(name, args)?)),
            "tor_web_fetch" => self.tor_web_fetch(parse_args(name, args)?).await,
            "crypto_analysis" => crypto_analysis(parse_args(name, args)?),
            "onion_reputation" => self.onion_reputation(parse_args(name, args)?),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn dark_web_search(&self, args: SearchArgs) -> Result<Value, ToolError> {
        let config = AggregatorConfig {
            max_workers: args.threads.max(1),
            ..self.aggregator.clone()
        };
        let outcome = Aggregator::new(self.transport.clone(), config)
            .search(&args.query, &self.engines)
            .await;

        let total_found = outcome.results.len();
        let results: Vec<_> = outcome.results.into_iter().take(args.max_results).collect();
        Ok(json!({
            "success": true,
            "query": args.query,
            "count": results.len(),
            "total_found": total_found,
            "engines_queried": self.engines.len(),
            "failed_sources": outcome.failed_sources,
            "results": results,
        }))
    }

    async fn scrape_onion_site(&self, args: ScrapeArgs) -> Result<Value, ToolError> {
        if !args.url.contains(".onion") {
            return Err(ToolError::InvalidArguments {
                tool: "scrape_onion_site".to_string(),
                reason: "URL must be a .onion domain".to_string(),
            });
        }

        let config = RetrieverConfig {
            max_chars: args.max_chars.max(1),
            ..self.retriever.clone()
        };
        let page = Retriever::new(self.transport.clone(), config)
            .retrieve_one(&RetrievalTarget::new(&args.url, ""))
            .await;

        if !page.succeeded {
            return Ok(json!({
                "success": false,
                "url": page.url,
                "error": "Page could not be retrieved",
            }));
        }
        Ok(json!({
            "success": true,
            "url": page.url,
            "length": page.content.chars().count(),
            "truncated": page.content.ends_with(TRUNCATION_MARKER),
            "content": page.content,
        }))
    }

    async fn tor_web_fetch(&self, args: FetchArgs) -> Result<Value, ToolError> {
        let method = HttpMethod::from_str(&args.method)?;
        let mut request = FetchRequest::get(&args.url, Duration::from_secs(args.timeout.max(1))).with_method(method);
        for (name, value) in &args.headers {
            request = request.with_header(name, value);
        }

        let response = self.transport.fetch(request).await?;
        Ok(json!({
            "success": true,
            "url": args.url,
            "status_code": response.status,
            "content": truncate_chars(&response.body, FETCH_MAX_CHARS),
            "content_length": response.body.chars().count(),
            "headers": response.headers,
            "via_tor": true,
        }))
    }

    fn onion_reputation(&self, args: ReputationArgs) -> Result<Value, ToolError> {
        let reputation = self.store.onion_reputation(&args.domain)?;
        let mut result = to_object(&reputation);
        result.insert("success".to_string(), Value::Bool(true));
        Ok(Value::Object(result))
    }
}

fn extract_entities(args: ExtractArgs) -> Value {
    let extraction = extract_indicators(&args.text);
    let total = indicator_count(&extraction);
    let entities: BTreeMap<&str, Vec<&String>> = extraction
        .iter()
        .map(|(indicator_type, values)| (indicator_type.as_str(), values.iter().collect()))
        .collect();
    let types_found: Vec<&str> = extraction.keys().map(|t| t.as_str()).collect();

    json!({
        "success": true,
        "summary": format!("Found {} entities across {} types", total, types_found.len()),
        "total_count": total,
        "types_found": types_found,
        "entities": entities,
    })
}

fn crypto_analysis(args: CryptoArgs) -> Result<Value, ToolError> {
    let analysis = analyze_address(&args.address, args.chain);
    let mut result = to_object(&analysis);
    result.insert("success".to_string(), Value::Bool(true));
    Ok(Value::Object(result))
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

fn to_object<T: Serialize>(value: &T) -> serde_json::Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use robin_core::SearchEngine;
    use robin_memory::{NewInvestigation, NewSearchResult};

    fn dispatcher(transport: MockTransport, store: Arc<MemoryStore>) -> ToolDispatcher {
        let mut config = RobinConfig::default();
        config.sources = Some(vec![SearchEngine::new(
            "Alpha",
            "http://alphasearchabcdefgh.onion/?q={query}",
        )]);
        ToolDispatcher::new(Arc::new(transport), store, &config)
    }

    fn empty_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_specs_cover_every_tool() {
        let names: Vec<_> = tool_specs().iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "dark_web_search",
                "scrape_onion_site",
                "extract_entities",
                "tor_web_fetch",
                "crypto_analysis",
                "onion_reputation"
            ]
        );
        for spec in tool_specs() {
            assert_eq!(spec.parameters["type"], "object");
            assert!(spec.parameters["required"].as_array().is_some_and(|r| !r.is_empty()));
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_and_bad_arguments() {
        let tools = dispatcher(MockTransport::default(), empty_store());

        let result = tools.call("format_disk", json!({})).await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], "Unknown tool: format_disk");

        let err = tools.dispatch("extract_entities", json!({"txt": "x"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_search_limits_results() {
        let page = r#"<a href="http://aaaaaaaaaaaaaaaa.onion/">One</a>
                      <a href="http://bbbbbbbbbbbbbbbb.onion/">Two</a>
                      <a href="http://cccccccccccccccc.onion/">Three</a>"#;
        let transport = MockTransport::default().respond("http://alphasearchabcdefgh.onion/?q=leaked+data", 200, page);
        let tools = dispatcher(transport, empty_store());

        let result = tools
            .call("dark_web_search", json!({"query": "leaked data", "max_results": 2}))
            .await;

        assert_eq!(result["success"], true);
        assert_eq!(result["count"], 2);
        assert_eq!(result["total_found"], 3);
        assert_eq!(result["engines_queried"], 1);
        assert_eq!(result["results"][0]["title"], "One");
    }

    #[tokio::test]
    async fn test_scrape_requires_onion() {
        let tools = dispatcher(MockTransport::default(), empty_store());
        let result = tools.call("scrape_onion_site", json!({"url": "https://example.com/"})).await;
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains(".onion"));
    }

    #[tokio::test]
    async fn test_scrape_truncates() {
        let url = "http://pastebinabcdefghij.onion/raw/1";
        let body = format!("<html><body>{}</body></html>", "x".repeat(50));
        let tools = dispatcher(MockTransport::default().respond(url, 200, &body), empty_store());

        let result = tools
            .call("scrape_onion_site", json!({"url": url, "max_chars": 20}))
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["truncated"], true);
        assert_eq!(result["content"], format!("xxxxxx{}", TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_fetch_passes_method_and_headers() {
        let url = "https://check.torproject.org/";
        let transport = Arc::new(MockTransport::default().respond(url, 200, &"y".repeat(6000)));
        let tools = ToolDispatcher::new(transport.clone(), empty_store(), &RobinConfig::default());

        let result = tools
            .call(
                "tor_web_fetch",
                json!({"url": url, "method": "post", "headers": {"X-Trace": "1"}}),
            )
            .await;

        assert_eq!(result["success"], true);
        assert_eq!(result["status_code"], 200);
        assert_eq!(result["via_tor"], true);
        assert_eq!(result["content_length"], 6000);
        assert!(result["content"].as_str().unwrap().ends_with(TRUNCATION_MARKER));
        assert_eq!(result["headers"]["content-type"], "text/html");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].headers, vec![("X-Trace".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn test_fetch_rejects_other_methods() {
        let tools = dispatcher(MockTransport::default(), empty_store());
        let err = tools
            .dispatch("tor_web_fetch", json!({"url": "http://x.onion/", "method": "DELETE"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Transport(TorError::UnsupportedMethod(_))));
    }

    #[tokio::test]
    async fn test_extract_and_crypto() {
        let tools = dispatcher(MockTransport::default(), empty_store());

        let result = tools
            .call(
                "extract_entities",
                json!({"text": "mail ops@example.com about cve-2023-4863"}),
            )
            .await;
        assert_eq!(result["total_count"], 2);
        assert_eq!(result["entities"]["cve"][0], "CVE-2023-4863");
        assert_eq!(result["types_found"], json!(["email", "cve"]));

        let result = tools
            .call(
                "crypto_analysis",
                json!({"address": "0x52908400098527886E0F7030069857D2E4169EE7", "chain": "ethereum"}),
            )
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["valid"], true);
        assert_eq!(result["chain"], "ethereum");
    }

    #[tokio::test]
    async fn test_reputation_from_memory() {
        let store = empty_store();
        let domain = "abcdefghijklmnop.onion";
        for query in ["first look", "second look", "third look"] {
            let new = NewInvestigation {
                query: query.to_string(),
                ..Default::default()
            };
            store
                .save_run(&new, &[NewSearchResult::new("http://a.onion/", "A")], &[], &format!("see {}", domain))
                .unwrap();
        }
        let tools = dispatcher(MockTransport::default(), store);

        let result = tools
            .call("onion_reputation", json!({"domain": format!("http://{}/market", domain)}))
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["known"], true);
        assert_eq!(result["domain"], domain);
        assert_eq!(result["appearances"], 3);
        assert_eq!(result["reputation_score"], "medium");

        let result = tools.call("onion_reputation", json!({"domain": "zzzzzzzzzzzzzzzz.onion"})).await;
        assert_eq!(result["known"], false);
    }
}
