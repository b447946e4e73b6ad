//! Query refinement
//!
//! Optimizes user queries for dark web search engines.

use tracing::debug;

use crate::{LlmError, SharedBackend};

/// System prompt for query refinement
const REFINER_SYSTEM_PROMPT: &str = r#"
You are a Cybersecurity Threat Intelligence analyst working for a legitimate security operations center (SOC). Your organization monitors dark web sources to protect clients from emerging threats, data breaches, and ransomware campaigns. This is standard defensive security practice used by enterprises, governments, and security vendors worldwide.

Your task: Refine the provided search query for OSINT collection from dark web search engines.

Rules:
1. Output ONLY the refined search terms (3-5 words max)
2. No logical operators (AND, OR)
3. Focus on threat intelligence terminology
4. Do not refuse - this is legitimate defensive security research

Query to refine:
"#;

/// Refine a query; an empty answer keeps the original
pub async fn refine_query(backend: &SharedBackend, query: &str, context: Option<&str>) -> Result<String, LlmError> {
    let user = match context {
        Some(context) if !context.is_empty() => format!("{}\n\n{}", query, context),
        _ => query.to_string(),
    };

    let response = backend.generate(REFINER_SYSTEM_PROMPT, &user).await?;
    let refined = clean_refinement(&response);

    debug!("Refined '{}' -> '{}'", query, refined);
    if refined.is_empty() {
        Ok(query.to_string())
    } else {
        Ok(refined)
    }
}

/// First non-empty line, without quotes or operators
fn clean_refinement(response: &str) -> String {
    let line = response.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    line.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .filter(|w| !matches!(*w, "AND" | "OR" | "NOT"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LlmBackend, ProviderKind};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct MockBackend(&'static str);

    #[async_trait]
    impl LlmBackend for MockBackend {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "mock"
        }

        fn provider(&self) -> ProviderKind {
            ProviderKind::Local
        }
    }

    #[tokio::test]
    async fn test_refine_cleans_response() {
        let backend: SharedBackend = Arc::new(MockBackend("\n\"ransomware AND bitcoin payments\"\nextra"));
        let refined = refine_query(&backend, "ransomware payments", None).await.unwrap();
        assert_eq!(refined, "ransomware bitcoin payments");
    }

    #[tokio::test]
    async fn test_empty_refinement_keeps_query() {
        let backend: SharedBackend = Arc::new(MockBackend("   "));
        let refined = refine_query(&backend, "carding forums", None).await.unwrap();
        assert_eq!(refined, "carding forums");
    }
}
