//! Intelligence summary generation
//!
//! Synthesizes a markdown report from retrieved content and extracted
//! indicators.

use tracing::info;

use robin_core::{indicator_pairs, Extraction};
use robin_tor::RetrievedPage;

use crate::{LlmError, SharedBackend};

/// System prompt for intelligence analysis
const ANALYST_SYSTEM_PROMPT: &str = r#"
You are a Cybercrime Threat Intelligence Expert tasked with generating investigative insights from dark web OSINT data.

Rules:
1. Analyze the provided dark web data (URLs, content, artifacts)
2. Output source links referenced for analysis
3. Provide detailed, evidence-based technical analysis
4. List intelligence artifacts with context (emails, crypto addresses, domains, threat actors, malware, TTPs)
5. Generate 3-5 key insights that are specific, actionable, and data-driven
6. Include suggested next steps for further investigation
7. Be objective and analytical
8. Ignore NSFW content

Output Format:
# Investigation Summary

## Input Query
{query}

## Source Links Referenced
- [list sources]

## Intelligence Artifacts
- [categorized artifacts with context]

## Key Insights
1. [insight with evidence]
2. [insight with evidence]
...

## Next Steps
- [recommended actions]
- [follow-up queries]

INPUT DATA:
"#;

const MAX_PAGES: usize = 10;
const MAX_INDICATORS: usize = 50;

/// Build the analyst input from pages and indicators
pub fn build_summary_input(pages: &[RetrievedPage], indicators: &Extraction) -> String {
    let mut input = String::from("## Retrieved Content\n\n");
    for page in pages.iter().take(MAX_PAGES) {
        let marker = if page.succeeded { "" } else { " (title only)" };
        input.push_str(&format!("### {}{}\n{}\n\n", page.url, marker, page.content));
    }

    input.push_str("## Extracted Artifacts\n\n");
    for (indicator_type, value) in indicator_pairs(indicators).take(MAX_INDICATORS) {
        input.push_str(&format!("- {}: {}\n", indicator_type, value));
    }
    input
}

/// Generate an investigation summary
pub async fn generate_summary(
    backend: &SharedBackend,
    query: &str,
    pages: &[RetrievedPage],
    indicators: &Extraction,
) -> Result<String, LlmError> {
    let system = ANALYST_SYSTEM_PROMPT.replace("{query}", query);
    let input = build_summary_input(pages, indicators);

    let summary = backend.generate(&system, &input).await?;
    if summary.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }

    info!("Generated summary from {} pages", pages.len().min(MAX_PAGES));
    Ok(summary)
}
