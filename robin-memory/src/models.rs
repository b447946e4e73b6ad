//! Records stored in and returned by the investigation memory

use chrono::{DateTime, Utc};
use robin_core::IndicatorType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fields of an investigation about to be saved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewInvestigation {
    pub query: String,
    pub refined_query: Option<String>,
    pub model: String,
    pub summary: String,
    pub summary_file: Option<String>,
    pub result_count: u32,
    pub filtered_count: u32,
    pub capture_count: u32,
    pub duration_seconds: f64,
    pub session_id: Option<String>,
}

/// A saved investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    pub id: i64,
    pub query: String,
    #[serde(default)]
    pub refined_query: Option<String>,
    #[serde(default)]
    pub model: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub summary_file: Option<String>,
    #[serde(default)]
    pub result_count: u32,
    #[serde(default)]
    pub filtered_count: u32,
    #[serde(default)]
    pub capture_count: u32,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// A discovered link about to be saved under an investigation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSearchResult {
    pub url: String,
    pub title: String,
    pub was_scraped: bool,
    pub relevance_score: Option<f64>,
}

impl NewSearchResult {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }
}

/// A saved search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultRecord {
    pub id: i64,
    pub investigation_id: i64,
    pub url: String,
    pub title: String,
    pub was_filtered: bool,
    pub was_scraped: bool,
    pub relevance_score: Option<f64>,
}

/// A tracked indicator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub id: i64,
    pub entity_type: IndicatorType,
    pub value: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frequency: i64,
}

/// Short reference to an investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationRef {
    pub id: i64,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub summary_file: Option<String>,
}

/// An entity together with the investigations that saw it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub entity: Entity,
    pub investigations: Vec<InvestigationRef>,
}

/// A past investigation scored against a new query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarInvestigation {
    pub investigation: Investigation,
    /// Number of shared keywords
    pub score: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub count: i64,
}

/// Aggregate snapshot of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_investigations: i64,
    pub total_entities: i64,
    pub entity_breakdown: BTreeMap<String, i64>,
    pub top_models: Vec<ModelUsage>,
    pub total_captures: i64,
    /// Mean result count over investigations with results, one decimal
    pub avg_results: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub investigation_count: i64,
}

/// Context assembled for a new query from memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub similar_investigations: Vec<SimilarInvestigation>,
    pub related_entities: Vec<EntityMatch>,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.similar_investigations.is_empty() && self.related_entities.is_empty()
    }

    /// Plain-text rendering for inclusion in a prompt
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();
        if !self.similar_investigations.is_empty() {
            out.push_str("Previous related investigations:\n");
            for similar in &self.similar_investigations {
                let inv = &similar.investigation;
                out.push_str(&format!(
                    "- \"{}\" ({})\n",
                    inv.query,
                    inv.created_at.format("%Y-%m-%d")
                ));
            }
        }
        if !self.related_entities.is_empty() {
            out.push_str("Known indicators in this query:\n");
            for found in &self.related_entities {
                out.push_str(&format!(
                    "- {} {} (seen {} times)\n",
                    found.entity.entity_type, found.entity.value, found.entity.frequency
                ));
            }
        }
        out
    }
}

/// Reputation band derived from how many investigations saw a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationScore {
    Low,
    Medium,
    High,
}

impl ReputationScore {
    pub fn from_appearances(appearances: i64) -> Self {
        if appearances > 5 {
            ReputationScore::High
        } else if appearances > 2 {
            ReputationScore::Medium
        } else {
            ReputationScore::Low
        }
    }
}

/// Historical context for an onion domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnionReputation {
    pub domain: String,
    pub known: bool,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Investigations that recorded this domain
    pub appearances: i64,
    /// Most recent related investigations
    pub related_investigations: Vec<InvestigationRef>,
    pub reputation_score: Option<ReputationScore>,
}
