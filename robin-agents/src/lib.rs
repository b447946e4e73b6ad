//! Robin Agents
//!
//! LLM-facing stages of an investigation:
//! - **Backends**: OpenAI, OpenRouter, local OpenAI-compatible servers, Anthropic
//! - **Selector**: Ranks search results by relevance, with degraded fallbacks
//! - **Refiner**: Optimizes search queries for dark web engines
//! - **Analyst**: Synthesizes intelligence summaries

pub mod backend;
pub mod filter;
pub mod refiner;
pub mod analyst;

pub use backend::*;
pub use filter::*;
pub use refiner::*;
pub use analyst::*;
