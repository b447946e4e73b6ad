//! Robin Core - Indicator model and source registry for dark web OSINT
//!
//! This crate provides the foundational primitives:
//! - Pattern-based indicator (IOC) extraction
//! - Search engine registry
//! - Cryptocurrency address classification

pub mod artifacts;
pub mod crypto;
pub mod search_engines;

pub use artifacts::*;
pub use crypto::*;
pub use search_engines::*;
