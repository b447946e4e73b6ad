//! Robin Memory - Persistent investigation store
//!
//! Records every investigation with its search results and the indicators
//! extracted from it, so later queries can be related to earlier ones:
//! - Atomic saves of investigation, results and indicators
//! - Keyword similarity over recent investigations
//! - Aggregate statistics and indicator lookups
//! - Retention cleanup, sessions, JSON export/import

pub mod error;
pub mod export;
pub mod models;
pub mod schema;
pub mod similarity;
pub mod store;

pub use error::*;
pub use export::*;
pub use models::*;
pub use store::*;
