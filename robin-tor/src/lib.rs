//! Robin Tor Layer
//!
//! Provides Tor-based networking for dark web investigation:
//! - SOCKS5h proxy client (DNS resolution via Tor)
//! - Transport adapter with retry/backoff and user agent rotation
//! - Concurrent multi-source search aggregation
//! - Concurrent content retrieval with title fallback

pub mod proxy;
pub mod transport;
pub mod crawler;
pub mod retriever;

pub use proxy::*;
pub use transport::*;
pub use crawler::*;
pub use retriever::*;
