//! Tor SOCKS5h proxy client
//!
//! Creates HTTP clients that route every request through Tor. There is no
//! direct-connection fallback: if the proxy is down, requests fail.

use reqwest::{Client, Proxy, Url};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Tor proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// SOCKS5 proxy address (default: socks5h://127.0.0.1:9050)
    pub socks_addr: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum retries per request on transient failures
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: "socks5h://127.0.0.1:9050".to_string(),
            timeout_secs: 45,
            max_retries: 3,
            backoff_base_ms: 500,
        }
    }
}

impl TorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Errors from Tor networking
#[derive(Debug, Error)]
pub enum TorError {
    #[error("Failed to build Tor client: {0}")]
    ClientBuild(String),

    #[error("Tor proxy unreachable: {0}")]
    ProxyUnreachable(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Max retries ({retries}) exceeded: {last}")]
    MaxRetries { retries: u32, last: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(String),
}

impl TorError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TorError::Connection(_) | TorError::Timeout(_))
    }
}

impl From<reqwest::Error> for TorError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();

        if err.is_timeout() {
            return TorError::Timeout(message);
        }

        match io_error_kind(&err) {
            Some(io::ErrorKind::ConnectionRefused) if err.is_connect() => {
                TorError::ProxyUnreachable(message)
            }
            Some(io::ErrorKind::TimedOut) => TorError::Timeout(message),
            Some(
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof,
            ) => TorError::Connection(message),
            _ if err.is_connect() => TorError::Connection(message),
            _ if err.is_builder() => TorError::InvalidUrl(message),
            _ => TorError::Request(message),
        }
    }
}

/// Walk an error's source chain looking for an I/O error
fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

/// User agents for identity rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (X11; Linux i686; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_7_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.3 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36 Edg/135.0.3179.54",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36 Edg/135.0.3179.54",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create a Tor-enabled HTTP client
pub fn create_tor_client(config: &TorConfig) -> Result<Client, TorError> {
    let proxy = Proxy::all(&config.socks_addr)
        .map_err(|e| TorError::ClientBuild(e.to_string()))?;

    // Drop system proxies so nothing can bypass Tor
    Client::builder()
        .no_proxy()
        .proxy(proxy)
        .timeout(config.timeout())
        .danger_accept_invalid_certs(true) // Many .onion sites have self-signed certs
        .build()
        .map_err(|e| TorError::ClientBuild(e.to_string()))
}

/// How long the proxy has to accept a TCP connection
const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Host and port of the configured SOCKS proxy
fn proxy_endpoint(socks_addr: &str) -> Result<(String, u16), TorError> {
    let url = Url::parse(socks_addr).map_err(|e| TorError::ClientBuild(format!("{}: {}", socks_addr, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| TorError::ClientBuild(format!("{}: no proxy host", socks_addr)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    Ok((host, url.port().unwrap_or(1080)))
}

/// Fail unless something accepts TCP connections at the proxy address.
///
/// reqwest reports SOCKS handshake failures as plain strings, so a dead
/// proxy is indistinguishable from a dropped onion circuit without this.
pub async fn check_proxy_reachable(config: &TorConfig) -> Result<(), TorError> {
    let (host, port) = proxy_endpoint(&config.socks_addr)?;
    let connect = tokio::net::TcpStream::connect((host.as_str(), port));
    match tokio::time::timeout(PROXY_CONNECT_TIMEOUT, connect).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(TorError::ProxyUnreachable(format!("{}: {}", config.socks_addr, e))),
        Err(_) => Err(TorError::ProxyUnreachable(format!(
            "{}: no answer within {:?}",
            config.socks_addr, PROXY_CONNECT_TIMEOUT
        ))),
    }
}

/// Check if Tor proxy is reachable
pub async fn check_tor_connection(config: &TorConfig) -> Result<bool, TorError> {
    check_proxy_reachable(config).await?;
    let client = create_tor_client(config)?;

    // Tor Project's onion service
    let result = client
        .get("http://2gzyxa5ihm7nsggfxnu52rck2vv4rvmdlkiu3ber7fzs2xqxczfebsid.onion/")
        .header(reqwest::header::USER_AGENT, random_user_agent())
        .send()
        .await;

    match result {
        Ok(resp) => Ok(resp.status().is_success() || resp.status().is_redirection()),
        Err(e) => match TorError::from(e) {
            err @ TorError::ProxyUnreachable(_) => Err(err),
            _ => Ok(false),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TorConfig::default();
        assert!(config.socks_addr.starts_with("socks5h://"));
        assert!(config.socks_addr.contains("9050"));
        assert_eq!(config.timeout_secs, 45);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_random_user_agent() {
        let ua = random_user_agent();
        assert!(ua.contains("Mozilla"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TorError::Timeout("x".into()).is_transient());
        assert!(TorError::Connection("reset".into()).is_transient());
        assert!(!TorError::ProxyUnreachable("refused".into()).is_transient());
        assert!(!TorError::InvalidUrl("bad".into()).is_transient());
    }

    #[test]
    fn test_client_builds() {
        assert!(create_tor_client(&TorConfig::default()).is_ok());
    }

    /// Proxy config pointing at a local port nothing listens on
    pub(crate) fn closed_proxy_config() -> TorConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        TorConfig {
            socks_addr: format!("socks5h://127.0.0.1:{}", port),
            max_retries: 3,
            backoff_base_ms: 2000,
            ..Default::default()
        }
    }

    #[test]
    fn test_proxy_endpoint() {
        assert_eq!(
            proxy_endpoint("socks5h://127.0.0.1:9050").unwrap(),
            ("127.0.0.1".to_string(), 9050)
        );
        assert_eq!(proxy_endpoint("socks5h://[::1]:9150").unwrap(), ("::1".to_string(), 9150));
        assert!(matches!(proxy_endpoint("not a proxy"), Err(TorError::ClientBuild(_))));
    }

    #[tokio::test]
    async fn test_listening_proxy_is_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TorConfig {
            socks_addr: format!("socks5h://{}", listener.local_addr().unwrap()),
            ..Default::default()
        };
        assert!(check_proxy_reachable(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_dead_proxy_is_an_error() {
        let config = closed_proxy_config();
        assert!(matches!(check_proxy_reachable(&config).await, Err(TorError::ProxyUnreachable(_))));
        assert!(matches!(
            check_tor_connection(&config).await,
            Err(TorError::ProxyUnreachable(_))
        ));
    }
}
