//! Transport adapter
//!
//! A single `fetch` entry point over the Tor client with a bounded retry
//! budget and exponential backoff. Each request presents a user agent drawn
//! from the rotation pool. Non-2xx responses are returned, not retried.

use async_trait::async_trait;
use reqwest::{header::USER_AGENT, Client, Method, Url};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{create_tor_client, check_proxy_reachable, random_user_agent, TorConfig, TorError};

/// HTTP methods supported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    fn as_reqwest(&self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = TorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(TorError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// A request handed to the transport
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            method: HttpMethod::Get,
            timeout,
            headers: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// A response from the transport (any status)
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Anything that can fetch a URL through the anonymizing proxy
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TorError>;
}

/// Thread-safe reference to a transport
pub type SharedTransport = Arc<dyn Transport>;

/// Retry budget with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &TorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(10))
    }
}

/// Run `op`, retrying transient failures up to the policy's budget
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, TorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TorError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                warn!("Giving up on {} after {} retries: {}", label, attempt, e);
                return Err(TorError::MaxRetries {
                    retries: policy.max_retries,
                    last: e.to_string(),
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                debug!("Retrying {} in {:?} ({})", label, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Transport that routes every request through Tor
pub struct TorTransport {
    client: Client,
    policy: RetryPolicy,
    config: TorConfig,
}

impl TorTransport {
    pub fn new(config: &TorConfig) -> Result<Self, TorError> {
        Ok(Self {
            client: create_tor_client(config)?,
            policy: RetryPolicy::from_config(config),
            config: config.clone(),
        })
    }

    pub fn shared(config: &TorConfig) -> Result<SharedTransport, TorError> {
        Ok(Arc::new(Self::new(config)?))
    }

    async fn send_once(&self, url: &Url, request: &FetchRequest) -> Result<FetchResponse, TorError> {
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), url.clone())
            .timeout(request.timeout);

        let has_user_agent = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"));
        if !has_user_agent {
            builder = builder.header(USER_AGENT, random_user_agent());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                // A dead proxy is not worth retrying
                if e.is_connect() {
                    check_proxy_reachable(&self.config).await?;
                }
                return Err(e.into());
            }
        };
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.text().await?;

        Ok(FetchResponse {
            status,
            body,
            headers,
        })
    }
}

#[async_trait]
impl Transport for TorTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TorError> {
        let url = Url::parse(&request.url)
            .map_err(|e| TorError::InvalidUrl(format!("{}: {}", request.url, e)))?;

        debug!("{} {}", request.method, url);

        let url = &url;
        let request = &request;
        with_retries(self.policy, url.as_str(), || self.send_once(url, request)).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// What a mocked URL does when fetched
    #[derive(Clone)]
    pub enum MockRoute {
        Respond { status: u16, body: String, delay: Duration },
        Timeout,
    }

    /// In-memory transport keyed by exact URL
    #[derive(Default)]
    pub struct MockTransport {
        routes: HashMap<String, MockRoute>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn respond(mut self, url: &str, status: u16, body: &str) -> Self {
            self.routes.insert(
                url.to_string(),
                MockRoute::Respond {
                    status,
                    body: body.to_string(),
                    delay: Duration::ZERO,
                },
            );
            self
        }

        pub fn respond_after(mut self, url: &str, body: &str, delay: Duration) -> Self {
            self.routes.insert(
                url.to_string(),
                MockRoute::Respond {
                    status: 200,
                    body: body.to_string(),
                    delay,
                },
            );
            self
        }

        pub fn time_out(mut self, url: &str) -> Self {
            self.routes.insert(url.to_string(), MockRoute::Timeout);
            self
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TorError> {
            self.calls.lock().unwrap().push(request.url.clone());
            match self.routes.get(&request.url).cloned() {
                Some(MockRoute::Respond { status, body, delay }) => {
                    tokio::time::sleep(delay).await;
                    Ok(FetchResponse {
                        status,
                        body,
                        headers: BTreeMap::new(),
                    })
                }
                Some(MockRoute::Timeout) => Err(TorError::Timeout(request.url)),
                None => Err(TorError::Connection(format!("no route for {}", request.url))),
            }
        }
    }
}
