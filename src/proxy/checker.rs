//! Proxy checker module for checking proxy validity

use crate::proxy::models::{CheckStatus, ProxyCheckResult, ProxyRecord};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 6;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 10;

/// Default URL to test proxies against; it echoes the caller's address
const DEFAULT_TEST_URL: &str = "https://httpbin.org/ip";

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each proxy check
    pub timeout: Duration,
    /// Number of concurrent checks
    pub concurrency: usize,
    /// URL to test proxies against
    pub test_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }
}

/// Something that can tell whether a proxy forwards traffic.
///
/// Implementations report every network failure through the returned
/// [`ProxyCheckResult`]; they never error out.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, record: &ProxyRecord, timeout: Duration) -> ProxyCheckResult;
}

/// Probe a batch with at most `concurrency` checks in flight.
///
/// Results come back in batch order, whatever order the checks finish in.
pub async fn check_all<P>(
    probe: &P,
    records: Vec<ProxyRecord>,
    timeout: Duration,
    concurrency: usize,
) -> Vec<ProxyCheckResult>
where
    P: ProxyProbe + ?Sized,
{
    let total = records.len();
    stream::iter(records)
        .map(|record| async move { probe.probe(&record, timeout).await })
        .buffered(concurrency.max(1))
        .enumerate()
        .map(|(i, result)| {
            debug!(
                "[{}/{}] {} -> {}",
                i + 1,
                total,
                result.record.to_simple_string(),
                result.diagnostic()
            );
            result
        })
        .collect()
        .await
}

/// Proxy checker that routes a GET to the liveness endpoint through the proxy
#[derive(Debug, Clone, Default)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check a single proxy with the configured timeout
    pub async fn check_proxy(&self, record: &ProxyRecord) -> ProxyCheckResult {
        self.probe(record, self.config.timeout).await
    }

    /// Usable flag plus diagnostic for a single proxy
    pub async fn validate(&self, record: &ProxyRecord, timeout: Duration) -> (bool, String) {
        let result = self.probe(record, timeout).await;
        (result.is_working(), result.diagnostic())
    }

    /// Create a reqwest client that sends everything through the proxy
    fn create_client(&self, record: &ProxyRecord, timeout: Duration) -> Result<Client> {
        let client = Client::builder()
            .proxy(ReqwestProxy::all(record.url())?)
            .timeout(timeout)
            .build()?;

        Ok(client)
    }

    async fn fetch_through(&self, client: &Client) -> std::result::Result<(StatusCode, String), reqwest::Error> {
        let response = client.get(&self.config.test_url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl ProxyProbe for ProxyChecker {
    async fn probe(&self, record: &ProxyRecord, timeout: Duration) -> ProxyCheckResult {
        let client = match self.create_client(record, timeout) {
            Ok(client) => client,
            Err(e) => return ProxyCheckResult::failed(record.clone(), CheckStatus::Failed(e.to_string())),
        };

        let start = Instant::now();
        let timed_out = CheckStatus::Timeout {
            after_ms: timeout.as_millis() as u64,
        };

        match tokio::time::timeout(timeout, self.fetch_through(&client)).await {
            Ok(Ok((status, body))) if status == StatusCode::OK => {
                let elapsed = start.elapsed().as_millis() as u64;
                ProxyCheckResult::working(record.clone(), elapsed, body)
            }
            Ok(Ok((status, _))) => {
                ProxyCheckResult::failed(record.clone(), CheckStatus::BadStatus(status.as_u16()))
            }
            Ok(Err(e)) if e.is_timeout() => ProxyCheckResult::failed(record.clone(), timed_out),
            Ok(Err(e)) => ProxyCheckResult::failed(record.clone(), classify(&e)),
            Err(_) => ProxyCheckResult::failed(record.clone(), timed_out),
        }
    }
}

/// reqwest's messages when the proxy answers CONNECT with anything but 200
const TUNNEL_AUTH_REQUIRED: &str = "proxy authentication required";
const TUNNEL_UNSUCCESSFUL: &str = "unsuccessful tunnel";

/// Map a transport error onto refused, tunnel rejection or everything else
fn classify(error: &reqwest::Error) -> CheckStatus {
    let detail = error_chain(error);
    let mut refused = false;
    let mut tunnel = None;

    let mut source: Option<&(dyn StdError + 'static)> = Some(error as &(dyn StdError + 'static));
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                refused = true;
            }
        }
        let text = err.to_string();
        if text.contains(TUNNEL_AUTH_REQUIRED) {
            tunnel = Some(Some(407));
        } else if text.contains(TUNNEL_UNSUCCESSFUL) && tunnel.is_none() {
            tunnel = Some(None);
        }
        source = err.source();
    }

    if let Some(status) = tunnel {
        CheckStatus::TunnelRejected { status }
    } else if refused || detail.to_lowercase().contains("connection refused") {
        CheckStatus::Refused(detail)
    } else {
        CheckStatus::Failed(detail)
    }
}

fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source {
        let text = err.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = err.source();
    }
    parts.join(": ")
}
