//! Proxy crawler module for harvesting candidates from listing sites
//!
//! This module provides functionality for:
//! - Fetching listing pages through a swappable [`PageFetcher`]
//! - Extracting candidates from each page
//! - Reporting every fetch outcome to the [`SourceRegistry`]
//! - Merging candidates from all sources into one deduplicated set

use crate::proxy::models::ProxySet;
use crate::proxy::parser::{CandidateExtractor, StrategyKind};
use crate::proxy::registry::{SourceRegistry, SourceStatus};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 12;

/// Default pause between two source fetches in milliseconds
const DEFAULT_PACING_MS: u64 = 300;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";

/// Why a listing page could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Fetches page bodies; failures are values, never panics
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> std::result::Result<String, FetchError>;
}

/// [`PageFetcher`] backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> std::result::Result<String, FetchError> {
        let request = async {
            let response = self.client.get(url).timeout(timeout).send().await?;
            let body = response.error_for_status()?.text().await?;
            Ok::<String, reqwest::Error>(body)
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) if e.is_timeout() => Err(FetchError::Timeout(timeout)),
            Ok(Err(e)) => match e.status() {
                Some(status) => Err(FetchError::Status(status.as_u16())),
                None => Err(FetchError::Transport(e.to_string())),
            },
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }
}

/// Configuration for proxy crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for each page fetch
    pub timeout: Duration,
    /// Pause between two consecutive source fetches
    pub pacing: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Proxy source representing a website that publishes proxy lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySource {
    /// Short display name
    pub name: String,
    /// URL to fetch proxies from; also the registry identifier
    pub url: String,
}

impl ProxySource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    /// Build a source from a bare URL, named after its host
    pub fn from_url(url: &str) -> Self {
        let name = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
            .unwrap_or_else(|| url.to_string());
        Self::new(&name, url)
    }

    pub fn id(&self) -> &str {
        &self.url
    }

    /// Parse a list of URLs, one per line; blank lines and `#` comments are skipped
    pub fn parse_list(content: &str) -> Vec<ProxySource> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ProxySource::from_url)
            .collect()
    }
}

/// What happened to a single source during a harvest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Source is dead and was not fetched
    Skipped,
    FetchFailed(FetchError),
    /// Page fetched but no strategy found a candidate
    Empty,
    Harvested {
        strategy: StrategyKind,
        found: usize,
        added: usize,
    },
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOutcome::Skipped => write!(f, "skipped (dead)"),
            SourceOutcome::FetchFailed(e) => write!(f, "fetch failed: {}", e),
            SourceOutcome::Empty => write!(f, "no candidates"),
            SourceOutcome::Harvested {
                strategy,
                found,
                added,
            } => write!(f, "{} candidates via {} ({} new)", found, strategy, added),
        }
    }
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: String,
    pub outcome: SourceOutcome,
    /// Registry standing after the outcome was recorded
    pub status: SourceStatus,
}

impl CrawlResult {
    /// Check if the source contributed candidates
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SourceOutcome::Harvested { .. })
    }
}

/// Candidates from one harvest together with per-source results
#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub candidates: ProxySet,
    pub results: Vec<CrawlResult>,
}

/// Proxy crawler that walks all active sources
pub struct ProxyCrawler<F = HttpFetcher> {
    config: CrawlerConfig,
    fetcher: F,
    extractor: CandidateExtractor,
}

impl ProxyCrawler<HttpFetcher> {
    /// Create a new proxy crawler with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(CrawlerConfig::default())
    }

    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.user_agent)?;
        Ok(Self::with_fetcher(config, fetcher))
    }

    /// Get a list of common free proxy sources
    pub fn get_common_sources() -> Vec<ProxySource> {
        vec![
            ProxySource::new("sslproxies", "https://www.sslproxies.org/"),
            ProxySource::new("free-proxy-list.net", "https://free-proxy-list.net/"),
            ProxySource::new("us-proxy.org", "https://www.us-proxy.org/"),
            ProxySource::new(
                "proxyscrape",
                "https://api.proxyscrape.com/?request=displayproxies&proxytype=https&timeout=5000&country=all&anonymity=all&ssl=yes",
            ),
        ]
    }
}

impl<F: PageFetcher> ProxyCrawler<F> {
    pub fn with_fetcher(config: CrawlerConfig, fetcher: F) -> Self {
        Self {
            config,
            fetcher,
            extractor: CandidateExtractor::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: CandidateExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Harvest candidates from every active source, in order.
    ///
    /// Fetch and extraction problems only count against the source. The
    /// only error returned is a failure to persist registry state.
    pub async fn harvest(
        &self,
        registry: &mut SourceRegistry,
        sources: &[ProxySource],
    ) -> Result<HarvestReport> {
        let mut report = HarvestReport::default();
        let mut fetched_any = false;

        for source in sources {
            let id = source.id();
            if !registry.is_active(id) {
                info!(source = %source.name, "skipping dead source");
                report.results.push(CrawlResult {
                    source: id.to_string(),
                    outcome: SourceOutcome::Skipped,
                    status: registry.status(id),
                });
                continue;
            }

            if fetched_any && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
            fetched_any = true;

            info!(source = %source.name, url = %source.url, "fetching source");
            let outcome = match self.fetcher.fetch(id, self.config.timeout).await {
                Err(e) => {
                    warn!(source = %source.name, error = %e, "source fetch failed");
                    registry.record_failure(id)?;
                    SourceOutcome::FetchFailed(e)
                }
                Ok(page) => {
                    let extraction = self.extractor.extract(&page, id);
                    match extraction.strategy {
                        None => {
                            warn!(source = %source.name, "no candidates on page");
                            registry.record_failure(id)?;
                            SourceOutcome::Empty
                        }
                        Some(strategy) => {
                            registry.record_success(id)?;
                            let found = extraction.records.len();
                            let before = report.candidates.len();
                            report.candidates.extend_absent(extraction.records);
                            let added = report.candidates.len() - before;
                            info!(source = %source.name, %strategy, found, added, "source harvested");
                            SourceOutcome::Harvested {
                                strategy,
                                found,
                                added,
                            }
                        }
                    }
                }
            };

            report.results.push(CrawlResult {
                source: id.to_string(),
                outcome,
                status: registry.status(id),
            });
        }

        debug!(total = report.candidates.len(), "harvest finished");
        Ok(report)
    }
}
