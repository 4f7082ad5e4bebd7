//! Proxy module for harvesting, checking and curating proxies
//!
//! This module provides functionality for:
//! - Tracking which listing sources still work (registry)
//! - Extracting proxy candidates from listing pages (parser)
//! - Crawling every active source into one candidate set (crawler)
//! - Checking proxy validity with bounded concurrency (checker)
//! - Reconciling results with the previous good/bad pool (pool)

pub mod checker;
pub mod crawler;
pub mod models;
pub mod parser;
pub mod pool;
pub mod registry;

pub use checker::{check_all, CheckerConfig, ProxyChecker, ProxyProbe};
pub use crawler::{
    CrawlResult, CrawlerConfig, FetchError, HarvestReport, HttpFetcher, PageFetcher, ProxyCrawler,
    ProxySource, SourceOutcome,
};
pub use models::{CheckStatus, ProxyCheckResult, ProxyKey, ProxyRecord, ProxySet, TlsSupport};
pub use parser::{CandidateExtractor, ExtractionStrategy, StrategyKind, TableLayout};
pub use pool::{PoolManager, PoolPolicy, PoolSnapshot};
pub use registry::{SourceRegistry, SourceStatus, SOURCE_FAIL_THRESHOLD};
