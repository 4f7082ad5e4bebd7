//! Proxy Curator - Harvester and Checker for Public Proxy Lists
//!
//! Collects proxy candidates from public listing pages, checks them against
//! a liveness endpoint and keeps a curated good/bad pool between runs.

pub mod curator;
pub mod error;
pub mod proxy;
pub mod store;

pub use curator::{Curator, RunSummary};
pub use error::Error;
pub use proxy::*;
pub use store::StateStore;

use std::path::PathBuf;

/// Application result type
pub type Result<T> = std::result::Result<T, Error>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the state documents
    pub state_dir: PathBuf,
    pub crawler: CrawlerConfig,
    pub checker: CheckerConfig,
    pub policy: PoolPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            crawler: CrawlerConfig::default(),
            checker: CheckerConfig::default(),
            policy: PoolPolicy::default(),
        }
    }
}

impl Config {
    /// Reject settings that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.checker.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.checker.timeout.is_zero() || self.crawler.timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        reqwest::Url::parse(&self.checker.test_url)
            .map_err(|e| Error::Config(format!("invalid test url {}: {}", self.checker.test_url, e)))?;
        Ok(())
    }
}
