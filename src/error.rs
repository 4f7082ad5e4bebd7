//! Library error type

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can abort a run.
///
/// Network failures while harvesting or probing are not errors: they are
/// carried as values (`FetchError`, `CheckStatus`) and only influence the
/// registry and the pool. What remains here are the failures that would
/// leave the persisted state inconsistent.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("state flush did not complete: {0}")]
    Flush(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}
