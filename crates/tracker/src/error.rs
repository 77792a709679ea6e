#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("history error: {0}")]
    History(#[from] history::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to fetch server list: {0}")]
    Feed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid server address: {0:?}")]
    InvalidAddress(String),
}
