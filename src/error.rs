use std::path::PathBuf;

/// Errors raised while building, fetching, normalizing or persisting a report.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("warehouse request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("warehouse returned {status}: {message}")]
    Warehouse { status: u16, message: String },

    #[error("could not decode warehouse response: {0}")]
    Decode(String),

    #[error("column {column}: invalid date {value:?}")]
    InvalidDate { column: String, value: String },

    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("persist failed: {0}")]
    Persist(#[from] duckdb::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
