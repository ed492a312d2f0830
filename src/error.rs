//! Crate-wide error types.

use thiserror::Error;

pub type ReportResult<T> = Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("stat error: {0}")]
    Stat(String),
}
