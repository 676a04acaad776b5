//! Crawler error types
//!
//! Only session-fatal problems are errors. A failed visit is data and lives in
//! its `PageVisitResult`.

use std::path::PathBuf;
use thiserror::Error;

use browser::ContextError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{failed} of {total} report sinks failed")]
    Partial { failed: usize, total: usize },
}

/// Errors that end a whole run
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not open browsing context: {0}")]
    Context(#[source] ContextError),

    #[error("Session bootstrap failed: {0}")]
    Bootstrap(#[source] ContextError),

    #[error("Report sink failed: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
