//! Error types for catchlog-core

use thiserror::Error;

/// Main error type for the catchlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The queue could not persist a change
    #[error("storage error: {0}")]
    Storage(String),

    /// No queued mutation has this local id
    #[error("mutation not found: {0}")]
    MutationNotFound(String),

    /// Catch API client error (construction, not submission outcomes)
    #[error("catch API error: {0}")]
    Api(String),
}

/// Result type alias for catchlog-core
pub type Result<T> = std::result::Result<T, Error>;
