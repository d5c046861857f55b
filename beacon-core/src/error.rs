//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Collector URL could not be built from the network configuration
    #[error("invalid collector URL: {0}")]
    InvalidCollectorUrl(String),

    /// Emitter settings may only change while the emitter is stopped
    #[error("not allowed while the emitter is running")]
    EmitterRunning,

    /// Custom retry rules only apply to failure status codes
    #[error("retry rules can only be set for status codes >= 300 (got {0})")]
    InvalidRetryRule(u16),
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;
