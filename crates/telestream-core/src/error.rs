//! Error types for telestream core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using telestream Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for telestream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A config file could not be parsed
    #[error("Failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A config file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
