//! Error types for pagecache.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid cache rule for prefix {prefix:?}: {reason}")]
    InvalidRule { prefix: String, reason: String },

    #[error("Invalid key namespace {0:?}")]
    InvalidNamespace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Store errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether the error came from the key-value store rather than from configuration.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::Store(_) | Error::Io(_)
        )
    }
}
