use thiserror::Error;

/// Top-level error type for the NET Guide core and storage layers.
///
/// Orchestrator crates define their own error types and implement
/// `From<NetGuideError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NetGuideError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid session status: {0}")]
    InvalidStatus(String),
}

impl From<toml::de::Error> for NetGuideError {
    fn from(err: toml::de::Error) -> Self {
        NetGuideError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for NetGuideError {
    fn from(err: toml::ser::Error) -> Self {
        NetGuideError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for NetGuideError {
    fn from(err: serde_json::Error) -> Self {
        NetGuideError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for core and storage operations.
pub type Result<T> = std::result::Result<T, NetGuideError>;
