use thiserror::Error;

/// Top-level error type for the costlens workspace.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for CostlensError` (or the reverse) so that the `?`
/// operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CostlensError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for CostlensError {
    fn from(err: toml::de::Error) -> Self {
        CostlensError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CostlensError {
    fn from(err: toml::ser::Error) -> Self {
        CostlensError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CostlensError {
    fn from(err: serde_json::Error) -> Self {
        CostlensError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for costlens operations.
pub type Result<T> = std::result::Result<T, CostlensError>;
