//! Error types for toolrun operations

/// Result type for toolrun operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error types for the toolrun runtime
///
/// Tool-level failures are never reported through this type; the executor
/// normalizes them into an [`ExecutionResult`](crate::tools::ExecutionResult).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Orchestration plan could not be executed
    #[error(transparent)]
    Orchestration(#[from] crate::orchestration::OrchestrationError),

    /// Upstream tool call could not be normalized
    #[error(transparent)]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML document error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for RuntimeError {
    fn from(s: String) -> Self {
        RuntimeError::Other(s)
    }
}

impl From<&str> for RuntimeError {
    fn from(s: &str) -> Self {
        RuntimeError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for RuntimeError {
    fn from(err: anyhow::Error) -> Self {
        RuntimeError::Other(err.to_string())
    }
}

impl From<figment::Error> for RuntimeError {
    fn from(err: figment::Error) -> Self {
        RuntimeError::Configuration(err.to_string())
    }
}
