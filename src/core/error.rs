//! Custom error types for agentflow
//!
//! Control-plane errors surface here. Tool failures never do: the registry
//! turns them into tool-result messages instead.

use thiserror::Error;

use crate::llm::ProviderError;
use crate::tools::ToolError;

/// Main error type for agentflow operations
#[derive(Error, Debug)]
pub enum AgentflowError {
    /// Completion gateway failure that exhausted the gateway's retry policy
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Tool registration errors
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Invalid agent or coordinator construction
    #[error("Invalid specification: {0}")]
    InvalidSpec(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for agentflow operations
pub type Result<T> = std::result::Result<T, AgentflowError>;

impl AgentflowError {
    /// Create an invalid specification error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an error with additional context
    pub fn with_context<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(error),
        }
    }
}
