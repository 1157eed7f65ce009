//! Completion gateway contract
//!
//! The agent loop and the coordinator only ever talk to a model through
//! [`CompletionGateway`]. Providers are interchangeable implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Message, ToolDefinition};

/// Failure reported by a completion gateway
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{detail}")]
pub struct ProviderError {
    /// Whether a retry could plausibly succeed
    pub retryable: bool,
    /// Human-readable description
    pub detail: String,
}

impl ProviderError {
    /// Create a transient error
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            retryable: true,
            detail: detail.into(),
        }
    }

    /// Create a permanent error
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            retryable: false,
            detail: detail.into(),
        }
    }

    /// Error for a call that exceeded its time budget
    pub fn timeout(after: Duration) -> Self {
        Self::retryable(format!("completion timed out after {:?}", after))
    }
}

/// One completion call: the conversation so far plus the tools on offer
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Model identifier
    pub model: &'a str,
    /// Full conversation, system message first
    pub messages: &'a [Message],
    /// Tool schemas the model may call (empty = no tools)
    pub tools: &'a [ToolDefinition],
}

impl<'a> CompletionRequest<'a> {
    pub fn new(model: &'a str, messages: &'a [Message], tools: &'a [ToolDefinition]) -> Self {
        Self {
            model,
            messages,
            tools,
        }
    }
}

/// Suspension-capable completion gateway
///
/// Implementations must return an assistant message. Retrying transient
/// failures is the implementation's job; the caller treats any returned
/// error as final.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Send the conversation and receive the next assistant message
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message, ProviderError>;

    /// Get the provider name
    fn name(&self) -> &str;
}

#[async_trait]
impl<G: CompletionGateway + ?Sized> CompletionGateway for Arc<G> {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message, ProviderError> {
        (**self).complete(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Blocking completion gateway
///
/// For providers whose client occupies the calling thread. Wrap in
/// [`BlockingAdapter`] to drive it from the agent loop.
pub trait BlockingGateway: Send + Sync + 'static {
    fn complete_blocking(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Message, ProviderError>;

    fn name(&self) -> &str;
}

/// Runs a [`BlockingGateway`] on the blocking thread pool
pub struct BlockingAdapter<G> {
    inner: Arc<G>,
}

impl<G: BlockingGateway> BlockingAdapter<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<G: BlockingGateway> CompletionGateway for BlockingAdapter<G> {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message, ProviderError> {
        let inner = Arc::clone(&self.inner);
        let model = request.model.to_string();
        let messages = request.messages.to_vec();
        let tools = request.tools.to_vec();

        tokio::task::spawn_blocking(move || inner.complete_blocking(&model, &messages, &tools))
            .await
            .map_err(|e| ProviderError::fatal(format!("blocking gateway task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoGateway;

    impl BlockingGateway for EchoGateway {
        fn complete_blocking(
            &self,
            model: &str,
            messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<Message, ProviderError> {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            Ok(Message::assistant(format!("{}: {}", model, last)))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_blocking_adapter_runs_blocking_gateway() {
        let gateway = BlockingAdapter::new(EchoGateway);
        let messages = vec![Message::user("ping")];

        let reply = gateway
            .complete(CompletionRequest::new("m1", &messages, &[]))
            .await
            .unwrap();

        assert_eq!(reply.content, "m1: ping");
        assert_eq!(gateway.name(), "echo");
    }

    #[test]
    fn test_timeout_error_is_retryable() {
        let err = ProviderError::timeout(Duration::from_secs(3));
        assert!(err.retryable);
        assert!(err.to_string().contains("timed out"));
    }
}
