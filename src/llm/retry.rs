//! Retry policy for completion gateways
//!
//! The agent loop never retries a provider call itself. Wrapping a gateway in
//! [`RetryingGateway`] is how a deployment opts into retries.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::core::config::RetryConfig;
use crate::core::Message;
use crate::llm::traits::{CompletionGateway, CompletionRequest, ProviderError};

/// Exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (0-based), jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let jitter_ms = (backoff.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return backoff;
        }
        let jitter = rand::rng().random_range(0..=jitter_ms);
        (backoff + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Gateway wrapper that retries retryable provider errors
pub struct RetryingGateway<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: CompletionGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<G: CompletionGateway> CompletionGateway for RetryingGateway<G> {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request).await {
                Ok(message) => return Ok(message),
                Err(e) if e.retryable && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        ?delay,
                        "Retrying completion: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGateway;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let scripted = ScriptedGateway::from_replies(vec![
            Err(ProviderError::retryable("busy")),
            Err(ProviderError::retryable("busy")),
            Ok(Message::assistant("done")),
        ]);
        let gateway = RetryingGateway::new(scripted, fast_policy(2));
        let messages = vec![Message::user("x")];

        let reply = gateway
            .complete(CompletionRequest::new("m", &messages, &[]))
            .await
            .unwrap();
        assert_eq!(reply.content, "done");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let scripted = ScriptedGateway::from_replies(vec![])
            .with_fallback(Err(ProviderError::retryable("still busy")));
        let gateway = RetryingGateway::new(scripted, fast_policy(1));
        let messages = vec![Message::user("x")];

        let err = gateway
            .complete(CompletionRequest::new("m", &messages, &[]))
            .await
            .unwrap_err();
        assert_eq!(err.detail, "still busy");
        assert_eq!(gateway.inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let scripted = ScriptedGateway::from_replies(vec![
            Err(ProviderError::fatal("bad key")),
            Ok(Message::assistant("unreachable")),
        ]);
        let gateway = RetryingGateway::new(scripted, fast_policy(3));
        let messages = vec![Message::user("x")];

        let err = gateway
            .complete(CompletionRequest::new("m", &messages, &[]))
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert_eq!(gateway.inner.calls(), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert!(policy.delay_for(0) >= Duration::from_millis(100));
        assert!(policy.delay_for(8) <= Duration::from_millis(300));
    }
}
