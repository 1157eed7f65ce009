//! Scripted completion gateway
//!
//! Replays a fixed sequence of replies and records every request it saw.
//! Used for deterministic replay of runs and throughout the test suite.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::Message;
use crate::llm::traits::{CompletionGateway, CompletionRequest, ProviderError};

/// One scripted reply
pub type ScriptedReply = Result<Message, ProviderError>;

/// A request observed by [`ScriptedGateway`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Names of the tools offered with the request
    pub tools: Vec<String>,
}

/// Gateway that answers from a queue of prepared replies
pub struct ScriptedGateway {
    name: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    /// Returned once the queue is empty
    fallback: Option<ScriptedReply>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    /// Replay the given assistant messages in order
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self::from_replies(replies.into_iter().map(Ok))
    }

    /// Replay the given replies (messages or errors) in order
    pub fn from_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            name: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer every request with the same message
    pub fn repeating(reply: Message) -> Self {
        Self::from_replies(Vec::new()).with_fallback(Ok(reply))
    }

    /// Reply used after the queue runs out
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Wait this long before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of completion calls received so far
    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_reply(&self) -> ScriptedReply {
        let queued = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match (queued, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => fallback.clone(),
            (None, None) => Err(ProviderError::fatal("scripted gateway has no replies left")),
        }
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                model: request.model.to_string(),
                messages: request.messages.to_vec(),
                tools: request
                    .tools
                    .iter()
                    .map(|t| t.function.name.clone())
                    .collect(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.next_reply()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
