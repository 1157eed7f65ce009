//! LLM module - completion gateway abstraction and adapters
//!
//! The agent loop depends only on [`CompletionGateway`]. Ollama is the bundled
//! HTTP adapter; [`ScriptedGateway`] replays prepared replies.

pub mod ollama;
pub mod retry;
pub mod scripted;
pub mod traits;

pub use ollama::OllamaGateway;
pub use retry::{RetryPolicy, RetryingGateway};
pub use scripted::{RecordedRequest, ScriptedGateway, ScriptedReply};
pub use traits::{
    BlockingAdapter, BlockingGateway, CompletionGateway, CompletionRequest, ProviderError,
};
