//! Ollama completion gateway
//!
//! Async HTTP adapter for the Ollama chat API with native tool calling.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::{AgentflowError, Config, Message, Result, Role, ToolCallRequest, ToolDefinition};
use crate::llm::traits::{CompletionGateway, CompletionRequest, ProviderError};

/// Ollama API gateway
#[derive(Clone)]
pub struct OllamaGateway {
    client: Client,
    base_url: Url,
}

/// Ollama chat request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    /// Tool that produced a tool-role message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

/// Ollama tool call format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    function: OllamaFunction,
}

/// Ollama function in tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Ollama chat response (non-streaming)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: OllamaMessage,
}

impl OllamaGateway {
    /// Create a gateway from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.ollama.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.ollama_url()?,
        })
    }

    /// Create a gateway with a custom base URL
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AgentflowError::config(format!("Invalid Ollama URL: {}", e)))?;
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> std::result::Result<Url, ProviderError> {
        self.base_url
            .join("api/chat")
            .map_err(|e| ProviderError::fatal(format!("Invalid Ollama URL: {}", e)))
    }

    /// Convert a conversation to Ollama format
    ///
    /// Tool-role messages only carry a call id; the tool name is recovered
    /// from the assistant message that issued the call.
    fn to_ollama_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        let mut names_by_id: HashMap<&str, &str> = HashMap::new();

        messages
            .iter()
            .map(|msg| {
                for call in &msg.tool_calls {
                    names_by_id.insert(call.id.as_str(), call.tool_name.as_str());
                }

                let tool_calls = if msg.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        msg.tool_calls
                            .iter()
                            .map(|tc| OllamaToolCall {
                                id: None,
                                function: OllamaFunction {
                                    name: tc.tool_name.clone(),
                                    arguments: decode_arguments(&tc.arguments),
                                },
                            })
                            .collect(),
                    )
                };

                let tool_name = msg
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| names_by_id.get(id))
                    .map(|name| name.to_string());

                OllamaMessage {
                    role: msg.role.to_string(),
                    content: msg.content.clone(),
                    tool_calls,
                    tool_name,
                }
            })
            .collect()
    }

    /// Convert an Ollama reply into an assistant message
    fn to_assistant_message(response: ChatResponse) -> Message {
        let tool_calls = response
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let id = tc
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                ToolCallRequest::new(id, tc.function.name, tc.function.arguments)
            })
            .collect();

        Message::assistant_with_tool_calls(response.message.content, tool_calls)
    }
}

/// Ollama expects argument objects; models sometimes emit a JSON string
fn decode_arguments(raw: &serde_json::Value) -> serde_json::Value {
    match raw {
        serde_json::Value::String(s) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({}))
        }
        serde_json::Value::Null => serde_json::json!({}),
        other => other.clone(),
    }
}

/// Rate limiting and server-side failures are worth retrying
fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[async_trait]
impl CompletionGateway for OllamaGateway {
    async fn complete(
        &self,
        request: CompletionRequest<'_>,
    ) -> std::result::Result<Message, ProviderError> {
        let body = ChatRequest {
            model: request.model,
            messages: Self::to_ollama_messages(request.messages),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools)
            },
            stream: false,
        };

        tracing::debug!(
            model = request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending Ollama chat request"
        );

        let response = self
            .client
            .post(self.chat_url()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ProviderError::retryable(format!(
                        "Cannot connect to Ollama at {}. Is it running?",
                        self.base_url
                    ))
                } else if e.is_timeout() {
                    ProviderError::retryable(format!("Ollama request timed out: {}", e))
                } else {
                    ProviderError::fatal(format!("Ollama request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let detail = format!("Ollama API error ({}): {}", status, error_text);
            return Err(if is_retryable_status(status) {
                ProviderError::retryable(detail)
            } else {
                ProviderError::fatal(detail)
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(format!("Failed to parse Ollama response: {}", e)))?;

        if chat_response.message.role != Role::Assistant.to_string() {
            return Err(ProviderError::fatal(format!(
                "Ollama returned a '{}' message instead of an assistant message",
                chat_response.message.role
            )));
        }

        Ok(Self::to_assistant_message(chat_response))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_creation() {
        let gateway = OllamaGateway::with_base_url("http://localhost:11434").unwrap();
        assert_eq!(
            gateway.chat_url().unwrap().as_str(),
            "http://localhost:11434/api/chat"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            OllamaGateway::with_base_url("not a url"),
            Err(AgentflowError::Config(_))
        ));
    }

    #[test]
    fn test_tool_messages_carry_tool_name() {
        let messages = vec![
            Message::user("double 21"),
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::new(
                    "c1",
                    "double",
                    serde_json::json!("{\"x\": 21}"),
                )],
            ),
            Message::tool("c1", "42"),
        ];

        let converted = OllamaGateway::to_ollama_messages(&messages);
        assert_eq!(converted[0].role, "user");
        let calls = converted[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, serde_json::json!({"x": 21}));
        assert_eq!(converted[2].role, "tool");
        assert_eq!(converted[2].tool_name.as_deref(), Some("double"));
    }

    #[test]
    fn test_response_conversion_assigns_ids() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "model": "llama3.1",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "double", "arguments": {"x": 21}}},
                    {"function": {"name": "double", "arguments": {"x": 2}}}
                ]
            }
        }))
        .unwrap();

        let message = OllamaGateway::to_assistant_message(response);
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.tool_calls.len(), 2);
        assert!(message.tool_calls[0].id.starts_with("call_"));
        assert_ne!(message.tool_calls[0].id, message.tool_calls[1].id);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }
}
