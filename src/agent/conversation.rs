//! Conversation history management
//!
//! Append-only message log owned by a single run. Nothing is removed or
//! rewritten once appended, so a finished conversation replays exactly.

use serde::{Deserialize, Serialize};

use crate::core::{Message, Role};

/// Append-only conversation of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation with a system prompt and the task
    pub fn with_task(system_prompt: impl Into<String>, task: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push(Message::system(system_prompt));
        conversation.push(Message::user(task));
        conversation
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append several messages, keeping their order
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// All messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last assistant message
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Content of the last assistant message, or empty
    pub fn last_assistant_text(&self) -> String {
        self.last_assistant_message()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    /// Get message count
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consume into the message log
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolCallRequest;

    #[test]
    fn test_conversation_basic() {
        let mut conv = Conversation::with_task("You are a helpful assistant", "Hello");
        conv.push(Message::assistant("Hi there!"));

        assert_eq!(conv.len(), 3);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.last_assistant_text(), "Hi there!");
    }

    #[test]
    fn test_last_assistant_skips_tool_messages() {
        let mut conv = Conversation::with_task("sys", "task");
        assert_eq!(conv.last_assistant_text(), "");

        conv.push(Message::assistant_with_tool_calls(
            "thinking",
            vec![ToolCallRequest::new("c1", "t", serde_json::json!({}))],
        ));
        conv.push(Message::tool("c1", "done"));
        assert_eq!(conv.last_assistant_text(), "thinking");
    }

    #[test]
    fn test_round_trip_preserves_linkage() {
        let mut conv = Conversation::with_task("sys", "double 21");
        conv.push(Message::assistant_with_tool_calls(
            "",
            vec![
                ToolCallRequest::new("a", "double", serde_json::json!({"x": 21})),
                ToolCallRequest::new("b", "double", serde_json::json!({"x": 1})),
            ],
        ));
        conv.extend(vec![Message::tool("a", "42"), Message::tool("b", "2")]);
        conv.push(Message::assistant("42"));

        let json = serde_json::to_string(&conv).unwrap();
        let restored: Conversation = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, conv);
        assert_eq!(restored.messages()[3].tool_call_id.as_deref(), Some("a"));
        assert_eq!(restored.messages()[4].tool_call_id.as_deref(), Some("b"));
    }
}
