//! Aggregation step
//!
//! After each round the coordinator asks its model to merge the agents'
//! results. The reply either completes the run or asks for another round.

use serde_json::Value;

use crate::coordinator::routing::{parse_json_reply, value_text};

/// Parsed aggregation reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// The merged final answer
    Complete(String),
    /// Progress so far; routing should run again
    Incomplete(String),
}

impl Aggregation {
    pub fn is_complete(&self) -> bool {
        matches!(self, Aggregation::Complete(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Aggregation::Complete(text) | Aggregation::Incomplete(text) => text,
        }
    }
}

/// Instruction appended to the coordinator conversation after a round
pub fn aggregation_instruction(task: &str) -> String {
    format!(
        r#"Combine the results above into one answer to the original task:
{}

If the task is fully answered, respond with the answer itself, or with
{{"final_answer": "..."}}.
If more work is needed, respond with
{{"status": "incomplete", "summary": "what is known so far and what is missing"}}."#,
        task
    )
}

/// Nudge added before routing again after an incomplete round
pub const CONTINUE_PROMPT: &str =
    "The task is not complete yet. Delegate the next subtask in JSON format, or give the final answer.";

/// Parse an aggregation reply; plain text counts as a complete answer
pub fn parse_aggregation(content: &str) -> Aggregation {
    let Some(Value::Object(reply)) = parse_json_reply(content) else {
        return Aggregation::Complete(content.trim().to_string());
    };

    let incomplete = reply
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| status.eq_ignore_ascii_case("incomplete"))
        || reply.get("complete").and_then(Value::as_bool) == Some(false);

    let text = ["final_answer", "summary", "answer", "result"]
        .iter()
        .find_map(|key| reply.get(*key))
        .map(value_text)
        .unwrap_or_else(|| content.trim().to_string());

    if incomplete {
        Aggregation::Incomplete(text)
    } else {
        Aggregation::Complete(text)
    }
}
