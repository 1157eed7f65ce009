//! Routing strategies
//!
//! A [`RoutingStrategy`] decides, once per round, which agents receive which
//! subtask, or that the coordinator is done. [`ModelRouter`] asks the model;
//! [`FixedRouter`] applies a caller-supplied policy.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Message, ToolDefinition};
use crate::llm::{CompletionGateway, CompletionRequest, ProviderError};

/// One unit of delegated work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub agent: String,
    pub subtask: String,
}

impl Assignment {
    pub fn new(agent: impl Into<String>, subtask: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            subtask: subtask.into(),
        }
    }
}

/// What to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Run these assignments this round
    Delegate(Vec<Assignment>),
    /// Stop with this answer
    Finish(String),
}

/// What the router knows about an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub tools: Vec<String>,
}

/// Everything a router may look at when deciding
pub struct RoutingContext<'a> {
    /// The task given to the coordinator
    pub task: &'a str,
    /// 1-based round number
    pub round: usize,
    pub agents: &'a [AgentProfile],
    /// Coordinator conversation so far
    pub conversation: &'a [Message],
    /// Text of the most recent aggregation, if any
    pub last_aggregation: Option<&'a str>,
    pub(crate) gateway: &'a dyn CompletionGateway,
    pub(crate) model: &'a str,
    pub(crate) timeout: Option<Duration>,
    /// Completions issued through [`RoutingContext::complete`]
    pub(crate) calls: AtomicUsize,
}

impl<'a> RoutingContext<'a> {
    /// Ask the coordinator's model, bounded by the coordinator's gateway timeout
    pub async fn complete(&self, messages: &[Message]) -> Result<Message, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let tools: &[ToolDefinition] = &[];
        let request = CompletionRequest::new(self.model, messages, tools);
        match self.timeout {
            Some(after) => tokio::time::timeout(after, self.gateway.complete(request))
                .await
                .map_err(|_| ProviderError::timeout(after))?,
            None => self.gateway.complete(request).await,
        }
    }
}

impl RoutingContext<'_> {
    /// Number of completions this context has issued
    pub fn completions(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RoutingContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingContext")
            .field("task", &self.task)
            .field("round", &self.round)
            .field("agents", &self.agents)
            .field("messages", &self.conversation.len())
            .field("completions", &self.completions())
            .finish()
    }
}

/// Pluggable routing policy
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    async fn route(&self, ctx: &RoutingContext<'_>) -> Result<RoutingDecision, ProviderError>;
}

/// Routes by asking the coordinator's model
///
/// The coordinator conversation already carries the team description and
/// the JSON protocol (see [`supervisor_prompt`]); the reply is parsed with
/// [`parse_decision`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelRouter;

#[async_trait]
impl RoutingStrategy for ModelRouter {
    async fn route(&self, ctx: &RoutingContext<'_>) -> Result<RoutingDecision, ProviderError> {
        let reply = ctx.complete(ctx.conversation).await?;
        let decision = parse_decision(&reply.content);
        tracing::debug!(round = ctx.round, ?decision, "Model routing decision");
        Ok(decision)
    }
}

type RouteFn = dyn Fn(&RoutingContext<'_>) -> RoutingDecision + Send + Sync;

/// Deterministic caller-supplied routing policy
#[derive(Clone)]
pub struct FixedRouter {
    policy: Arc<RouteFn>,
}

impl FixedRouter {
    pub fn new<F>(policy: F) -> Self
    where
        F: Fn(&RoutingContext<'_>) -> RoutingDecision + Send + Sync + 'static,
    {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Send the task to every agent in the first round, then finish with the
    /// last aggregation
    pub fn broadcast() -> Self {
        Self::new(|ctx| {
            if ctx.round == 1 {
                RoutingDecision::Delegate(
                    ctx.agents
                        .iter()
                        .map(|agent| Assignment::new(&agent.name, ctx.task))
                        .collect(),
                )
            } else {
                RoutingDecision::Finish(ctx.last_aggregation.unwrap_or_default().to_string())
            }
        })
    }

    /// Always send the same subtask to the same agent
    pub fn always(agent: impl Into<String>, subtask: impl Into<String>) -> Self {
        let assignment = Assignment::new(agent, subtask);
        Self::new(move |_| RoutingDecision::Delegate(vec![assignment.clone()]))
    }
}

impl fmt::Debug for FixedRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FixedRouter")
    }
}

#[async_trait]
impl RoutingStrategy for FixedRouter {
    async fn route(&self, ctx: &RoutingContext<'_>) -> Result<RoutingDecision, ProviderError> {
        Ok((self.policy)(ctx))
    }
}

/// System prompt of the coordinator conversation
pub fn supervisor_prompt(agents: &[AgentProfile]) -> String {
    let team = agents
        .iter()
        .map(|agent| {
            let tools = if agent.tools.is_empty() {
                "none".to_string()
            } else {
                agent.tools.join(", ")
            };
            format!("- {}: {} (tools: {})", agent.name, agent.role, tools)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a supervisor coordinating a team of AI agents to complete tasks.

Your team:
{}

Break the task into subtasks, assign each subtask to the most appropriate
agent, and combine their results into a final answer.

To delegate one subtask, respond with JSON only:
{{"agent": "agent_name", "task": "specific task description"}}

To delegate several subtasks at once:
{{"delegate": [{{"agent": "agent_name", "task": "..."}}, ...]}}

When you have enough information, respond with:
{{"final_answer": "your comprehensive answer"}}"#,
        team
    )
}

/// Parse a routing reply
///
/// Accepts bare JSON or JSON inside a fenced code block. Anything that is not
/// a recognizable delegation is taken as the final answer.
pub fn parse_decision(content: &str) -> RoutingDecision {
    let Some(Value::Object(decision)) = parse_json_reply(content) else {
        return RoutingDecision::Finish(content.trim().to_string());
    };

    if let Some(answer) = decision.get("final_answer") {
        return RoutingDecision::Finish(value_text(answer));
    }

    if let Some(entries) = decision.get("delegate").and_then(Value::as_array) {
        return RoutingDecision::Delegate(entries.iter().filter_map(assignment_from).collect());
    }

    match assignment_from(&Value::Object(decision)) {
        Some(assignment) => RoutingDecision::Delegate(vec![assignment]),
        None => RoutingDecision::Finish(content.trim().to_string()),
    }
}

fn assignment_from(value: &Value) -> Option<Assignment> {
    let agent = value.get("agent")?.as_str()?;
    let task = value.get("task").or_else(|| value.get("subtask"))?;
    Some(Assignment::new(agent, value_text(task)))
}

/// Text of a JSON value; strings are unquoted
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parse a model reply as JSON, looking inside a fenced block if needed
pub(crate) fn parse_json_reply(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let (start, fence_len) = match trimmed.find("```json") {
        Some(i) => (i, "```json".len()),
        None => (trimmed.find("```")?, "```".len()),
    };
    let body = &trimmed[start + fence_len..];
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGateway;

    fn profiles() -> Vec<AgentProfile> {
        vec![
            AgentProfile {
                name: "researcher".into(),
                role: "Finds facts".into(),
                tools: vec!["search".into()],
            },
            AgentProfile {
                name: "writer".into(),
                role: "Writes prose".into(),
                tools: vec![],
            },
        ]
    }

    #[test]
    fn test_parse_single_delegation() {
        assert_eq!(
            parse_decision(r#"{"agent": "writer", "task": "draft intro"}"#),
            RoutingDecision::Delegate(vec![Assignment::new("writer", "draft intro")])
        );
    }

    #[test]
    fn test_parse_fenced_multi_delegation() {
        let reply = "Plan:\n```json\n{\"delegate\": [\n  {\"agent\": \"researcher\", \"task\": \"find\"},\n  {\"agent\": \"writer\", \"task\": \"write\"}\n]}\n```";
        match parse_decision(reply) {
            RoutingDecision::Delegate(assignments) => {
                assert_eq!(assignments.len(), 2);
                assert_eq!(assignments[1], Assignment::new("writer", "write"));
            }
            other => panic!("expected delegation, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_final_and_fallback() {
        assert_eq!(
            parse_decision(r#"{"final_answer": "done"}"#),
            RoutingDecision::Finish("done".into())
        );
        assert_eq!(
            parse_decision("  just prose  "),
            RoutingDecision::Finish("just prose".into())
        );
        assert_eq!(
            parse_decision(r#"{"thoughts": "hmm"}"#),
            RoutingDecision::Finish(r#"{"thoughts": "hmm"}"#.into())
        );
    }

    #[test]
    fn test_supervisor_prompt_lists_team() {
        let prompt = supervisor_prompt(&profiles());
        assert!(prompt.contains("- researcher: Finds facts (tools: search)"));
        assert!(prompt.contains("- writer: Writes prose (tools: none)"));
        assert!(prompt.contains("\"final_answer\""));
    }

    #[tokio::test]
    async fn test_model_router_uses_gateway() {
        let gateway = ScriptedGateway::new(vec![Message::assistant(
            r#"{"agent": "researcher", "task": "look it up"}"#,
        )]);
        let agents = profiles();
        let conversation = vec![Message::system("sys"), Message::user("task")];
        let ctx = RoutingContext {
            task: "task",
            round: 1,
            agents: &agents,
            conversation: &conversation,
            last_aggregation: None,
            gateway: &gateway,
            model: "router-model",
            timeout: None,
            calls: AtomicUsize::new(0),
        };

        let decision = ModelRouter.route(&ctx).await.unwrap();
        assert_eq!(
            decision,
            RoutingDecision::Delegate(vec![Assignment::new("researcher", "look it up")])
        );
        assert_eq!(gateway.requests()[0].model, "router-model");
        assert_eq!(ctx.completions(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_router() {
        let gateway = ScriptedGateway::new(vec![]);
        let agents = profiles();
        let mut ctx = RoutingContext {
            task: "summarize",
            round: 1,
            agents: &agents,
            conversation: &[],
            last_aggregation: None,
            gateway: &gateway,
            model: "m",
            timeout: None,
            calls: AtomicUsize::new(0),
        };
        let router = FixedRouter::broadcast();

        match router.route(&ctx).await.unwrap() {
            RoutingDecision::Delegate(assignments) => {
                assert_eq!(assignments.len(), 2);
                assert!(assignments.iter().all(|a| a.subtask == "summarize"));
            }
            other => panic!("expected delegation, got {:?}", other),
        }

        ctx.round = 2;
        ctx.last_aggregation = Some("merged");
        assert_eq!(
            router.route(&ctx).await.unwrap(),
            RoutingDecision::Finish("merged".into())
        );
        assert_eq!(ctx.completions(), 0);
    }
}
